//! Matrix expansion for job instances.

use gauntlet_core::workflow::MatrixConfig;
use indexmap::IndexMap;
use serde_json::Value;

/// One binding of every matrix axis.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixCell {
    pub index: usize,
    pub values: IndexMap<String, Value>,
    pub display_name: String,
}

/// Expander for matrix configurations.
pub struct MatrixExpander;

impl MatrixExpander {
    pub fn new() -> Self {
        Self
    }

    /// Expand a job's matrix into its cells.
    ///
    /// The first declared axis varies slowest. Without a matrix, or with no
    /// axes, a single unbound cell is produced. Duplicate values are kept.
    pub fn expand(&self, job_name: &str, matrix: Option<&MatrixConfig>) -> Vec<MatrixCell> {
        let Some(matrix) = matrix else {
            return vec![self.cell(job_name, 0, IndexMap::new())];
        };

        let mut combinations = self.generate_combinations(&matrix.axes);

        for include in &matrix.include {
            if !combinations.contains(include) {
                combinations.push(include.clone());
            }
        }

        combinations.retain(|combo| {
            !matrix
                .exclude
                .iter()
                .any(|exclude| self.matches_exclude(combo, exclude))
        });

        combinations
            .into_iter()
            .enumerate()
            .map(|(idx, values)| self.cell(job_name, idx, values))
            .collect()
    }

    fn cell(&self, job_name: &str, index: usize, values: IndexMap<String, Value>) -> MatrixCell {
        MatrixCell {
            index,
            display_name: format_display_name(job_name, &values),
            values,
        }
    }

    fn generate_combinations(
        &self,
        axes: &IndexMap<String, Vec<Value>>,
    ) -> Vec<IndexMap<String, Value>> {
        let mut result = vec![IndexMap::new()];

        for (key, values) in axes {
            let mut next = Vec::with_capacity(result.len() * values.len());
            for combo in &result {
                for value in values {
                    let mut new_combo = combo.clone();
                    new_combo.insert(key.clone(), value.clone());
                    next.push(new_combo);
                }
            }
            result = next;
        }

        result
    }

    /// An exclude entry matches when every key it names is bound to an equal value.
    fn matches_exclude(
        &self,
        combo: &IndexMap<String, Value>,
        exclude: &IndexMap<String, Value>,
    ) -> bool {
        exclude
            .iter()
            .all(|(key, value)| combo.get(key) == Some(value))
    }
}

impl Default for MatrixExpander {
    fn default() -> Self {
        Self::new()
    }
}

/// `job (k1=v1, k2=v2)`; strings render without quotes.
pub fn format_display_name(job_name: &str, values: &IndexMap<String, Value>) -> String {
    if values.is_empty() {
        return job_name.to_string();
    }

    let parts: Vec<String> = values
        .iter()
        .map(|(k, v)| {
            let v_str = match v {
                Value::String(s) => s.clone(),
                _ => v.to_string(),
            };
            format!("{}={}", k, v_str)
        })
        .collect();

    format!("{} ({})", job_name, parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn matrix(axes: &[(&str, Vec<Value>)]) -> MatrixConfig {
        MatrixConfig {
            axes: axes
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            ..Default::default()
        }
    }

    fn binding(pairs: &[(&str, Value)]) -> IndexMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_cartesian_product_size_and_uniqueness() {
        let config = matrix(&[
            ("os", vec![json!("ubuntu-2204"), json!("flatcar")]),
            (
                "kube",
                vec![json!("v1.25.11"), json!("v1.26.6"), json!("v1.27.3")],
            ),
            ("cni", vec![json!("calico"), json!("cilium")]),
        ]);

        let cells = MatrixExpander::new().expand("build-image", Some(&config));
        assert_eq!(cells.len(), 2 * 3 * 2);

        let names: HashSet<&str> = cells.iter().map(|c| c.display_name.as_str()).collect();
        assert_eq!(names.len(), cells.len());
    }

    #[test]
    fn test_first_axis_varies_slowest() {
        let config = matrix(&[
            ("os", vec![json!("a"), json!("b")]),
            ("kube", vec![json!("1"), json!("2")]),
        ]);

        let names: Vec<String> = MatrixExpander::new()
            .expand("job", Some(&config))
            .into_iter()
            .map(|c| c.display_name)
            .collect();
        assert_eq!(
            names,
            vec![
                "job (os=a, kube=1)",
                "job (os=a, kube=2)",
                "job (os=b, kube=1)",
                "job (os=b, kube=2)",
            ]
        );
    }

    #[test]
    fn test_partial_exclude() {
        let mut config = matrix(&[
            ("os", vec![json!("linux"), json!("macos")]),
            ("arch", vec![json!("amd64"), json!("arm64")]),
        ]);
        config.exclude.push(binding(&[("os", json!("macos"))]));

        let cells = MatrixExpander::new().expand("build", Some(&config));
        assert_eq!(cells.len(), 2);
        assert!(cells.iter().all(|c| c.values["os"] == json!("linux")));
    }

    #[test]
    fn test_full_exclude() {
        let mut config = matrix(&[
            ("os", vec![json!("linux"), json!("macos")]),
            ("arch", vec![json!("amd64"), json!("arm64")]),
        ]);
        config
            .exclude
            .push(binding(&[("os", json!("macos")), ("arch", json!("amd64"))]));

        let cells = MatrixExpander::new().expand("build", Some(&config));
        assert_eq!(cells.len(), 3);
    }

    #[test]
    fn test_include_appended() {
        let mut config = matrix(&[("python", vec![json!("3.10")])]);
        config.include.push(binding(&[("python", json!("3.12"))]));
        config.include.push(binding(&[("python", json!("3.10"))]));

        let cells = MatrixExpander::new().expand("unit", Some(&config));
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[1].display_name, "unit (python=3.12)");
    }

    #[test]
    fn test_no_axes_yields_single_cell() {
        let cells = MatrixExpander::new().expand("lint", None);
        assert_eq!(cells.len(), 1);
        assert!(cells[0].values.is_empty());
        assert_eq!(cells[0].display_name, "lint");

        let cells = MatrixExpander::new().expand("lint", Some(&MatrixConfig::default()));
        assert_eq!(cells.len(), 1);
    }

    #[test]
    fn test_duplicates_are_not_detected() {
        let config = matrix(&[("kube", vec![json!("v1"), json!("v1")])]);
        assert_eq!(MatrixExpander::new().expand("e2e", Some(&config)).len(), 2);
    }

    #[test]
    fn test_record_values_render_as_json() {
        let config = matrix(&[("runner", vec![json!({"label": "large"})])]);
        let cells = MatrixExpander::new().expand("build", Some(&config));
        assert_eq!(cells[0].display_name, r#"build (runner={"label":"large"})"#);
    }
}
