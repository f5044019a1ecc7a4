//! Expression context and `${{ ... }}` interpolation.

use crate::condition::{self, Condition};
use crate::event::TriggerEvent;
use indexmap::IndexMap;
use regex::{Captures, Regex};
use serde_json::Value;
use std::sync::LazyLock;
use tracing::warn;

static TEMPLATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{\{\s*(.+?)\s*\}\}").expect("template regex is valid"));

/// Values visible to expressions.
#[derive(Debug, Clone, Default)]
pub struct InterpolationContext {
    /// Trigger event of the current run
    pub event: Option<TriggerEvent>,
    /// Matrix values for the current job instance
    pub matrix: IndexMap<String, Value>,
    /// Merged workflow, job and step environment
    pub env: IndexMap<String, String>,
    /// Whether a non-best-effort step of the job has failed
    pub job_failed: bool,
    /// Whether the job instance has been cancelled
    pub cancelled: bool,
}

impl InterpolationContext {
    /// Create a new empty context.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_event(event: TriggerEvent) -> Self {
        Self {
            event: Some(event),
            ..Self::default()
        }
    }

    pub fn with_matrix(mut self, matrix: IndexMap<String, Value>) -> Self {
        self.matrix = matrix;
        self
    }

    /// Interpolate expressions in a string.
    ///
    /// Supports any expression understood by [`Condition`], for example:
    /// - `${{ matrix.kube }}`
    /// - `${{ env.NODE_COUNT }}`
    /// - `${{ github.event.pull_request.head.sha }}`
    ///
    /// Missing values and unparseable expressions render as the empty string.
    pub fn interpolate(&self, input: &str) -> String {
        if !input.contains("${{") {
            return input.to_string();
        }

        TEMPLATE
            .replace_all(input, |caps: &Captures| {
                let expr = caps.get(1).map_or("", |m| m.as_str());
                match Condition::parse(expr) {
                    Ok(parsed) => condition::render(&parsed.evaluate_value(self)),
                    Err(e) => {
                        warn!(expression = %expr, error = %e, "Failed to interpolate expression");
                        String::new()
                    }
                }
            })
            .into_owned()
    }

    /// Interpolate a JSON value, recursing into strings only.
    pub fn interpolate_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.interpolate(s)),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.interpolate_value(v)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.interpolate_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Evaluate a condition against this context.
    pub fn evaluate(&self, condition: &Condition) -> bool {
        condition.evaluate(self)
    }

    /// Resolve a dotted path to a value.
    pub fn lookup(&self, segments: &[String]) -> Option<Value> {
        let parts: Vec<&str> = segments.iter().map(String::as_str).collect();
        match parts.as_slice() {
            ["event", field] => self.event.as_ref()?.field(field),
            ["github", "event", "pull_request", "body"] => self.event.as_ref()?.field("body"),
            ["github", "event", "pull_request", "number"] | ["github", "event", "number"] => {
                self.event.as_ref()?.field("number")
            }
            ["github", "event", "pull_request", "head", "sha"] | ["github", "sha"] => {
                self.event.as_ref()?.field("head_sha")
            }
            ["github", "event", "pull_request", "head", "ref"]
            | ["github", "head_ref"]
            | ["github", "ref"] => self.event.as_ref()?.field("ref"),
            ["github", "event", "pull_request", "base", "ref"] | ["github", "base_ref"] => {
                self.event.as_ref()?.field("base_ref")
            }
            ["github", "event", "action"] => self.event.as_ref()?.field("action"),
            ["matrix", axis, rest @ ..] => {
                let mut value = self.matrix.get(*axis)?;
                for key in rest {
                    value = value.get(*key)?;
                }
                Some(value.clone())
            }
            ["env", name] => self.env.get(*name).cloned().map(Value::String),
            [name] => self.env.get(*name).cloned().map(Value::String),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_interpolate_matrix_variable() {
        let mut ctx = InterpolationContext::new();
        ctx.matrix.insert("os".to_string(), json!("ubuntu-2204"));
        ctx.matrix.insert("kube".to_string(), json!("v1.27.3"));

        assert_eq!(
            ctx.interpolate("${{ matrix.os }}-kube-${{ matrix.kube }}.qcow2"),
            "ubuntu-2204-kube-v1.27.3.qcow2"
        );
    }

    #[test]
    fn test_interpolate_nested_matrix_record() {
        let mut ctx = InterpolationContext::new();
        ctx.matrix
            .insert("runner".to_string(), json!({"label": "ubuntu-22.04", "python": "3.10"}));
        assert_eq!(ctx.interpolate("${{ matrix.runner.label }}"), "ubuntu-22.04");
    }

    #[test]
    fn test_interpolate_env_and_event() {
        let mut ctx = InterpolationContext::for_event(TriggerEvent::pull_request(
            "refs/pull/7/merge",
            "cafe",
        ));
        ctx.env.insert("NODE_COUNT".to_string(), "2".to_string());

        assert_eq!(ctx.interpolate("nodes=${{ env.NODE_COUNT }}"), "nodes=2");
        assert_eq!(ctx.interpolate("${{NODE_COUNT}}"), "2");
        assert_eq!(
            ctx.interpolate("${{ github.event.pull_request.head.sha }}"),
            "cafe"
        );
        assert_eq!(ctx.interpolate("${{ github.ref }}"), "refs/pull/7/merge");
    }

    #[test]
    fn test_interpolate_boolean_expression() {
        let ctx = InterpolationContext::for_event(
            TriggerEvent::pull_request("r", "s").with_body("/build-new-image"),
        );
        assert_eq!(
            ctx.interpolate("${{ contains(github.event.pull_request.body, '/build-new-image') }}"),
            "true"
        );
    }

    #[test]
    fn test_interpolate_missing_returns_empty() {
        let ctx = InterpolationContext::new();
        assert_eq!(ctx.interpolate("Value: ${{ MISSING }}"), "Value: ");
        assert_eq!(ctx.interpolate("${{ matrix.missing }}"), "");
        assert_eq!(ctx.interpolate("${{ event.body }}"), "");
    }

    #[test]
    fn test_interpolate_no_templates() {
        let ctx = InterpolationContext::new();
        assert_eq!(ctx.interpolate("No variables here"), "No variables here");
    }

    #[test]
    fn test_interpolate_value_recurses() {
        let mut ctx = InterpolationContext::new();
        ctx.matrix.insert("kube".to_string(), json!("v1.28.0"));
        let value = json!({"kube": "${{ matrix.kube }}", "nodes": 2});
        assert_eq!(
            ctx.interpolate_value(&value),
            json!({"kube": "v1.28.0", "nodes": 2})
        );
    }
}
