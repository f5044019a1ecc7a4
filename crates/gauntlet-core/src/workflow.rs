//! Workflow definition types.
//!
//! These types represent the user-authored workflow YAML. Keys are kebab-case
//! (`runs-on`, `timeout-minutes`, `continue-on-error`).

use crate::condition::Condition;
use crate::event::TriggerConfig;
use crate::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub on: Option<TriggerConfig>,
    #[serde(default)]
    pub env: IndexMap<String, String>,
    /// Run-level concurrency group: a newer run supersedes the older one.
    #[serde(default)]
    pub concurrency: Option<ConcurrencyConfig>,
    pub jobs: IndexMap<String, JobDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JobDefinition {
    /// Display name; the map key is the job's identity.
    #[serde(default)]
    pub name: Option<String>,
    pub runs_on: String,
    #[serde(default)]
    pub needs: Vec<String>,
    #[serde(default)]
    pub wait: Option<WaitConfig>,
    #[serde(default, rename = "if")]
    pub condition: Option<String>,
    #[serde(default)]
    pub strategy: Option<StrategyConfig>,
    #[serde(default)]
    pub concurrency: Option<ConcurrencyConfig>,
    #[serde(default)]
    pub timeout_minutes: Option<u32>,
    #[serde(default)]
    pub env: IndexMap<String, String>,
    /// Best-effort job: its outcome never affects the run status.
    #[serde(default)]
    pub continue_on_error: bool,
    pub steps: Vec<StepDefinition>,
}

impl JobDefinition {
    pub fn matrix(&self) -> Option<&MatrixConfig> {
        self.strategy.as_ref().map(|s| &s.matrix)
    }

    pub fn fail_fast(&self) -> bool {
        self.strategy.as_ref().is_some_and(|s| s.fail_fast)
    }

    pub fn max_parallel(&self) -> Option<u32> {
        self.strategy.as_ref().and_then(|s| s.max_parallel)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StrategyConfig {
    #[serde(default)]
    pub matrix: MatrixConfig,
    /// Cancel sibling instances when one fails. Off unless requested.
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default)]
    pub max_parallel: Option<u32>,
}

/// Matrix axes in declaration order, plus include/exclude lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatrixConfig {
    #[serde(default)]
    pub include: Vec<IndexMap<String, Value>>,
    #[serde(default)]
    pub exclude: Vec<IndexMap<String, Value>>,
    #[serde(flatten)]
    pub axes: IndexMap<String, Vec<Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConcurrencyConfig {
    pub group: String,
    #[serde(default)]
    pub cancel_in_progress: bool,
}

/// Explicit cross-job wait.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WaitConfig {
    #[serde(rename = "on")]
    pub targets: Vec<WaitTarget>,
    #[serde(default)]
    pub ignore_upstream_failure: bool,
    #[serde(default)]
    pub timeout_minutes: Option<u32>,
    #[serde(default)]
    pub poll_interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitTarget {
    pub job: String,
    /// Matrix cell selector; empty selects every cell. Values may interpolate
    /// the waiting instance's own matrix.
    #[serde(default)]
    pub matrix: IndexMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StepDefinition {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub run: Option<String>,
    #[serde(default)]
    pub uses: Option<String>,
    #[serde(default)]
    pub with: IndexMap<String, Value>,
    #[serde(default)]
    pub env: IndexMap<String, String>,
    #[serde(default, rename = "if")]
    pub condition: Option<String>,
    #[serde(default)]
    pub continue_on_error: bool,
    #[serde(default)]
    pub timeout_minutes: Option<u32>,
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default)]
    pub upload: Option<ArtifactUpload>,
    #[serde(default)]
    pub download: Vec<ArtifactDownload>,
}

impl StepDefinition {
    /// Name shown in logs: explicit name, else the action or first command line.
    pub fn display_name(&self, index: usize) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        if let Some(uses) = &self.uses {
            return uses.clone();
        }
        if let Some(run) = &self.run
            && let Some(first) = run.lines().map(str::trim).find(|l| !l.is_empty())
        {
            return first.to_string();
        }
        if let Some(upload) = &self.upload {
            return format!("upload {}", upload.name);
        }
        format!("step-{}", index + 1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactUpload {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub when: UploadWhen,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UploadWhen {
    #[default]
    OnSuccess,
    Always,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactDownload {
    pub name: String,
    /// Destination relative to the workspace; defaults to the artifact name.
    #[serde(default)]
    pub path: Option<String>,
}

impl WorkflowDefinition {
    /// Parse a workflow from YAML.
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Load and parse a workflow file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Check everything that can be checked without an event.
    ///
    /// Dependency targets and cycles are checked when the instance graph is
    /// built, since they depend on matrix expansion.
    pub fn validate(&self) -> Result<()> {
        if self.jobs.is_empty() {
            return Err(Error::InvalidWorkflow("workflow has no jobs".into()));
        }

        for (job_name, job) in &self.jobs {
            if job.steps.is_empty() {
                return Err(Error::InvalidWorkflow(format!("job `{}` has no steps", job_name)));
            }
            if job.runs_on.trim().is_empty() {
                return Err(Error::InvalidWorkflow(format!(
                    "job `{}` has an empty `runs-on`",
                    job_name
                )));
            }
            if let Some(expr) = &job.condition {
                Condition::parse(expr)?;
            }
            if let Some(matrix) = job.matrix() {
                for (axis, values) in &matrix.axes {
                    if values.is_empty() {
                        return Err(Error::InvalidWorkflow(format!(
                            "matrix axis `{}` of job `{}` has no values",
                            axis, job_name
                        )));
                    }
                }
            }
            for dep in job
                .needs
                .iter()
                .chain(job.wait.iter().flat_map(|w| w.targets.iter().map(|t| &t.job)))
            {
                if !self.jobs.contains_key(dep) {
                    return Err(Error::UnknownJob {
                        from: job_name.clone(),
                        job: dep.clone(),
                    });
                }
            }

            for (idx, step) in job.steps.iter().enumerate() {
                let label = format!("step `{}` of job `{}`", step.display_name(idx), job_name);
                if step.run.is_some() && step.uses.is_some() {
                    return Err(Error::InvalidWorkflow(format!(
                        "{} sets both `run` and `uses`",
                        label
                    )));
                }
                if step.run.is_none()
                    && step.uses.is_none()
                    && step.upload.is_none()
                    && step.download.is_empty()
                {
                    return Err(Error::InvalidWorkflow(format!("{} has nothing to do", label)));
                }
                if let Some(expr) = &step.condition {
                    Condition::parse(expr)?;
                }
            }
        }

        Ok(())
    }
}
