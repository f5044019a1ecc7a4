//! Run and job-instance types.

use crate::artifact::Artifact;
use crate::event::TriggerEvent;
use crate::ids::{JobInstanceId, RunId};
use crate::workflow::JobDefinition;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A job definition bound to one matrix cell within one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInstance {
    pub id: JobInstanceId,
    pub run_id: RunId,
    /// Key of the job in the workflow.
    pub job: String,
    /// `job (k1=v1, k2=v2)`, or just the job key without a matrix.
    pub display_name: String,
    pub matrix: IndexMap<String, Value>,
    /// Runner label with matrix references resolved.
    pub runs_on: String,
    /// Workflow env overlaid with job env, not yet interpolated.
    pub env: IndexMap<String, String>,
    /// Concurrency key with matrix references resolved.
    pub concurrency_group: Option<String>,
    pub cancel_in_progress: bool,
    pub timeout_minutes: Option<u32>,
    /// `continue-on-error` at job level: never affects run status.
    pub best_effort: bool,
    pub definition: JobDefinition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, to),
            (Pending, Running)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }

    /// Validate a transition, returning the new status.
    pub fn transition(self, to: JobStatus, instance: &str) -> Result<JobStatus> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(Error::IllegalTransition {
                instance: instance.to_string(),
                from: self.to_string(),
                to: to.to_string(),
            })
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

/// Why a job instance ended up Failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    StepFailed { step: String, exit_code: i32 },
    UpstreamFailed { job: String },
    WaitTimeout,
    JobTimeout,
    Provisioning { message: String },
    FailFast,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::StepFailed { step, exit_code } => {
                write!(f, "step `{}` exited with code {}", step, exit_code)
            }
            FailureReason::UpstreamFailed { job } => write!(f, "upstream `{}` did not succeed", job),
            FailureReason::WaitTimeout => f.write_str("timed out waiting for upstream jobs"),
            FailureReason::JobTimeout => f.write_str("job exceeded its timeout"),
            FailureReason::Provisioning { message } => {
                write!(f, "environment setup failed: {}", message)
            }
            FailureReason::FailFast => f.write_str("cancelled by fail-fast"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub name: String,
    pub status: StepStatus,
    pub exit_code: Option<i32>,
    /// `continue-on-error` step.
    pub best_effort: bool,
    pub duration_ms: u64,
}

/// Terminal record of one job instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcome {
    pub instance_id: JobInstanceId,
    pub job: String,
    pub display_name: String,
    pub matrix: IndexMap<String, Value>,
    pub status: JobStatus,
    pub best_effort: bool,
    pub failure: Option<FailureReason>,
    pub steps: Vec<StepOutcome>,
    /// Artifacts uploaded by this instance, before retention is applied.
    pub artifacts: Vec<Artifact>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: DateTime<Utc>,
}

impl JobOutcome {
    /// Outcome for an instance that never ran its steps.
    pub fn not_started(instance: &JobInstance, status: JobStatus, failure: Option<FailureReason>) -> Self {
        Self {
            instance_id: instance.id,
            job: instance.job.clone(),
            display_name: instance.display_name.clone(),
            matrix: instance.matrix.clone(),
            status,
            best_effort: instance.best_effort,
            failure,
            steps: Vec::new(),
            artifacts: Vec::new(),
            started_at: None,
            completed_at: Utc::now(),
        }
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.started_at
            .map(|start| (self.completed_at - start).num_milliseconds().max(0) as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Succeeded)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Per job and axis value, how the instances ended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisSummary {
    pub job: String,
    pub axis: String,
    pub value: String,
    pub succeeded: u32,
    pub failed: u32,
    pub cancelled: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub workflow: String,
    pub event: TriggerEvent,
    pub status: RunStatus,
    pub jobs: Vec<JobOutcome>,
    /// Jobs whose condition evaluated to false.
    pub skipped: Vec<String>,
    /// Artifacts that survived retention.
    pub artifacts: Vec<Artifact>,
    pub axis_summaries: Vec<AxisSummary>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn job(&self, display_name: &str) -> Option<&JobOutcome> {
        self.jobs.iter().find(|j| j.display_name == display_name)
    }

    pub fn artifact(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        let status = JobStatus::Pending;
        let status = status.transition(JobStatus::Running, "build").unwrap();
        let status = status.transition(JobStatus::Succeeded, "build").unwrap();
        assert!(status.is_terminal());
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Cancelled));
    }

    #[test]
    fn test_illegal_transitions() {
        let err = JobStatus::Succeeded
            .transition(JobStatus::Running, "build")
            .unwrap_err();
        assert!(matches!(err, Error::IllegalTransition { .. }));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Succeeded));
        assert!(!JobStatus::Cancelled.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn test_failure_reason_display() {
        let reason = FailureReason::StepFailed {
            step: "make test".to_string(),
            exit_code: 2,
        };
        assert_eq!(reason.to_string(), "step `make test` exited with code 2");
    }
}
