//! Lifecycle events published while a run executes.

use crate::ids::*;
use crate::run::{FailureReason, JobStatus, RunStatus, StepStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// All events emitted by the orchestrator and executors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    // Run lifecycle
    RunStarted(RunStartedPayload),
    RunCompleted(RunCompletedPayload),

    // Job lifecycle
    JobQueued(JobQueuedPayload),
    JobStarted(JobStartedPayload),
    JobCompleted(JobCompletedPayload),
    JobCancelled(JobCancelledPayload),

    // Step lifecycle
    StepOutput(StepOutputPayload),
    StepCompleted(StepCompletedPayload),
}

impl Event {
    /// Dotted subject used for pattern subscriptions.
    pub fn subject(&self) -> String {
        match self {
            Event::RunStarted(p) => format!("run.{}.started", p.run_id),
            Event::RunCompleted(p) => format!("run.{}.completed", p.run_id),
            Event::JobQueued(p) => format!("run.{}.job.{}.queued", p.run_id, p.job),
            Event::JobStarted(p) => format!("run.{}.job.{}.started", p.run_id, p.job),
            Event::JobCompleted(p) => format!("run.{}.job.{}.completed", p.run_id, p.job),
            Event::JobCancelled(p) => format!("run.{}.job.{}.cancelled", p.run_id, p.job),
            Event::StepOutput(p) => format!("run.{}.job.{}.output", p.run_id, p.job),
            Event::StepCompleted(p) => format!("run.{}.job.{}.step", p.run_id, p.job),
        }
    }

    pub fn run_id(&self) -> RunId {
        match self {
            Event::RunStarted(p) => p.run_id,
            Event::RunCompleted(p) => p.run_id,
            Event::JobQueued(p) => p.run_id,
            Event::JobStarted(p) => p.run_id,
            Event::JobCompleted(p) => p.run_id,
            Event::JobCancelled(p) => p.run_id,
            Event::StepOutput(p) => p.run_id,
            Event::StepCompleted(p) => p.run_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStartedPayload {
    pub run_id: RunId,
    pub workflow: String,
    pub head_sha: Option<String>,
    pub instances: u32,
    pub skipped: Vec<String>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCompletedPayload {
    pub run_id: RunId,
    pub workflow: String,
    pub status: RunStatus,
    pub duration_ms: u64,
    pub jobs_succeeded: u32,
    pub jobs_failed: u32,
    pub jobs_cancelled: u32,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobQueuedPayload {
    pub run_id: RunId,
    pub instance_id: JobInstanceId,
    pub job: String,
    pub display_name: String,
    pub runs_on: String,
    pub queued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStartedPayload {
    pub run_id: RunId,
    pub instance_id: JobInstanceId,
    pub job: String,
    pub display_name: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCompletedPayload {
    pub run_id: RunId,
    pub instance_id: JobInstanceId,
    pub job: String,
    pub display_name: String,
    pub status: JobStatus,
    pub failure: Option<FailureReason>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCancelledPayload {
    pub run_id: RunId,
    pub instance_id: JobInstanceId,
    pub job: String,
    pub display_name: String,
    /// Concurrency group whose newer holder superseded this instance.
    pub group: Option<String>,
    pub cancelled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutputPayload {
    pub run_id: RunId,
    pub instance_id: JobInstanceId,
    pub job: String,
    pub step: String,
    pub stream: LogStream,
    pub line: String,
    pub line_number: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepCompletedPayload {
    pub run_id: RunId,
    pub instance_id: JobInstanceId,
    pub job: String,
    pub step: String,
    pub status: StepStatus,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_subject_and_tag() {
        let run_id = RunId::new();
        let event = Event::JobQueued(JobQueuedPayload {
            run_id,
            instance_id: JobInstanceId::new(),
            job: "lint".to_string(),
            display_name: "lint".to_string(),
            runs_on: "ubuntu-22.04".to_string(),
            queued_at: Utc::now(),
        });
        assert_eq!(event.subject(), format!("run.{}.job.lint.queued", run_id));
        assert_eq!(event.run_id(), run_id);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "job_queued");
    }
}
