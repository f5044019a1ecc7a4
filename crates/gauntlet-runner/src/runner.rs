//! Core runner trait and types.

use async_trait::async_trait;
use gauntlet_core::Result;
use gauntlet_core::cancel::CancelSignal;
use gauntlet_core::events::LogStream;
use indexmap::IndexMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

/// Exit code reported when a step is killed for exceeding its timeout or
/// being cancelled.
pub const KILLED_EXIT_CODE: i32 = -1;

/// Exit code reported when a `uses` reference cannot be resolved.
pub const UNRESOLVED_ACTION_EXIT_CODE: i32 = 127;

/// Output line from step execution.
#[derive(Debug, Clone)]
pub struct OutputLine {
    pub stream: LogStream,
    pub content: String,
    pub line_number: u32,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Result of step execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    pub exit_code: i32,
    pub success: bool,
    pub duration_ms: u64,
    pub timed_out: bool,
    pub cancelled: bool,
}

impl StepResult {
    pub fn exited(exit_code: i32, duration_ms: u64) -> Self {
        Self {
            exit_code,
            success: exit_code == 0,
            duration_ms,
            timed_out: false,
            cancelled: false,
        }
    }
}

/// Context for step execution.
#[derive(Debug, Clone)]
pub struct StepContext {
    /// Display name of the step, for logs.
    pub name: String,
    /// Script to run, with expressions already interpolated.
    pub command: String,
    /// Interpreter, e.g. `bash` or `sh -c`.
    pub shell: String,
    pub working_dir: PathBuf,
    /// Complete environment for the step.
    pub env: IndexMap<String, String>,
    pub timeout: Option<Duration>,
    pub cancel: CancelSignal,
}

/// Trait for step execution.
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Execute a step, streaming output to the provided channel.
    ///
    /// A non-zero exit is a normal result. Errors are reserved for failing
    /// to run the command at all.
    async fn execute(
        &self,
        ctx: &StepContext,
        output_tx: mpsc::Sender<OutputLine>,
    ) -> Result<StepResult>;
}
