//! Error types for Gauntlet.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Workflow errors
    #[error("Failed to parse workflow: {0}")]
    WorkflowParse(String),

    #[error("Invalid workflow definition: {0}")]
    InvalidWorkflow(String),

    #[error("Unknown job referenced by {from}: {job}")]
    UnknownJob { from: String, job: String },

    #[error("Dependency cycle detected involving job: {0}")]
    DependencyCycle(String),

    #[error("Invalid condition `{expression}`: {message}")]
    InvalidCondition { expression: String, message: String },

    // Run errors
    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Illegal job transition for {instance}: {from} -> {to}")]
    IllegalTransition {
        instance: String,
        from: String,
        to: String,
    },

    // Step errors
    #[error("Step failed with exit code {exit_code}: {message}")]
    StepFailed { exit_code: i32, message: String },

    #[error("Step timeout after {minutes} minutes")]
    StepTimeout { minutes: u32 },

    #[error("Action not found: {0}")]
    ActionNotFound(String),

    // Environment errors
    #[error("Failed to provision environment: {0}")]
    Provisioning(String),

    // Artifact errors
    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("Artifact upload failed: {0}")]
    ArtifactUploadFailed(String),

    // Infrastructure errors
    #[error("Event bus error: {0}")]
    EventBus(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::WorkflowParse(err.to_string())
    }
}
