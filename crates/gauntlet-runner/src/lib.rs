//! Step execution engine for Gauntlet.

pub mod actions;
pub mod artifacts;
pub mod environments;
pub mod executor;
pub mod runner;
pub mod shell;

pub use actions::ActionRegistry;
pub use artifacts::FsArtifactStore;
pub use environments::{Environment, EnvironmentFactory, HostEnvironment, HostEnvironmentFactory};
pub use executor::{ExecutorConfig, JobExecutor};
pub use runner::{OutputLine, StepContext, StepResult, StepRunner};
pub use shell::ShellRunner;
