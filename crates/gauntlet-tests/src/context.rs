//! Wiring of an orchestrator against temporary directories.

use crate::helpers::ScriptedRunner;
use gauntlet_core::ports::ArtifactStore;
use gauntlet_runner::runner::StepRunner;
use gauntlet_runner::{ActionRegistry, FsArtifactStore, HostEnvironmentFactory, JobExecutor, ShellRunner};
use gauntlet_scheduler::bus::MemoryEventBus;
use gauntlet_scheduler::{Orchestrator, OrchestratorConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// An orchestrator with a scripted runner, in-memory bus and a tempdir
/// artifact store.
pub struct TestContext {
    pub dir: TempDir,
    pub runner: Arc<ScriptedRunner>,
    pub bus: Arc<MemoryEventBus>,
    pub artifacts: Arc<FsArtifactStore>,
    pub orchestrator: Orchestrator,
}

/// Timeouts short enough for tests.
pub fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        wait_timeout: Duration::from_secs(10),
        poll_interval: Duration::from_millis(50),
        default_job_timeout: Some(Duration::from_secs(30)),
        ..OrchestratorConfig::default()
    }
}

/// Actions resolve to their bare names so scripts can match them.
fn scripted_actions() -> ActionRegistry {
    let mut actions = ActionRegistry::default();
    actions.register("actions/checkout", "checkout");
    actions
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    pub fn with_config(config: OrchestratorConfig) -> Self {
        let runner = Arc::new(ScriptedRunner::new());
        Self::build(config, runner.clone(), runner, scripted_actions())
    }

    /// Steps run through `bash` instead of the scripted runner.
    pub fn with_shell(actions: ActionRegistry) -> Self {
        Self::build(
            fast_config(),
            Arc::new(ShellRunner::new()),
            Arc::new(ScriptedRunner::new()),
            actions,
        )
    }

    fn build(
        config: OrchestratorConfig,
        step_runner: Arc<dyn StepRunner>,
        runner: Arc<ScriptedRunner>,
        actions: ActionRegistry,
    ) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let bus = Arc::new(MemoryEventBus::new());
        let artifacts = Arc::new(FsArtifactStore::new(dir.path().join("artifacts")));
        let executor = JobExecutor::new(
            step_runner,
            Arc::new(HostEnvironmentFactory::new(dir.path().join("workspaces"))),
            artifacts.clone(),
            bus.clone(),
        )
        .with_actions(actions);

        let orchestrator = Orchestrator::new(
            config,
            Arc::new(executor),
            artifacts.clone() as Arc<dyn ArtifactStore>,
            bus.clone(),
        );

        Self {
            dir,
            runner,
            bus,
            artifacts,
            orchestrator,
        }
    }

    pub fn workspace_root(&self) -> PathBuf {
        self.dir.path().join("workspaces")
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
