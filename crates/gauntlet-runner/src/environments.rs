//! Execution environment management.

use async_trait::async_trait;
use gauntlet_core::run::JobInstance;
use gauntlet_core::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Trait for execution environments.
#[async_trait]
pub trait Environment: Send + Sync {
    /// Prepare the execution environment.
    async fn prepare(&self) -> Result<()>;

    /// Get the working directory.
    fn working_dir(&self) -> &Path;

    /// Cleanup the execution environment.
    async fn cleanup(&self) -> Result<()>;
}

/// Host environment: a fresh directory on the local machine.
pub struct HostEnvironment {
    workspace: PathBuf,
    keep: bool,
}

impl HostEnvironment {
    pub fn new(workspace: PathBuf) -> Self {
        Self {
            workspace,
            keep: false,
        }
    }

    /// Leave the workspace on disk after cleanup.
    pub fn keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }
}

#[async_trait]
impl Environment for HostEnvironment {
    async fn prepare(&self) -> Result<()> {
        info!(workspace = %self.workspace.display(), "Preparing host environment");

        // A leftover directory from an earlier attempt is not reused.
        if tokio::fs::try_exists(&self.workspace).await.unwrap_or(false) {
            debug!(workspace = %self.workspace.display(), "Removing stale workspace");
            tokio::fs::remove_dir_all(&self.workspace).await.map_err(|e| {
                Error::Provisioning(format!("Failed to clear stale workspace: {}", e))
            })?;
        }
        tokio::fs::create_dir_all(&self.workspace)
            .await
            .map_err(|e| Error::Provisioning(format!("Failed to create workspace: {}", e)))?;
        Ok(())
    }

    fn working_dir(&self) -> &Path {
        &self.workspace
    }

    async fn cleanup(&self) -> Result<()> {
        if self.keep {
            info!(workspace = %self.workspace.display(), "Keeping host workspace");
            return Ok(());
        }
        info!(workspace = %self.workspace.display(), "Cleaning up host environment");
        match tokio::fs::remove_dir_all(&self.workspace).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(workspace = %self.workspace.display(), error = %e, "Failed to remove workspace");
                Err(e.into())
            }
        }
    }
}

/// Creates the environment a job instance runs in.
pub trait EnvironmentFactory: Send + Sync {
    fn create(&self, instance: &JobInstance) -> Box<dyn Environment>;
}

/// Host workspaces laid out as `<root>/<run_id>/<instance_id>`.
#[derive(Debug, Clone)]
pub struct HostEnvironmentFactory {
    root: PathBuf,
    keep_workspaces: bool,
}

impl HostEnvironmentFactory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            keep_workspaces: false,
        }
    }

    pub fn keep_workspaces(mut self, keep: bool) -> Self {
        self.keep_workspaces = keep;
        self
    }

    pub fn workspace_for(&self, instance: &JobInstance) -> PathBuf {
        self.root
            .join(instance.run_id.to_string())
            .join(instance.id.to_string())
    }
}

impl EnvironmentFactory for HostEnvironmentFactory {
    fn create(&self, instance: &JobInstance) -> Box<dyn Environment> {
        Box::new(HostEnvironment::new(self.workspace_for(instance)).keep(self.keep_workspaces))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_host_environment_lifecycle() {
        let root = tempfile::tempdir().unwrap();
        let env = HostEnvironment::new(root.path().join("ws"));

        env.prepare().await.unwrap();
        assert!(env.working_dir().is_dir());

        tokio::fs::write(env.working_dir().join("leftover"), b"x").await.unwrap();
        env.prepare().await.unwrap();
        assert!(!env.working_dir().join("leftover").exists());

        env.cleanup().await.unwrap();
        assert!(!env.working_dir().exists());
        env.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_keep_workspace() {
        let root = tempfile::tempdir().unwrap();
        let env = HostEnvironment::new(root.path().join("ws")).keep(true);
        env.prepare().await.unwrap();
        env.cleanup().await.unwrap();
        assert!(env.working_dir().is_dir());
    }
}
