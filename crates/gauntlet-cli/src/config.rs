//! CLI configuration management.

use gauntlet_runner::ExecutorConfig;
use gauntlet_scheduler::OrchestratorConfig;
use gauntlet_scheduler::pool::PoolConfig;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GauntletConfig {
    /// Parent directory of per-instance workspaces.
    pub workspace_root: PathBuf,
    /// Root of the artifact store.
    pub artifact_root: PathBuf,
    /// Slots for runner labels not listed in `runners`.
    pub default_slots: usize,
    /// Runner label to slot count.
    pub runners: IndexMap<String, usize>,
    /// Fail instances whose `runs-on` label is not listed in `runners`.
    pub strict_labels: bool,
    pub poll_interval_secs: u64,
    pub wait_timeout_minutes: u64,
    /// Zero disables the default job timeout.
    pub default_job_timeout_minutes: u64,
    pub shell: String,
    /// Action reference (without `@version`) to the command that implements it.
    pub actions: IndexMap<String, String>,
    pub keep_workspaces: bool,
    pub output_format: OutputFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "gauntlet", "gauntlet")
        .map(|dirs| dirs.data_local_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join("gauntlet"))
}

impl Default for GauntletConfig {
    fn default() -> Self {
        let mut actions = IndexMap::new();
        actions.insert(
            "actions/checkout".to_string(),
            "cp -a \"${GAUNTLET_SOURCE_DIR:-.}/.\" .".to_string(),
        );

        Self {
            workspace_root: std::env::temp_dir().join("gauntlet").join("workspaces"),
            artifact_root: data_dir().join("artifacts"),
            default_slots: 4,
            runners: IndexMap::new(),
            strict_labels: false,
            poll_interval_secs: 10,
            wait_timeout_minutes: 60,
            default_job_timeout_minutes: 360,
            shell: "bash".to_string(),
            actions,
            keep_workspaces: false,
            output_format: OutputFormat::Table,
        }
    }
}

impl GauntletConfig {
    /// Load configuration from `path`, else from the user config file, else
    /// defaults. Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => Self::config_path().ok().filter(|p| p.exists()),
        };

        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(&path)?;
                serde_yaml::from_str(&content)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Save configuration to file.
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the configuration file path.
    pub fn config_path() -> Result<PathBuf, Box<dyn std::error::Error>> {
        let dirs = directories::ProjectDirs::from("dev", "gauntlet", "gauntlet")
            .ok_or("Could not determine config directory")?;
        Ok(dirs.config_dir().join("config.yaml"))
    }

    /// `GAUNTLET_WORKSPACE_ROOT` and `GAUNTLET_ARTIFACT_ROOT` override the file.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(root) = var("GAUNTLET_WORKSPACE_ROOT").filter(|v| !v.is_empty()) {
            self.workspace_root = PathBuf::from(root);
        }
        if let Some(root) = var("GAUNTLET_ARTIFACT_ROOT").filter(|v| !v.is_empty()) {
            self.artifact_root = PathBuf::from(root);
        }
    }

    /// Set a configuration value.
    ///
    /// `runners.<label>` sets a slot count and `actions.<name>` an action command.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, String> {
            value
                .parse()
                .map_err(|_| format!("Invalid value for {}: {}", key, value))
        }

        match key {
            "workspace_root" => self.workspace_root = PathBuf::from(value),
            "artifact_root" => self.artifact_root = PathBuf::from(value),
            "default_slots" => self.default_slots = parse(key, value)?,
            "strict_labels" => self.strict_labels = parse(key, value)?,
            "poll_interval_secs" => self.poll_interval_secs = parse(key, value)?,
            "wait_timeout_minutes" => self.wait_timeout_minutes = parse(key, value)?,
            "default_job_timeout_minutes" => self.default_job_timeout_minutes = parse(key, value)?,
            "shell" => self.shell = value.to_string(),
            "keep_workspaces" => self.keep_workspaces = parse(key, value)?,
            "output_format" => {
                self.output_format = match value {
                    "table" => OutputFormat::Table,
                    "json" => OutputFormat::Json,
                    "yaml" => OutputFormat::Yaml,
                    _ => return Err(format!("Invalid output format: {}", value)),
                };
            }
            _ => {
                if let Some(label) = key.strip_prefix("runners.") {
                    self.runners.insert(label.to_string(), parse(key, value)?);
                } else if let Some(action) = key.strip_prefix("actions.") {
                    self.actions.insert(action.to_string(), value.to_string());
                } else {
                    return Err(format!("Unknown config key: {}", key));
                }
            }
        }
        Ok(())
    }

    /// Read a configuration value as text.
    pub fn get(&self, key: &str) -> Option<String> {
        let value = match key {
            "workspace_root" => self.workspace_root.display().to_string(),
            "artifact_root" => self.artifact_root.display().to_string(),
            "default_slots" => self.default_slots.to_string(),
            "strict_labels" => self.strict_labels.to_string(),
            "poll_interval_secs" => self.poll_interval_secs.to_string(),
            "wait_timeout_minutes" => self.wait_timeout_minutes.to_string(),
            "default_job_timeout_minutes" => self.default_job_timeout_minutes.to_string(),
            "shell" => self.shell.clone(),
            "keep_workspaces" => self.keep_workspaces.to_string(),
            "output_format" => format!("{:?}", self.output_format).to_lowercase(),
            _ => {
                if let Some(label) = key.strip_prefix("runners.") {
                    return self.runners.get(label).map(|slots| slots.to_string());
                }
                return self.actions.get(key.strip_prefix("actions.")?).cloned();
            }
        };
        Some(value)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            pool: PoolConfig {
                runners: self.runners.clone(),
                default_slots: self.default_slots,
                strict_labels: self.strict_labels,
            },
            wait_timeout: Duration::from_secs(self.wait_timeout_minutes * 60),
            poll_interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            default_job_timeout: (self.default_job_timeout_minutes > 0)
                .then(|| Duration::from_secs(self.default_job_timeout_minutes * 60)),
        }
    }

    pub fn executor_config(&self, source_dir: Option<PathBuf>) -> ExecutorConfig {
        ExecutorConfig {
            shell: self.shell.clone(),
            default_step_timeout: None,
            source_dir,
        }
    }
}
