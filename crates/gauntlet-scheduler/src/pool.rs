//! Runner pool: a fixed number of slots per runner label.

use gauntlet_core::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Slots per label.
    #[serde(default)]
    pub runners: IndexMap<String, usize>,
    /// Slots for labels not listed in `runners`.
    #[serde(default = "default_slots")]
    pub default_slots: usize,
    /// Reject labels not listed in `runners`.
    #[serde(default)]
    pub strict_labels: bool,
}

fn default_slots() -> usize {
    4
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            runners: IndexMap::new(),
            default_slots: default_slots(),
            strict_labels: false,
        }
    }
}

pub struct RunnerPool {
    config: PoolConfig,
    slots: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl RunnerPool {
    pub fn new(config: PoolConfig) -> Self {
        let slots = config
            .runners
            .iter()
            .map(|(label, n)| (label.clone(), Arc::new(Semaphore::new((*n).max(1)))))
            .collect();
        Self {
            config,
            slots: Mutex::new(slots),
        }
    }

    /// Wait for a free slot on `label`.
    pub async fn acquire(&self, label: &str) -> Result<OwnedSemaphorePermit> {
        let semaphore = self.semaphore(label)?;
        debug!(label = %label, available = semaphore.available_permits(), "Acquiring runner slot");
        semaphore
            .acquire_owned()
            .await
            .map_err(|e| Error::Internal(format!("runner pool closed: {}", e)))
    }

    /// Free slots on `label`, if the label is known.
    pub fn available(&self, label: &str) -> Option<usize> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(label)
            .map(|s| s.available_permits())
    }

    fn semaphore(&self, label: &str) -> Result<Arc<Semaphore>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sem) = slots.get(label) {
            return Ok(sem.clone());
        }
        if self.config.strict_labels {
            return Err(Error::Provisioning(format!(
                "no runner provides label `{}`",
                label
            )));
        }
        let sem = Arc::new(Semaphore::new(self.config.default_slots.max(1)));
        slots.insert(label.to_string(), sem.clone());
        Ok(sem)
    }
}
