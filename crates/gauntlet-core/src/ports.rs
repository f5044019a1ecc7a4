//! Port traits.
//!
//! These traits define the interfaces between the orchestration core and
//! the adapters that move events and artifact bytes around.

use crate::artifact::StoredArtifact;
use crate::cancel::CancelSignal;
use crate::event::TriggerEvent;
use crate::events::Event;
use crate::ids::RunId;
use crate::run::{JobInstance, JobOutcome};
use crate::Result;
use async_trait::async_trait;
use futures::Stream;
use std::path::Path;
use std::pin::Pin;

/// Stream of events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Event>> + Send>>;

/// Event bus for publishing and subscribing to events.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event.
    async fn publish(&self, event: Event) -> Result<()>;

    /// Subscribe to events matching a pattern.
    /// Pattern supports wildcards: `run.*.started`, `run.>`
    async fn subscribe(&self, pattern: &str) -> Result<EventStream>;
}

/// Run-scoped storage for artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Copy the file or directory at `source` into the store under `name`.
    async fn put(&self, run_id: RunId, name: &str, source: &Path) -> Result<StoredArtifact>;

    /// Copy a stored artifact to `dest`.
    async fn get(&self, run_id: RunId, name: &str, dest: &Path) -> Result<()>;

    /// Remove an artifact. Removing a missing artifact is not an error.
    async fn delete(&self, run_id: RunId, name: &str) -> Result<()>;

    /// Names of the artifacts stored for a run.
    async fn list(&self, run_id: RunId) -> Result<Vec<String>>;
}

/// Runs one job instance's steps to completion.
///
/// Failures are reported in the returned outcome rather than as errors.
#[async_trait]
pub trait InstanceExecutor: Send + Sync {
    async fn execute(
        &self,
        instance: &JobInstance,
        event: &TriggerEvent,
        cancel: CancelSignal,
    ) -> JobOutcome;
}
