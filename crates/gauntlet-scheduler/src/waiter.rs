//! Shared status board and the cross-job waiter.

use gauntlet_core::cancel::CancelSignal;
use gauntlet_core::ids::JobInstanceId;
use gauntlet_core::run::JobStatus;
use gauntlet_core::Result;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use tokio::time::Instant;
use tracing::debug;

/// Current status of every instance in a run.
///
/// Every accepted transition bumps a version on a watch channel so waiters
/// wake without polling.
#[derive(Debug)]
pub struct StatusBoard {
    statuses: RwLock<HashMap<JobInstanceId, JobStatus>>,
    version: watch::Sender<u64>,
}

impl StatusBoard {
    pub fn new() -> Self {
        let (version, _rx) = watch::channel(0);
        Self {
            statuses: RwLock::new(HashMap::new()),
            version,
        }
    }

    /// Register an instance as Pending.
    pub async fn register(&self, id: JobInstanceId) {
        self.statuses.write().await.insert(id, JobStatus::Pending);
    }

    /// Move an instance to a new status, rejecting illegal transitions.
    pub async fn set(&self, id: JobInstanceId, to: JobStatus) -> Result<()> {
        {
            let mut statuses = self.statuses.write().await;
            let from = statuses.get(&id).copied().unwrap_or(JobStatus::Pending);
            let next = from.transition(to, &id.to_string())?;
            statuses.insert(id, next);
        }
        self.version.send_modify(|v| *v += 1);
        Ok(())
    }

    pub async fn get(&self, id: JobInstanceId) -> Option<JobStatus> {
        self.statuses.read().await.get(&id).copied()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

/// One instance the waiter must see terminal.
#[derive(Debug, Clone)]
pub struct Upstream {
    pub id: JobInstanceId,
    pub display_name: String,
    pub ignore_failure: bool,
}

#[derive(Debug, Clone)]
pub struct WaitSpec {
    pub upstream: Vec<Upstream>,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Every upstream instance is terminal and acceptable.
    Ready,
    /// An upstream instance failed or was cancelled and failures are not ignored.
    UpstreamFailed { upstream: String },
    TimedOut,
    Cancelled,
}

/// Suspends an instance until its upstream instances are terminal.
pub struct CrossJobWaiter<'a> {
    board: &'a StatusBoard,
}

impl<'a> CrossJobWaiter<'a> {
    pub fn new(board: &'a StatusBoard) -> Self {
        Self { board }
    }

    /// Wait on the board's change notifications, re-checking at least every
    /// poll interval, until the outcome is decided or the timeout elapses.
    pub async fn wait(&self, spec: &WaitSpec, cancel: &CancelSignal) -> WaitOutcome {
        if spec.upstream.is_empty() {
            return WaitOutcome::Ready;
        }

        let deadline = Instant::now() + spec.timeout;
        let mut changes = self.board.subscribe();

        loop {
            if let Some(outcome) = self.check(spec).await {
                return outcome;
            }

            tokio::select! {
                _ = cancel.cancelled() => return WaitOutcome::Cancelled,
                _ = tokio::time::sleep_until(deadline) => {
                    return self.check(spec).await.unwrap_or(WaitOutcome::TimedOut);
                }
                changed = changes.changed() => {
                    if changed.is_err() {
                        tokio::time::sleep(spec.poll_interval).await;
                    }
                }
                _ = tokio::time::sleep(spec.poll_interval) => {
                    debug!(upstream = spec.upstream.len(), "Re-checking upstream status");
                }
            }
        }
    }

    async fn check(&self, spec: &WaitSpec) -> Option<WaitOutcome> {
        let mut outstanding = false;
        for upstream in &spec.upstream {
            match self.board.get(upstream.id).await {
                Some(JobStatus::Failed | JobStatus::Cancelled) if !upstream.ignore_failure => {
                    return Some(WaitOutcome::UpstreamFailed {
                        upstream: upstream.display_name.clone(),
                    });
                }
                Some(status) if status.is_terminal() => {}
                _ => outstanding = true,
            }
        }
        if outstanding {
            None
        } else {
            Some(WaitOutcome::Ready)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gauntlet_core::cancel::CancelHandle;
    use std::sync::Arc;

    fn spec(ids: &[JobInstanceId], ignore_failure: bool) -> WaitSpec {
        WaitSpec {
            upstream: ids
                .iter()
                .enumerate()
                .map(|(i, id)| Upstream {
                    id: *id,
                    display_name: format!("build-image ({})", i),
                    ignore_failure,
                })
                .collect(),
            timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
        }
    }

    async fn board_with(n: usize) -> (Arc<StatusBoard>, Vec<JobInstanceId>) {
        let board = Arc::new(StatusBoard::new());
        let mut ids = Vec::new();
        for _ in 0..n {
            let id = JobInstanceId::new();
            board.register(id).await;
            ids.push(id);
        }
        (board, ids)
    }

    #[tokio::test]
    async fn test_ready_only_after_all_terminal() {
        let (board, ids) = board_with(4).await;
        let wait_spec = spec(&ids, false);

        let waiter_board = board.clone();
        let handle = tokio::spawn(async move {
            CrossJobWaiter::new(&waiter_board)
                .wait(&wait_spec, &CancelSignal::never())
                .await
        });

        for id in &ids[..3] {
            board.set(*id, JobStatus::Running).await.unwrap();
            board.set(*id, JobStatus::Succeeded).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        board.set(ids[3], JobStatus::Running).await.unwrap();
        board.set(ids[3], JobStatus::Succeeded).await.unwrap();
        assert_eq!(handle.await.unwrap(), WaitOutcome::Ready);
    }

    #[tokio::test]
    async fn test_upstream_failure_fails_waiter() {
        let (board, ids) = board_with(2).await;
        board.set(ids[0], JobStatus::Running).await.unwrap();
        board.set(ids[0], JobStatus::Failed).await.unwrap();

        let outcome = CrossJobWaiter::new(&board)
            .wait(&spec(&ids, false), &CancelSignal::never())
            .await;
        assert!(matches!(outcome, WaitOutcome::UpstreamFailed { .. }));
    }

    #[tokio::test]
    async fn test_ignore_upstream_failure() {
        let (board, ids) = board_with(2).await;
        board.set(ids[0], JobStatus::Cancelled).await.unwrap();
        board.set(ids[1], JobStatus::Running).await.unwrap();
        board.set(ids[1], JobStatus::Succeeded).await.unwrap();

        let outcome = CrossJobWaiter::new(&board)
            .wait(&spec(&ids, true), &CancelSignal::never())
            .await;
        assert_eq!(outcome, WaitOutcome::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_fatal() {
        let (board, ids) = board_with(1).await;
        let outcome = CrossJobWaiter::new(&board)
            .wait(&spec(&ids, false), &CancelSignal::never())
            .await;
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_wait() {
        let (board, ids) = board_with(1).await;
        let cancel = CancelHandle::new();
        cancel.cancel();
        let outcome = CrossJobWaiter::new(&board)
            .wait(&spec(&ids, false), &cancel.signal())
            .await;
        assert_eq!(outcome, WaitOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_illegal_transition_rejected() {
        let (board, ids) = board_with(1).await;
        tokio_test::assert_err!(board.set(ids[0], JobStatus::Succeeded).await);
    }
}
