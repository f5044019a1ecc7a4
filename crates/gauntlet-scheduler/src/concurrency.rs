//! Concurrency groups.
//!
//! A group key admits one holder at a time. Newcomers queue behind the
//! holder; with `cancel-in-progress` a newcomer cancels the holder and
//! everything queued before it, then takes over once the holder lets go.

use gauntlet_core::cancel::CancelHandle;
use gauntlet_core::ids::JobInstanceId;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, info};

type Groups = Arc<Mutex<HashMap<String, Group>>>;

#[derive(Default)]
struct Group {
    holder: Option<Member>,
    queue: VecDeque<Queued>,
}

struct Member {
    instance: JobInstanceId,
    label: String,
    cancel: CancelHandle,
}

struct Queued {
    member: Member,
    ready: oneshot::Sender<()>,
}

/// Registry of concurrency groups, shared by every run of an orchestrator.
#[derive(Clone, Default)]
pub struct ConcurrencyRegistry {
    groups: Groups,
}

impl ConcurrencyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join `group` and wait until this instance holds it.
    ///
    /// Returns `None` when the instance is cancelled first, either through
    /// its own handle or by a newer registration.
    pub async fn acquire(
        &self,
        group: &str,
        instance: JobInstanceId,
        label: &str,
        cancel_in_progress: bool,
        cancel: &CancelHandle,
    ) -> Option<ConcurrencyPermit> {
        let member = Member {
            instance,
            label: label.to_string(),
            cancel: cancel.clone(),
        };

        let ready = {
            let mut groups = lock(&self.groups);
            let entry = groups.entry(group.to_string()).or_default();

            if cancel_in_progress {
                if let Some(holder) = &entry.holder {
                    info!(group = %group, superseded = %holder.label, by = %label, "Cancelling in-progress instance");
                    holder.cancel.cancel();
                }
                for queued in entry.queue.drain(..) {
                    info!(group = %group, superseded = %queued.member.label, by = %label, "Cancelling queued instance");
                    queued.member.cancel.cancel();
                }
            }

            if entry.holder.is_none() {
                debug!(group = %group, instance = %label, "Acquired concurrency group");
                entry.holder = Some(member);
                return Some(self.permit(group, instance));
            }

            debug!(group = %group, instance = %label, "Queued behind concurrency group holder");
            let (tx, rx) = oneshot::channel();
            entry.queue.push_back(Queued { member, ready: tx });
            rx
        };

        let signal = cancel.signal();
        tokio::select! {
            handed_over = ready => match handed_over {
                Ok(()) => Some(self.permit(group, instance)),
                Err(_) => None,
            },
            _ = signal.cancelled() => {
                release(&self.groups, group, instance);
                None
            }
        }
    }

    /// Current holder of a group.
    pub fn holder(&self, group: &str) -> Option<JobInstanceId> {
        lock(&self.groups)
            .get(group)
            .and_then(|g| g.holder.as_ref().map(|h| h.instance))
    }

    fn permit(&self, group: &str, instance: JobInstanceId) -> ConcurrencyPermit {
        ConcurrencyPermit {
            groups: self.groups.clone(),
            group: group.to_string(),
            instance,
        }
    }
}

/// Membership of a group; released on drop.
pub struct ConcurrencyPermit {
    groups: Groups,
    group: String,
    instance: JobInstanceId,
}

impl ConcurrencyPermit {
    pub fn group(&self) -> &str {
        &self.group
    }
}

impl Drop for ConcurrencyPermit {
    fn drop(&mut self) {
        release(&self.groups, &self.group, self.instance);
    }
}

fn lock(groups: &Groups) -> MutexGuard<'_, HashMap<String, Group>> {
    groups.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drop `instance` from the group, handing the group to the next live waiter
/// if it was the holder.
fn release(groups: &Groups, group: &str, instance: JobInstanceId) {
    let mut groups = lock(groups);
    let Some(entry) = groups.get_mut(group) else {
        return;
    };

    entry.queue.retain(|q| q.member.instance != instance);

    if entry.holder.as_ref().is_some_and(|h| h.instance == instance) {
        entry.holder = None;
        while let Some(next) = entry.queue.pop_front() {
            if next.ready.send(()).is_ok() {
                debug!(group = %group, instance = %next.member.label, "Concurrency group handed over");
                entry.holder = Some(next.member);
                break;
            }
        }
    }

    if entry.holder.is_none() && entry.queue.is_empty() {
        groups.remove(group);
    }
}
