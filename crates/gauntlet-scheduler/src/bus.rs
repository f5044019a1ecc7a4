//! In-process event bus on a tokio broadcast channel.

use async_trait::async_trait;
use futures::stream;
use gauntlet_core::events::Event;
use gauntlet_core::ports::{EventBus, EventStream};
use gauntlet_core::{Error, Result};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{trace, warn};

const DEFAULT_CAPACITY: usize = 1024;

/// Event bus for a single process. Slow subscribers lose the oldest events.
#[derive(Clone)]
pub struct MemoryEventBus {
    sender: broadcast::Sender<Event>,
}

impl MemoryEventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(&self, event: Event) -> Result<()> {
        trace!(subject = %event.subject(), "Publishing event");
        // No subscribers is not an error.
        let _ = self.sender.send(event);
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<EventStream> {
        if pattern.is_empty() {
            return Err(Error::EventBus("empty subscription pattern".into()));
        }
        let receiver = self.sender.subscribe();
        let pattern = pattern.to_string();

        let events = stream::unfold((receiver, pattern), |(mut receiver, pattern)| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) if subject_matches(&pattern, &event.subject()) => {
                        return Some((Ok(event), (receiver, pattern)));
                    }
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(pattern = %pattern, skipped, "Event subscriber lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });

        Ok(Box::pin(events))
    }
}

/// Dotted subject matching: `*` matches one token, a trailing `>` matches
/// one or more remaining tokens.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut subject_tokens = subject.split('.');
    let mut pattern_tokens = pattern.split('.').peekable();

    while let Some(p) = pattern_tokens.next() {
        if p == ">" && pattern_tokens.peek().is_none() {
            return subject_tokens.next().is_some();
        }
        match subject_tokens.next() {
            Some(s) if p == "*" || p == s => {}
            _ => return false,
        }
    }
    subject_tokens.next().is_none()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use futures::StreamExt;
    use gauntlet_core::events::RunStartedPayload;
    use gauntlet_core::ids::RunId;

    #[test]
    fn test_subject_matches() {
        assert!(subject_matches("run.>", "run.run_1.job.lint.started"));
        assert!(subject_matches("run.*.started", "run.run_1.started"));
        assert!(!subject_matches("run.*.started", "run.run_1.job.lint.started"));
        assert!(!subject_matches("run.>", "run"));
        assert!(subject_matches("run.run_1.completed", "run.run_1.completed"));
    }

    #[tokio::test]
    async fn test_subscribe_receives_matching_events() {
        let bus = MemoryEventBus::new();
        let mut stream = bus.subscribe("run.*.started").await.unwrap();

        let run_id = RunId::new();
        bus.publish(Event::RunStarted(RunStartedPayload {
            run_id,
            workflow: "ci".to_string(),
            head_sha: None,
            instances: 3,
            skipped: vec![],
            started_at: Utc::now(),
        }))
        .await
        .unwrap();

        let received = stream.next().await.unwrap().unwrap();
        assert_eq!(received.run_id(), run_id);
    }
}
