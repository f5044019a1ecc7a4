//! Scripted step runner for orchestration tests.

use async_trait::async_trait;
use futures::StreamExt;
use gauntlet_core::Result;
use gauntlet_core::events::{Event, LogStream};
use gauntlet_core::ports::EventStream;
use gauntlet_runner::runner::{KILLED_EXIT_CODE, OutputLine, StepContext, StepResult, StepRunner};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Canned behaviour for a command.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub exit_code: i32,
    pub delay: Duration,
    /// Files written into the working directory before exiting.
    pub creates: Vec<(String, String)>,
    pub stdout: Vec<String>,
}

impl Script {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn fail(exit_code: i32) -> Self {
        Self {
            exit_code,
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn creating(mut self, path: &str, content: &str) -> Self {
        self.creates.push((path.to_string(), content.to_string()));
        self
    }

    pub fn printing(mut self, line: &str) -> Self {
        self.stdout.push(line.to_string());
        self
    }
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One recorded step execution.
#[derive(Debug, Clone)]
pub struct Execution {
    pub step: String,
    pub command: String,
    pub env: IndexMap<String, String>,
    pub started: Instant,
    pub finished: Instant,
    pub result: StepResult,
}

/// A [`StepRunner`] that never spawns processes.
///
/// Commands are matched exactly first, then by the longest registered
/// prefix. Unmatched commands succeed immediately.
#[derive(Default)]
pub struct ScriptedRunner {
    scripts: Mutex<HashMap<String, Script>>,
    executions: Mutex<Vec<Execution>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, command: &str, script: Script) -> &Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(command.to_string(), script);
        self
    }

    fn lookup(&self, command: &str) -> Script {
        let scripts = self.scripts.lock().unwrap();
        let command = command.trim();
        if let Some(script) = scripts.get(command) {
            return script.clone();
        }
        scripts
            .iter()
            .filter(|(key, _)| command.starts_with(key.as_str()))
            .max_by_key(|(key, _)| key.len())
            .map(|(_, script)| script.clone())
            .unwrap_or_default()
    }

    pub fn executions(&self) -> Vec<Execution> {
        self.executions.lock().unwrap().clone()
    }

    /// Executions whose command starts with `prefix`.
    pub fn executions_of(&self, prefix: &str) -> Vec<Execution> {
        self.executions()
            .into_iter()
            .filter(|e| e.command.starts_with(prefix))
            .collect()
    }

    pub fn commands(&self) -> Vec<String> {
        self.executions().into_iter().map(|e| e.command).collect()
    }

    /// Most steps observed running at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StepRunner for ScriptedRunner {
    async fn execute(
        &self,
        ctx: &StepContext,
        output_tx: mpsc::Sender<OutputLine>,
    ) -> Result<StepResult> {
        let started = Instant::now();
        let script = self.lookup(&ctx.command);

        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_running, Ordering::SeqCst);
        let _running = RunningGuard(&self.running);

        for (number, line) in script.stdout.iter().enumerate() {
            let _ = output_tx
                .send(OutputLine {
                    stream: LogStream::Stdout,
                    content: line.clone(),
                    line_number: number as u32 + 1,
                    timestamp: chrono::Utc::now(),
                })
                .await;
        }

        let (wait, times_out) = match ctx.timeout {
            Some(limit) if limit <= script.delay => (limit, true),
            _ => (script.delay, false),
        };
        let result = tokio::select! {
            _ = tokio::time::sleep(wait) => times_out.then_some((true, false)),
            _ = ctx.cancel.cancelled() => Some((false, true)),
        };

        let elapsed = started.elapsed().as_millis() as u64;
        let result = match result {
            None => {
                for (path, content) in &script.creates {
                    let target = ctx.working_dir.join(path);
                    if let Some(parent) = target.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    tokio::fs::write(&target, content).await?;
                }
                StepResult::exited(script.exit_code, elapsed)
            }
            Some((timed_out, cancelled)) => StepResult {
                exit_code: KILLED_EXIT_CODE,
                success: false,
                duration_ms: elapsed,
                timed_out,
                cancelled,
            },
        };

        self.executions.lock().unwrap().push(Execution {
            step: ctx.name.clone(),
            command: ctx.command.clone(),
            env: ctx.env.clone(),
            started,
            finished: Instant::now(),
            result: result.clone(),
        });

        Ok(result)
    }
}

/// Wait for a condition with timeout.
pub async fn wait_for<F, Fut>(timeout: Duration, interval: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

/// Next event from a subscription, failing if none arrives in time.
pub async fn next_event(events: &mut EventStream, timeout: Duration) -> anyhow::Result<Event> {
    let event = tokio::time::timeout(timeout, events.next())
        .await
        .map_err(|_| anyhow::anyhow!("no event within {:?}", timeout))?
        .ok_or_else(|| anyhow::anyhow!("event stream closed"))??;
    Ok(event)
}
