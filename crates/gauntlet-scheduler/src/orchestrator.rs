//! Run orchestration.
//!
//! Each job instance runs as its own task: wait on upstream instances
//! holding nothing, join its concurrency group, take a `max-parallel` permit
//! and a runner slot, then hand off to the executor under the job timeout.

use crate::aggregator::ResultAggregator;
use crate::concurrency::{ConcurrencyPermit, ConcurrencyRegistry};
use crate::plan::{Planner, RunPlan};
use crate::pool::{PoolConfig, RunnerPool};
use crate::waiter::{CrossJobWaiter, StatusBoard, Upstream, WaitOutcome, WaitSpec};
use chrono::Utc;
use futures::FutureExt;
use gauntlet_core::Result;
use gauntlet_core::cancel::CancelHandle;
use gauntlet_core::event::TriggerEvent;
use gauntlet_core::events::{
    Event, JobCancelledPayload, JobCompletedPayload, JobQueuedPayload, JobStartedPayload,
    RunCompletedPayload, RunStartedPayload,
};
use gauntlet_core::ids::{JobInstanceId, RunId};
use gauntlet_core::ports::{ArtifactStore, EventBus, InstanceExecutor};
use gauntlet_core::run::{FailureReason, JobInstance, JobOutcome, JobStatus, RunReport, RunStatus};
use gauntlet_core::workflow::WorkflowDefinition;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub pool: PoolConfig,
    /// Used when a `wait` block does not set `timeout-minutes`.
    pub wait_timeout: Duration,
    /// Used when a `wait` block does not set `poll-interval-seconds`.
    pub poll_interval: Duration,
    /// Used when a job does not set `timeout-minutes`.
    pub default_job_timeout: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            wait_timeout: Duration::from_secs(60 * 60),
            poll_interval: Duration::from_secs(10),
            default_job_timeout: Some(Duration::from_secs(360 * 60)),
        }
    }
}

/// Long-lived orchestrator. Runs share the concurrency registry, runner
/// pool and event bus.
pub struct Orchestrator {
    config: OrchestratorConfig,
    planner: Planner,
    executor: Arc<dyn InstanceExecutor>,
    artifacts: Arc<dyn ArtifactStore>,
    event_bus: Arc<dyn EventBus>,
    concurrency: ConcurrencyRegistry,
    pool: Arc<RunnerPool>,
    active_runs: Mutex<HashMap<RunId, CancelHandle>>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        executor: Arc<dyn InstanceExecutor>,
        artifacts: Arc<dyn ArtifactStore>,
        event_bus: Arc<dyn EventBus>,
    ) -> Self {
        let pool = Arc::new(RunnerPool::new(config.pool.clone()));
        Self {
            config,
            planner: Planner::new(),
            executor,
            artifacts,
            event_bus,
            concurrency: ConcurrencyRegistry::new(),
            pool,
            active_runs: Mutex::new(HashMap::new()),
        }
    }

    pub fn plan(&self, workflow: &WorkflowDefinition, event: &TriggerEvent) -> Result<RunPlan> {
        self.planner.plan(workflow, event)
    }

    /// Run the workflow if its `on:` block accepts the event.
    pub async fn handle_event(
        &self,
        workflow: &WorkflowDefinition,
        event: TriggerEvent,
    ) -> Result<Option<RunReport>> {
        if !self.planner.triggers(workflow, &event) {
            debug!(workflow = %workflow.name, action = event.action.as_str(), "Event does not trigger workflow");
            return Ok(None);
        }
        self.run(workflow, event).await.map(Some)
    }

    /// Plan and execute a run regardless of the workflow's triggers.
    pub async fn run(&self, workflow: &WorkflowDefinition, event: TriggerEvent) -> Result<RunReport> {
        let plan = self.plan(workflow, &event)?;
        self.execute(plan).await
    }

    /// Cancel an in-flight run. Returns false if the run is not active.
    pub fn cancel_run(&self, run_id: RunId) -> bool {
        let active = self.active_runs.lock().unwrap_or_else(PoisonError::into_inner);
        match active.get(&run_id) {
            Some(handle) => {
                info!(run_id = %run_id, "Cancelling run");
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Execute a planned run to completion.
    pub async fn execute(&self, plan: RunPlan) -> Result<RunReport> {
        let run_id = plan.run_id;
        let started_at = Utc::now();
        let run_cancel = CancelHandle::new();
        self.active_runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(run_id, run_cancel.clone());

        info!(
            run_id = %run_id,
            workflow = %plan.workflow.name,
            instances = plan.instances.len(),
            skipped = plan.skipped.len(),
            "Starting run"
        );
        self.publish(Event::RunStarted(RunStartedPayload {
            run_id,
            workflow: plan.workflow.name.clone(),
            head_sha: plan.event.head_sha.clone(),
            instances: plan.instances.len() as u32,
            skipped: plan.skipped.clone(),
            started_at,
        }))
        .await;

        let mut aggregator = ResultAggregator::new(&plan.instances);

        // Run-level members reuse the run's uuid.
        let run_permit = match &plan.concurrency_group {
            Some(group) => {
                let member = JobInstanceId::from_uuid(*run_id.as_uuid());
                let label = format!("{} {}", plan.workflow.name, run_id);
                self.concurrency
                    .acquire(group, member, &label, plan.cancel_in_progress, &run_cancel)
                    .await
            }
            None => None,
        };

        if plan.concurrency_group.is_some() && run_permit.is_none() {
            info!(run_id = %run_id, "Run superseded before it started");
            for instance in &plan.instances {
                aggregator.record(JobOutcome::not_started(instance, JobStatus::Cancelled, None));
            }
        } else {
            self.run_instances(&plan, &run_cancel, &mut aggregator).await;
        }
        drop(run_permit);

        for artifact in aggregator.discarded_artifacts() {
            debug!(run_id = %run_id, artifact = %artifact.name, "Discarding artifact");
            if let Err(e) = self.artifacts.delete(run_id, &artifact.name).await {
                warn!(run_id = %run_id, artifact = %artifact.name, error = %e, "Failed to delete artifact");
            }
        }

        self.active_runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&run_id);

        let completed_at = Utc::now();
        let jobs = aggregator.outcomes();
        let status = aggregator.status();
        let count = |s: JobStatus| jobs.iter().filter(|j| j.status == s).count() as u32;
        let duration_ms = (completed_at - started_at).num_milliseconds().max(0) as u64;

        self.publish(Event::RunCompleted(RunCompletedPayload {
            run_id,
            workflow: plan.workflow.name.clone(),
            status,
            duration_ms,
            jobs_succeeded: count(JobStatus::Succeeded),
            jobs_failed: count(JobStatus::Failed),
            jobs_cancelled: count(JobStatus::Cancelled),
            completed_at,
        }))
        .await;

        match status {
            RunStatus::Succeeded => info!(run_id = %run_id, duration_ms, "Run succeeded"),
            _ => warn!(run_id = %run_id, status = %status, duration_ms, "Run did not succeed"),
        }

        Ok(RunReport {
            run_id,
            workflow: plan.workflow.name.clone(),
            event: plan.event.clone(),
            status,
            artifacts: aggregator.retained_artifacts(),
            axis_summaries: aggregator.axis_summaries(),
            jobs,
            skipped: plan.skipped.clone(),
            started_at,
            completed_at,
            duration_ms,
        })
    }

    async fn run_instances(
        &self,
        plan: &RunPlan,
        run_cancel: &CancelHandle,
        aggregator: &mut ResultAggregator,
    ) {
        let board = Arc::new(StatusBoard::new());
        for instance in &plan.instances {
            board.register(instance.id).await;
        }

        let handles: HashMap<JobInstanceId, CancelHandle> = plan
            .instances
            .iter()
            .map(|i| (i.id, CancelHandle::new()))
            .collect();

        let forward = {
            let signal = run_cancel.signal();
            let handles: Vec<CancelHandle> = handles.values().cloned().collect();
            tokio::spawn(async move {
                signal.cancelled().await;
                for handle in handles {
                    handle.cancel();
                }
            })
        };

        let limits: HashMap<&str, Arc<Semaphore>> = plan
            .workflow
            .jobs
            .iter()
            .filter_map(|(name, job)| {
                job.max_parallel()
                    .map(|n| (name.as_str(), Arc::new(Semaphore::new(n.max(1) as usize))))
            })
            .collect();

        let mut tasks = JoinSet::new();
        for instance in &plan.instances {
            let task = InstanceTask {
                instance: instance.clone(),
                event: plan.event.clone(),
                wait: self.wait_spec(plan, instance),
                timeout: instance
                    .timeout_minutes
                    .map(|m| Duration::from_secs(u64::from(m) * 60))
                    .or(self.config.default_job_timeout),
                cancel: handles[&instance.id].clone(),
                max_parallel: limits.get(instance.job.as_str()).cloned(),
                board: board.clone(),
                concurrency: self.concurrency.clone(),
                pool: self.pool.clone(),
                executor: self.executor.clone(),
                event_bus: self.event_bus.clone(),
            };
            tasks.spawn(task.run_guarded());
        }

        let mut fail_fast_cancelled: HashSet<JobInstanceId> = HashSet::new();
        while let Some(joined) = tasks.join_next().await {
            let mut outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(run_id = %plan.run_id, error = %e, "Job task aborted");
                    continue;
                }
            };

            if outcome.status == JobStatus::Cancelled
                && fail_fast_cancelled.contains(&outcome.instance_id)
            {
                outcome.failure = Some(FailureReason::FailFast);
            }

            let fail_fast = plan
                .workflow
                .jobs
                .get(&outcome.job)
                .is_some_and(|job| job.fail_fast());
            if fail_fast && outcome.status == JobStatus::Failed {
                for sibling in plan.instances_of(&outcome.job) {
                    if sibling.id == outcome.instance_id
                        || aggregator.outcome(sibling.id).is_some()
                    {
                        continue;
                    }
                    info!(
                        run_id = %plan.run_id,
                        failed = %outcome.display_name,
                        cancelling = %sibling.display_name,
                        "Fail-fast cancelling sibling"
                    );
                    fail_fast_cancelled.insert(sibling.id);
                    handles[&sibling.id].cancel();
                }
            }

            aggregator.record(outcome);
        }

        forward.abort();
    }

    fn wait_spec(&self, plan: &RunPlan, instance: &JobInstance) -> WaitSpec {
        let wait = instance.definition.wait.as_ref();
        WaitSpec {
            upstream: plan
                .dag
                .upstream(instance.id)
                .into_iter()
                .map(|(node, edge)| Upstream {
                    id: node.instance_id,
                    display_name: node.display_name.clone(),
                    ignore_failure: edge.ignore_failure,
                })
                .collect(),
            timeout: wait
                .and_then(|w| w.timeout_minutes)
                .map(|m| Duration::from_secs(u64::from(m) * 60))
                .unwrap_or(self.config.wait_timeout),
            poll_interval: wait
                .and_then(|w| w.poll_interval_seconds)
                .map(Duration::from_secs)
                .unwrap_or(self.config.poll_interval),
        }
    }

    async fn publish(&self, event: Event) {
        if let Err(e) = self.event_bus.publish(event).await {
            warn!(error = %e, "Failed to publish event");
        }
    }
}

/// Everything one job-instance task owns.
struct InstanceTask {
    instance: JobInstance,
    event: TriggerEvent,
    wait: WaitSpec,
    timeout: Option<Duration>,
    cancel: CancelHandle,
    max_parallel: Option<Arc<Semaphore>>,
    board: Arc<StatusBoard>,
    concurrency: ConcurrencyRegistry,
    pool: Arc<RunnerPool>,
    executor: Arc<dyn InstanceExecutor>,
    event_bus: Arc<dyn EventBus>,
}

impl InstanceTask {
    /// Run the instance, turning a panic into a Failed outcome so waiters
    /// downstream are released.
    async fn run_guarded(self) -> JobOutcome {
        let board = self.board.clone();
        let fallback = JobOutcome::not_started(
            &self.instance,
            JobStatus::Failed,
            Some(FailureReason::Provisioning {
                message: "job task panicked".to_string(),
            }),
        );

        match AssertUnwindSafe(self.run()).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(instance = %fallback.display_name, "Job task panicked");
                if let Err(e) = board.set(fallback.instance_id, JobStatus::Failed).await {
                    warn!(error = %e, "Could not record panicked instance");
                }
                fallback
            }
        }
    }

    async fn run(self) -> JobOutcome {
        let outcome = self.drive().await;
        let inst = &self.instance;

        if let Err(e) = self.board.set(inst.id, outcome.status).await {
            warn!(instance = %inst.display_name, error = %e, "Rejected status update");
        }

        let event = match outcome.status {
            JobStatus::Cancelled => {
                info!(run_id = %inst.run_id, instance = %inst.display_name, "Job cancelled");
                Event::JobCancelled(JobCancelledPayload {
                    run_id: inst.run_id,
                    instance_id: inst.id,
                    job: inst.job.clone(),
                    display_name: inst.display_name.clone(),
                    group: inst.concurrency_group.clone(),
                    cancelled_at: outcome.completed_at,
                })
            }
            status => {
                match &outcome.failure {
                    Some(reason) => warn!(
                        run_id = %inst.run_id,
                        instance = %inst.display_name,
                        best_effort = inst.best_effort,
                        reason = %reason,
                        "Job failed"
                    ),
                    None => info!(run_id = %inst.run_id, instance = %inst.display_name, status = %status, "Job completed"),
                }
                Event::JobCompleted(JobCompletedPayload {
                    run_id: inst.run_id,
                    instance_id: inst.id,
                    job: inst.job.clone(),
                    display_name: inst.display_name.clone(),
                    status,
                    failure: outcome.failure.clone(),
                    completed_at: outcome.completed_at,
                })
            }
        };
        self.publish(event).await;

        outcome
    }

    async fn drive(&self) -> JobOutcome {
        let inst = &self.instance;
        let signal = self.cancel.signal();

        self.publish(Event::JobQueued(JobQueuedPayload {
            run_id: inst.run_id,
            instance_id: inst.id,
            job: inst.job.clone(),
            display_name: inst.display_name.clone(),
            runs_on: inst.runs_on.clone(),
            queued_at: Utc::now(),
        }))
        .await;

        match CrossJobWaiter::new(&self.board).wait(&self.wait, &signal).await {
            WaitOutcome::Ready => {}
            WaitOutcome::UpstreamFailed { upstream } => {
                return self.failed(FailureReason::UpstreamFailed { job: upstream });
            }
            WaitOutcome::TimedOut => return self.failed(FailureReason::WaitTimeout),
            WaitOutcome::Cancelled => return self.cancelled(),
        }

        let _group: Option<ConcurrencyPermit> = match &inst.concurrency_group {
            Some(group) => {
                let permit = self
                    .concurrency
                    .acquire(group, inst.id, &inst.display_name, inst.cancel_in_progress, &self.cancel)
                    .await;
                match permit {
                    Some(permit) => Some(permit),
                    None => return self.cancelled(),
                }
            }
            None => None,
        };

        let _parallel = match &self.max_parallel {
            Some(semaphore) => tokio::select! {
                permit = semaphore.clone().acquire_owned() => permit.ok(),
                _ = signal.cancelled() => return self.cancelled(),
            },
            None => None,
        };

        let _slot = tokio::select! {
            slot = self.pool.acquire(&inst.runs_on) => match slot {
                Ok(slot) => slot,
                Err(e) => {
                    return self.failed(FailureReason::Provisioning { message: e.to_string() });
                }
            },
            _ = signal.cancelled() => return self.cancelled(),
        };

        if signal.is_cancelled() {
            return self.cancelled();
        }

        if let Err(e) = self.board.set(inst.id, JobStatus::Running).await {
            warn!(instance = %inst.display_name, error = %e, "Rejected status update");
        }
        self.publish(Event::JobStarted(JobStartedPayload {
            run_id: inst.run_id,
            instance_id: inst.id,
            job: inst.job.clone(),
            display_name: inst.display_name.clone(),
            started_at: Utc::now(),
        }))
        .await;
        info!(run_id = %inst.run_id, instance = %inst.display_name, runs_on = %inst.runs_on, "Job started");

        let execution = self.executor.execute(inst, &self.event, signal.clone());
        let Some(limit) = self.timeout else {
            return execution.await;
        };

        tokio::pin!(execution);
        tokio::select! {
            outcome = &mut execution => outcome,
            _ = tokio::time::sleep(limit) => {
                warn!(instance = %inst.display_name, timeout_secs = limit.as_secs(), "Job timed out");
                self.cancel.cancel();
                let mut outcome = execution.await;
                outcome.status = JobStatus::Failed;
                outcome.failure = Some(FailureReason::JobTimeout);
                outcome
            }
        }
    }

    fn cancelled(&self) -> JobOutcome {
        JobOutcome::not_started(&self.instance, JobStatus::Cancelled, None)
    }

    fn failed(&self, reason: FailureReason) -> JobOutcome {
        JobOutcome::not_started(&self.instance, JobStatus::Failed, Some(reason))
    }

    async fn publish(&self, event: Event) {
        if let Err(e) = self.event_bus.publish(event).await {
            warn!(error = %e, "Failed to publish event");
        }
    }
}
