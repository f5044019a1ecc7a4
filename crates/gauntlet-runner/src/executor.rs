//! Job instance execution: provisions a workspace and runs steps in order.

use crate::actions::{self, ActionRegistry};
use crate::environments::{Environment, EnvironmentFactory};
use crate::runner::{
    KILLED_EXIT_CODE, OutputLine, StepContext, StepResult, StepRunner, UNRESOLVED_ACTION_EXIT_CODE,
};
use async_trait::async_trait;
use chrono::Utc;
use gauntlet_core::artifact::Artifact;
use gauntlet_core::cancel::CancelSignal;
use gauntlet_core::condition::Condition;
use gauntlet_core::event::TriggerEvent;
use gauntlet_core::events::{Event, StepCompletedPayload, StepOutputPayload};
use gauntlet_core::ids::ArtifactId;
use gauntlet_core::interpolation::InterpolationContext;
use gauntlet_core::ports::{ArtifactStore, EventBus, InstanceExecutor};
use gauntlet_core::run::{FailureReason, JobInstance, JobOutcome, JobStatus, StepOutcome, StepStatus};
use gauntlet_core::workflow::{StepDefinition, UploadWhen};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const OUTPUT_BUFFER: usize = 256;

/// Settings shared by every instance an executor runs.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Shell used when a step does not name one.
    pub shell: String,
    /// Timeout for steps without `timeout-minutes`.
    pub default_step_timeout: Option<Duration>,
    /// Checkout the workflow was loaded from, exported as
    /// `GAUNTLET_SOURCE_DIR`.
    pub source_dir: Option<PathBuf>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            shell: "bash".to_string(),
            default_step_timeout: None,
            source_dir: None,
        }
    }
}

/// Executes job instances on environments from an [`EnvironmentFactory`].
pub struct JobExecutor {
    runner: Arc<dyn StepRunner>,
    environments: Arc<dyn EnvironmentFactory>,
    artifacts: Arc<dyn ArtifactStore>,
    actions: ActionRegistry,
    event_bus: Arc<dyn EventBus>,
    config: ExecutorConfig,
}

/// What happened to one step.
struct StepRun {
    status: StepStatus,
    exit_code: Option<i32>,
    artifact: Option<Artifact>,
}

impl StepRun {
    fn succeeded(exit_code: Option<i32>) -> Self {
        Self {
            status: StepStatus::Succeeded,
            exit_code,
            artifact: None,
        }
    }

    fn failed(exit_code: Option<i32>) -> Self {
        Self {
            status: StepStatus::Failed,
            exit_code,
            artifact: None,
        }
    }

    fn cancelled() -> Self {
        Self {
            status: StepStatus::Cancelled,
            exit_code: Some(KILLED_EXIT_CODE),
            artifact: None,
        }
    }
}

/// Per-instance state threaded through the step loop.
struct InstanceRun<'a> {
    instance: &'a JobInstance,
    event: &'a TriggerEvent,
    workspace: &'a Path,
    job_env: IndexMap<String, String>,
    cancel: CancelSignal,
}

impl JobExecutor {
    pub fn new(
        runner: Arc<dyn StepRunner>,
        environments: Arc<dyn EnvironmentFactory>,
        artifacts: Arc<dyn ArtifactStore>,
        event_bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            runner,
            environments,
            artifacts,
            actions: ActionRegistry::default(),
            event_bus,
            config: ExecutorConfig::default(),
        }
    }

    pub fn with_actions(mut self, actions: ActionRegistry) -> Self {
        self.actions = actions;
        self
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    async fn run_steps(
        &self,
        run: &InstanceRun<'_>,
        outcome: &mut JobOutcome,
    ) {
        let instance = run.instance;
        let steps = &instance.definition.steps;

        let mut job_failed = false;
        let mut required_executed = false;
        let mut first_failure: Option<FailureReason> = None;
        let mut best_effort_failure: Option<FailureReason> = None;
        let mut cancelled = false;

        for (index, step) in steps.iter().enumerate() {
            let name = step.display_name(index);

            if cancelled || run.cancel.is_cancelled() {
                cancelled = true;
                self.record(run, outcome, step, name, StepStatus::Skipped, None, 0).await;
                continue;
            }

            let mut ctx = self.context(run, job_failed);
            let step_env: Vec<(String, String)> = step
                .env
                .iter()
                .map(|(k, v)| (k.clone(), ctx.interpolate(v)))
                .collect();
            ctx.env.extend(step_env);

            let plan = step_plan(step, &ctx);
            if plan == StepPlan::Skip {
                debug!(instance = %instance.display_name, step = %name, "Step condition not met, skipping");
                self.record(run, outcome, step, name, StepStatus::Skipped, None, 0).await;
                continue;
            }

            info!(
                run_id = %instance.run_id,
                instance = %instance.display_name,
                step = %name,
                index,
                "Executing step"
            );
            let started = Instant::now();
            let result = self.run_step(run, step, &name, &ctx, plan).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            if let Some(artifact) = result.artifact {
                outcome.artifacts.push(artifact);
            }

            match result.status {
                StepStatus::Cancelled => cancelled = true,
                StepStatus::Failed => {
                    let reason = FailureReason::StepFailed {
                        step: name.clone(),
                        exit_code: result.exit_code.unwrap_or(KILLED_EXIT_CODE),
                    };
                    if step.continue_on_error {
                        warn!(instance = %instance.display_name, step = %name, "Best-effort step failed, continuing");
                        best_effort_failure.get_or_insert(reason);
                    } else {
                        error!(instance = %instance.display_name, step = %name, exit_code = ?result.exit_code, "Step failed");
                        job_failed = true;
                        first_failure.get_or_insert(reason);
                    }
                }
                _ => {}
            }
            if !step.continue_on_error && result.status != StepStatus::Cancelled {
                required_executed = true;
            }

            self.record(run, outcome, step, name, result.status, result.exit_code, duration_ms)
                .await;
        }

        (outcome.status, outcome.failure) = if cancelled {
            (JobStatus::Cancelled, None)
        } else if job_failed {
            (JobStatus::Failed, first_failure)
        } else if !required_executed && best_effort_failure.is_some() {
            // Only best-effort steps ran, so their result decides the job.
            (JobStatus::Failed, best_effort_failure)
        } else {
            (JobStatus::Succeeded, None)
        };
    }

    fn context(&self, run: &InstanceRun<'_>, job_failed: bool) -> InterpolationContext {
        let mut ctx = InterpolationContext::for_event(run.event.clone())
            .with_matrix(run.instance.matrix.clone());
        ctx.env = run.job_env.clone();
        ctx.job_failed = job_failed;
        ctx.cancelled = run.cancel.is_cancelled();
        ctx
    }

    async fn run_step(
        &self,
        run: &InstanceRun<'_>,
        step: &StepDefinition,
        name: &str,
        ctx: &InterpolationContext,
        plan: StepPlan,
    ) -> StepRun {
        let instance = run.instance;

        let mut result = if plan == StepPlan::UploadOnly {
            StepRun::succeeded(None)
        } else {
            match self.download(run, step, ctx).await {
                Ok(()) => self.execute_command(run, step, name, ctx).await,
                Err(e) => {
                    error!(instance = %instance.display_name, step = %name, error = %e, "Artifact download failed");
                    StepRun::failed(None)
                }
            }
        };

        if let Some(upload) = &step.upload {
            let wanted = match result.status {
                StepStatus::Succeeded => true,
                StepStatus::Failed => upload.when == UploadWhen::Always,
                _ => false,
            };
            if wanted {
                let artifact_name = ctx.interpolate(&upload.name);
                let source = run.workspace.join(ctx.interpolate(&upload.path));
                match self
                    .artifacts
                    .put(instance.run_id, &artifact_name, &source)
                    .await
                {
                    Ok(stored) => {
                        result.artifact = Some(Artifact {
                            id: ArtifactId::new(),
                            run_id: instance.run_id,
                            name: artifact_name,
                            producer: instance.id,
                            job: instance.job.clone(),
                            matrix: instance.matrix.clone(),
                            location: stored.location,
                            size_bytes: stored.size_bytes,
                            when: upload.when,
                            created_at: Utc::now(),
                        });
                    }
                    Err(e) => {
                        warn!(instance = %instance.display_name, step = %name, artifact = %artifact_name, error = %e, "Artifact upload failed");
                        if result.status == StepStatus::Succeeded {
                            result.status = StepStatus::Failed;
                        }
                    }
                }
            }
        }

        result
    }

    async fn download(
        &self,
        run: &InstanceRun<'_>,
        step: &StepDefinition,
        ctx: &InterpolationContext,
    ) -> gauntlet_core::Result<()> {
        for download in &step.download {
            let name = ctx.interpolate(&download.name);
            let dest = match &download.path {
                Some(path) => run.workspace.join(ctx.interpolate(path)),
                None => run.workspace.join(&name),
            };
            self.artifacts.get(run.instance.run_id, &name, &dest).await?;
        }
        Ok(())
    }

    async fn execute_command(
        &self,
        run: &InstanceRun<'_>,
        step: &StepDefinition,
        name: &str,
        ctx: &InterpolationContext,
    ) -> StepRun {
        let instance = run.instance;
        let mut env = ctx.env.clone();
        env.extend(self.builtin_env(run));

        let command = match (&step.run, &step.uses) {
            (Some(script), _) => ctx.interpolate(script),
            (None, Some(uses)) => match self.actions.resolve(uses) {
                Some(command) => {
                    env.extend(actions::input_env(&step.with, ctx));
                    ctx.interpolate(command)
                }
                None => {
                    error!(instance = %instance.display_name, step = %name, action = %uses, "Action not found");
                    return StepRun::failed(Some(UNRESOLVED_ACTION_EXIT_CODE));
                }
            },
            // Transfer-only step.
            (None, None) => return StepRun::succeeded(None),
        };

        let working_dir = match &step.working_directory {
            Some(dir) => run.workspace.join(ctx.interpolate(dir)),
            None => run.workspace.to_path_buf(),
        };
        let timeout = step
            .timeout_minutes
            .map(|m| Duration::from_secs(u64::from(m) * 60))
            .or(self.config.default_step_timeout);

        let step_ctx = StepContext {
            name: name.to_string(),
            command,
            shell: step.shell.clone().unwrap_or_else(|| self.config.shell.clone()),
            working_dir,
            env,
            timeout,
            cancel: run.cancel.clone(),
        };

        let (tx, rx) = mpsc::channel(OUTPUT_BUFFER);
        let forwarder = self.forward_output(instance, name, rx);

        let execution = self.runner.execute(&step_ctx, tx);
        let result: Option<gauntlet_core::Result<StepResult>> = tokio::select! {
            result = execution => Some(result),
            _ = run.cancel.cancelled() => None,
        };

        let result = match result {
            Some(result) => {
                if let Err(e) = forwarder.await {
                    warn!(instance = %instance.display_name, step = %name, error = %e, "Output forwarder failed");
                }
                result
            }
            None => {
                forwarder.abort();
                info!(instance = %instance.display_name, step = %name, "Step interrupted by cancellation");
                return StepRun::cancelled();
            }
        };

        match result {
            Ok(r) if r.cancelled => StepRun::cancelled(),
            Ok(r) if r.timed_out => {
                error!(instance = %instance.display_name, step = %name, timeout = ?timeout, "Step timed out");
                StepRun::failed(Some(r.exit_code))
            }
            Ok(r) if r.success => StepRun::succeeded(Some(r.exit_code)),
            Ok(r) => StepRun::failed(Some(r.exit_code)),
            Err(e) => {
                error!(instance = %instance.display_name, step = %name, error = %e, "Failed to run step");
                StepRun::failed(None)
            }
        }
    }

    fn builtin_env(&self, run: &InstanceRun<'_>) -> Vec<(String, String)> {
        let instance = run.instance;
        let mut env = vec![
            ("CI".to_string(), "true".to_string()),
            (
                "GAUNTLET_WORKSPACE".to_string(),
                run.workspace.display().to_string(),
            ),
            ("GAUNTLET_RUN_ID".to_string(), instance.run_id.to_string()),
            ("GAUNTLET_JOB".to_string(), instance.job.clone()),
            ("GAUNTLET_INSTANCE".to_string(), instance.display_name.clone()),
        ];
        if let Some(sha) = &run.event.head_sha {
            env.push(("GAUNTLET_SHA".to_string(), sha.clone()));
        }
        if let Some(git_ref) = &run.event.git_ref {
            env.push(("GAUNTLET_REF".to_string(), git_ref.clone()));
        }
        if let Some(source) = &self.config.source_dir {
            env.push((
                "GAUNTLET_SOURCE_DIR".to_string(),
                source.display().to_string(),
            ));
        }
        env
    }

    fn forward_output(
        &self,
        instance: &JobInstance,
        step: &str,
        mut rx: mpsc::Receiver<OutputLine>,
    ) -> tokio::task::JoinHandle<()> {
        let event_bus = self.event_bus.clone();
        let run_id = instance.run_id;
        let instance_id = instance.id;
        let job = instance.job.clone();
        let display_name = instance.display_name.clone();
        let step = step.to_string();

        tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                debug!(instance = %display_name, step = %step, stream = ?line.stream, "{}", line.content);
                let event = Event::StepOutput(StepOutputPayload {
                    run_id,
                    instance_id,
                    job: job.clone(),
                    step: step.clone(),
                    stream: line.stream,
                    line: line.content,
                    line_number: line.line_number,
                    timestamp: line.timestamp,
                });
                if let Err(e) = event_bus.publish(event).await {
                    warn!(error = %e, "Failed to publish step output");
                }
            }
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn record(
        &self,
        run: &InstanceRun<'_>,
        outcome: &mut JobOutcome,
        step: &StepDefinition,
        name: String,
        status: StepStatus,
        exit_code: Option<i32>,
        duration_ms: u64,
    ) {
        let instance = run.instance;
        let event = Event::StepCompleted(StepCompletedPayload {
            run_id: instance.run_id,
            instance_id: instance.id,
            job: instance.job.clone(),
            step: name.clone(),
            status,
            exit_code,
            duration_ms,
            completed_at: Utc::now(),
        });
        if let Err(e) = self.event_bus.publish(event).await {
            warn!(error = %e, "Failed to publish step completion");
        }

        outcome.steps.push(StepOutcome {
            name,
            status,
            exit_code,
            best_effort: step.continue_on_error,
            duration_ms,
        });
    }

    fn provisioning_failed(&self, instance: &JobInstance, outcome: &mut JobOutcome, message: String) {
        for (index, step) in instance.definition.steps.iter().enumerate() {
            outcome.steps.push(StepOutcome {
                name: step.display_name(index),
                status: if index == 0 {
                    StepStatus::Failed
                } else {
                    StepStatus::Skipped
                },
                exit_code: None,
                best_effort: step.continue_on_error,
                duration_ms: 0,
            });
        }
        outcome.status = JobStatus::Failed;
        outcome.failure = Some(FailureReason::Provisioning { message });
    }
}

#[async_trait]
impl InstanceExecutor for JobExecutor {
    async fn execute(
        &self,
        instance: &JobInstance,
        event: &TriggerEvent,
        cancel: CancelSignal,
    ) -> JobOutcome {
        let mut outcome = JobOutcome::not_started(instance, JobStatus::Running, None);
        outcome.started_at = Some(Utc::now());

        info!(
            run_id = %instance.run_id,
            instance = %instance.display_name,
            runs_on = %instance.runs_on,
            steps = instance.definition.steps.len(),
            "Starting job instance"
        );

        let environment = self.environments.create(instance);
        if let Err(e) = environment.prepare().await {
            error!(instance = %instance.display_name, error = %e, "Environment setup failed");
            self.provisioning_failed(instance, &mut outcome, e.to_string());
            if let Err(e) = environment.cleanup().await {
                warn!(instance = %instance.display_name, error = %e, "Environment cleanup failed");
            }
            outcome.completed_at = Utc::now();
            return outcome;
        }

        let base = InterpolationContext::for_event(event.clone()).with_matrix(instance.matrix.clone());
        let mut job_env = IndexMap::new();
        for (key, value) in &instance.env {
            let mut ctx = base.clone();
            ctx.env = job_env.clone();
            job_env.insert(key.clone(), ctx.interpolate(value));
        }

        let run = InstanceRun {
            instance,
            event,
            workspace: environment.working_dir(),
            job_env,
            cancel,
        };
        self.run_steps(&run, &mut outcome).await;

        if let Err(e) = environment.cleanup().await {
            warn!(instance = %instance.display_name, error = %e, "Environment cleanup failed");
        }

        outcome.completed_at = Utc::now();
        info!(
            run_id = %instance.run_id,
            instance = %instance.display_name,
            status = %outcome.status,
            duration_ms = outcome.duration_ms(),
            "Job instance finished"
        );
        outcome
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepPlan {
    Run,
    /// Job already failed; only the step's `when: always` upload happens.
    UploadOnly,
    Skip,
}

/// Decide whether a step runs given the job status so far.
///
/// An explicit `if` without a status function is implicitly `success() && if`.
fn step_plan(step: &StepDefinition, ctx: &InterpolationContext) -> StepPlan {
    match &step.condition {
        Some(expr) => match Condition::parse(expr) {
            Ok(condition) if condition.has_status_function() => {
                if condition.evaluate(ctx) {
                    StepPlan::Run
                } else {
                    StepPlan::Skip
                }
            }
            Ok(condition) => {
                if !ctx.job_failed && !ctx.cancelled && condition.evaluate(ctx) {
                    StepPlan::Run
                } else {
                    StepPlan::Skip
                }
            }
            Err(e) => {
                warn!(condition = %expr, error = %e, "Unparseable step condition, skipping");
                StepPlan::Skip
            }
        },
        None if !ctx.job_failed => StepPlan::Run,
        None if step
            .upload
            .as_ref()
            .is_some_and(|u| u.when == UploadWhen::Always) =>
        {
            StepPlan::UploadOnly
        }
        None => StepPlan::Skip,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::FsArtifactStore;
    use crate::environments::HostEnvironmentFactory;
    use crate::shell::ShellRunner;
    use gauntlet_core::ids::{JobInstanceId, RunId};
    use gauntlet_core::ports::EventStream;
    use gauntlet_core::workflow::{ArtifactUpload, JobDefinition};

    struct NullBus;

    #[async_trait]
    impl EventBus for NullBus {
        async fn publish(&self, _event: Event) -> gauntlet_core::Result<()> {
            Ok(())
        }

        async fn subscribe(&self, _pattern: &str) -> gauntlet_core::Result<EventStream> {
            Ok(Box::pin(futures::stream::empty()))
        }
    }

    fn run_step(script: &str) -> StepDefinition {
        StepDefinition {
            run: Some(script.to_string()),
            ..Default::default()
        }
    }

    fn instance(steps: Vec<StepDefinition>) -> JobInstance {
        let definition = JobDefinition {
            name: None,
            runs_on: "local".to_string(),
            needs: vec![],
            wait: None,
            condition: None,
            strategy: None,
            concurrency: None,
            timeout_minutes: None,
            env: IndexMap::new(),
            continue_on_error: false,
            steps,
        };
        JobInstance {
            id: JobInstanceId::new(),
            run_id: RunId::new(),
            job: "unit".to_string(),
            display_name: "unit".to_string(),
            matrix: IndexMap::new(),
            runs_on: "local".to_string(),
            env: IndexMap::new(),
            concurrency_group: None,
            cancel_in_progress: false,
            timeout_minutes: None,
            best_effort: false,
            definition,
        }
    }

    fn executor(root: &Path) -> JobExecutor {
        JobExecutor::new(
            Arc::new(ShellRunner::new()),
            Arc::new(HostEnvironmentFactory::new(root.join("workspaces"))),
            Arc::new(FsArtifactStore::new(root.join("artifacts"))),
            Arc::new(NullBus),
        )
    }

    fn event() -> TriggerEvent {
        TriggerEvent::pull_request("refs/pull/1/merge", "abc123")
    }

    #[tokio::test]
    async fn test_failed_step_skips_rest() {
        let dir = tempfile::tempdir().unwrap();
        let inst = instance(vec![run_step("true"), run_step("exit 4"), run_step("true")]);

        let outcome = executor(dir.path())
            .execute(&inst, &event(), CancelSignal::never())
            .await;

        assert_eq!(outcome.status, JobStatus::Failed);
        let statuses: Vec<_> = outcome.steps.iter().map(|s| s.status).collect();
        assert_eq!(
            statuses,
            vec![StepStatus::Succeeded, StepStatus::Failed, StepStatus::Skipped]
        );
        assert_eq!(
            outcome.failure,
            Some(FailureReason::StepFailed {
                step: "exit 4".to_string(),
                exit_code: 4
            })
        );
    }

    #[tokio::test]
    async fn test_always_step_runs_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut cleanup = run_step("echo cleanup");
        cleanup.condition = Some("always()".to_string());
        let inst = instance(vec![run_step("false"), cleanup]);

        let outcome = executor(dir.path())
            .execute(&inst, &event(), CancelSignal::never())
            .await;

        assert_eq!(outcome.status, JobStatus::Failed);
        assert_eq!(outcome.steps[1].status, StepStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_upload_always_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut tests = run_step("echo partial > results.txt; exit 1");
        tests.upload = Some(ArtifactUpload {
            name: "results-${{ github.sha }}".to_string(),
            path: "results.txt".to_string(),
            when: UploadWhen::Always,
        });
        let inst = instance(vec![tests]);

        let outcome = executor(dir.path())
            .execute(&inst, &event(), CancelSignal::never())
            .await;

        assert_eq!(outcome.status, JobStatus::Failed);
        assert_eq!(outcome.artifacts.len(), 1);
        assert_eq!(outcome.artifacts[0].name, "results-abc123");
        assert_eq!(outcome.artifacts[0].when, UploadWhen::Always);
    }

    #[tokio::test]
    async fn test_unresolved_action_exits_127() {
        let dir = tempfile::tempdir().unwrap();
        let step = StepDefinition {
            uses: Some("actions/setup-python@v5".to_string()),
            ..Default::default()
        };
        let outcome = executor(dir.path())
            .execute(&instance(vec![step]), &event(), CancelSignal::never())
            .await;

        assert_eq!(outcome.status, JobStatus::Failed);
        assert_eq!(outcome.steps[0].exit_code, Some(UNRESOLVED_ACTION_EXIT_CODE));
    }

    #[tokio::test]
    async fn test_resolved_action_sees_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = ActionRegistry::default();
        registry.register("actions/setup-python", "test \"$INPUT_PYTHON_VERSION\" = 3.10");

        let mut step = StepDefinition {
            uses: Some("actions/setup-python@v5".to_string()),
            ..Default::default()
        };
        step.with
            .insert("python-version".to_string(), serde_json::json!("3.10"));

        let outcome = executor(dir.path())
            .with_actions(registry)
            .execute(&instance(vec![step]), &event(), CancelSignal::never())
            .await;
        assert_eq!(outcome.status, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_builtin_env_and_workspace_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let inst = instance(vec![run_step(
            "test \"$GAUNTLET_SHA\" = abc123 && test \"$PWD\" = \"$GAUNTLET_WORKSPACE\"",
        )]);
        let exec = executor(dir.path());

        let outcome = exec.execute(&inst, &event(), CancelSignal::never()).await;
        assert_eq!(outcome.status, JobStatus::Succeeded);

        let workspace = dir
            .path()
            .join("workspaces")
            .join(inst.run_id.to_string())
            .join(inst.id.to_string());
        assert!(!workspace.exists());
    }

    #[test]
    fn test_step_plan_rules() {
        let mut ctx = InterpolationContext::new();
        let plain = run_step("true");
        let mut on_failure = run_step("true");
        on_failure.condition = Some("failure()".to_string());
        let mut gated = run_step("true");
        gated.condition = Some("true".to_string());

        assert_eq!(step_plan(&plain, &ctx), StepPlan::Run);
        assert_eq!(step_plan(&on_failure, &ctx), StepPlan::Skip);
        assert_eq!(step_plan(&gated, &ctx), StepPlan::Run);

        ctx.job_failed = true;
        assert_eq!(step_plan(&plain, &ctx), StepPlan::Skip);
        assert_eq!(step_plan(&on_failure, &ctx), StepPlan::Run);
        assert_eq!(step_plan(&gated, &ctx), StepPlan::Skip);
    }
}
