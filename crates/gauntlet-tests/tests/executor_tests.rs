//! Step sequencing, failure policy and job-level timeouts.
//!
//! Run with: `cargo test -p gauntlet-tests --test executor_tests`

use gauntlet_core::ports::ArtifactStore;
use gauntlet_core::run::{FailureReason, JobStatus, RunStatus, StepStatus};
use gauntlet_runner::{FsArtifactStore, HostEnvironmentFactory, JobExecutor};
use gauntlet_scheduler::bus::MemoryEventBus;
use gauntlet_scheduler::{Orchestrator, OrchestratorConfig};
use gauntlet_tests::context::fast_config;
use gauntlet_tests::{EventFixture, Script, ScriptedRunner, TestContext, WorkflowFixture};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_failed_step_skips_the_rest() {
    let ctx = TestContext::new();
    ctx.runner.script("step-two", Script::fail(2));

    let report = ctx
        .orchestrator
        .run(&WorkflowFixture::three_steps(false), EventFixture::pull_request())
        .await
        .expect("run completes");

    assert_eq!(report.status, RunStatus::Failed);
    let unit = report.job("unit").expect("unit outcome");
    assert_eq!(unit.status, JobStatus::Failed);
    assert_eq!(
        unit.failure,
        Some(FailureReason::StepFailed {
            step: "step-two".to_string(),
            exit_code: 2,
        })
    );

    let statuses: Vec<StepStatus> = unit.steps.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![StepStatus::Succeeded, StepStatus::Failed, StepStatus::Skipped]
    );
    assert_eq!(ctx.runner.commands(), vec!["step-one", "step-two"]);
}

#[tokio::test]
async fn test_best_effort_step_failure_does_not_fail_job() {
    let ctx = TestContext::new();
    ctx.runner.script("step-two", Script::fail(1));

    let report = ctx
        .orchestrator
        .run(&WorkflowFixture::three_steps(true), EventFixture::pull_request())
        .await
        .expect("run completes");

    assert_eq!(report.status, RunStatus::Succeeded);
    let unit = report.job("unit").expect("unit outcome");
    assert_eq!(unit.status, JobStatus::Succeeded);
    assert!(unit.failure.is_none());

    let statuses: Vec<StepStatus> = unit.steps.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![StepStatus::Succeeded, StepStatus::Failed, StepStatus::Succeeded]
    );
    assert!(unit.steps[1].best_effort);
    assert_eq!(ctx.runner.commands(), vec!["step-one", "step-two", "step-three"]);
}

#[tokio::test]
async fn test_only_best_effort_steps_failing_fails_job() {
    let ctx = TestContext::new();
    ctx.runner.script("flaky", Script::fail(1));

    let workflow = WorkflowFixture::parse(
        r#"
name: lonely
jobs:
  unit:
    runs-on: local
    steps:
      - run: flaky
        continue-on-error: true
"#,
    );

    let report = ctx
        .orchestrator
        .run(&workflow, EventFixture::pull_request())
        .await
        .expect("run completes");

    let unit = report.job("unit").expect("unit outcome");
    assert_eq!(unit.status, JobStatus::Failed);
    assert!(matches!(
        unit.failure,
        Some(FailureReason::StepFailed { exit_code: 1, .. })
    ));
    assert_eq!(report.status, RunStatus::Failed);
}

#[tokio::test]
async fn test_step_environment_layers() {
    let ctx = TestContext::new();

    let workflow = WorkflowFixture::parse(
        r#"
name: env
env:
  NODE_COUNT: "2"
  LAYER: workflow
jobs:
  functional:
    runs-on: local
    strategy:
      matrix:
        kube: [v1.27.3]
    env:
      KUBE_TAG: ${{ matrix.kube }}
      LAYER: job
    steps:
      - run: deploy
        env:
          LAYER: step
"#,
    );

    let report = ctx
        .orchestrator
        .run(&workflow, EventFixture::with_sha("feedface"))
        .await
        .expect("run completes");
    assert_eq!(report.status, RunStatus::Succeeded);

    let executions = ctx.runner.executions_of("deploy");
    assert_eq!(executions.len(), 1);
    let env = &executions[0].env;
    assert_eq!(env.get("NODE_COUNT").map(String::as_str), Some("2"));
    assert_eq!(env.get("KUBE_TAG").map(String::as_str), Some("v1.27.3"));
    assert_eq!(env.get("LAYER").map(String::as_str), Some("step"));
    assert_eq!(env.get("CI").map(String::as_str), Some("true"));
    assert_eq!(env.get("GAUNTLET_JOB").map(String::as_str), Some("functional"));
    assert_eq!(
        env.get("GAUNTLET_INSTANCE").map(String::as_str),
        Some("functional (kube=v1.27.3)")
    );
    assert_eq!(env.get("GAUNTLET_SHA").map(String::as_str), Some("feedface"));
}

#[tokio::test]
async fn test_job_timeout_fails_instance() {
    let ctx = TestContext::with_config(OrchestratorConfig {
        default_job_timeout: Some(Duration::from_millis(200)),
        ..fast_config()
    });
    ctx.runner
        .script("step-one", Script::ok().with_delay(Duration::from_secs(5)));

    let report = ctx
        .orchestrator
        .run(&WorkflowFixture::three_steps(false), EventFixture::pull_request())
        .await
        .expect("run completes");

    let unit = report.job("unit").expect("unit outcome");
    assert_eq!(unit.status, JobStatus::Failed);
    assert_eq!(unit.failure, Some(FailureReason::JobTimeout));
    assert_eq!(report.status, RunStatus::Failed);
    assert!(report.duration_ms < 5_000);
    assert!(ctx.runner.executions_of("step-two").is_empty());
}

#[tokio::test]
async fn test_provisioning_failure_fails_without_running_steps() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    // Workspaces would have to live under a regular file.
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "x").expect("write blocker");

    let runner = Arc::new(ScriptedRunner::new());
    let bus = Arc::new(MemoryEventBus::new());
    let artifacts = Arc::new(FsArtifactStore::new(dir.path().join("artifacts")));
    let executor = JobExecutor::new(
        runner.clone(),
        Arc::new(HostEnvironmentFactory::new(blocker.join("workspaces"))),
        artifacts.clone(),
        bus.clone(),
    );
    let orchestrator = Orchestrator::new(
        fast_config(),
        Arc::new(executor),
        artifacts as Arc<dyn ArtifactStore>,
        bus,
    );

    let report = orchestrator
        .run(&WorkflowFixture::three_steps(false), EventFixture::pull_request())
        .await
        .expect("run completes");

    let unit = report.job("unit").expect("unit outcome");
    assert_eq!(unit.status, JobStatus::Failed);
    assert!(matches!(unit.failure, Some(FailureReason::Provisioning { .. })));
    assert_eq!(unit.steps[0].status, StepStatus::Failed);
    assert!(unit.steps[1..].iter().all(|s| s.status == StepStatus::Skipped));
    assert!(runner.executions().is_empty());
}

#[tokio::test]
async fn test_always_upload_survives_failed_job() {
    let ctx = TestContext::new();
    ctx.runner.script(
        "./hack/run-functional-tests.sh",
        Script::fail(1).creating("sonobuoy-results.tar.gz", "partial"),
    );

    let workflow = WorkflowFixture::parse(
        r#"
name: functional
jobs:
  functional:
    runs-on: local
    steps:
      - run: ./hack/run-functional-tests.sh
        upload:
          name: sonobuoy-results.tar.gz
          path: sonobuoy-results.tar.gz
          when: always
      - run: ./hack/collect-logs.sh
"#,
    );

    let report = ctx
        .orchestrator
        .run(&workflow, EventFixture::pull_request())
        .await
        .expect("run completes");

    assert_eq!(report.status, RunStatus::Failed);
    assert!(report.artifact("sonobuoy-results.tar.gz").is_some());
    let stored = ctx.artifacts.list(report.run_id).await.expect("list artifacts");
    assert_eq!(stored, vec!["sonobuoy-results.tar.gz".to_string()]);
}

#[tokio::test]
async fn test_on_success_upload_discarded_when_job_fails() {
    let ctx = TestContext::new();
    ctx.runner
        .script("build", Script::ok().creating("dist/pkg.whl", "wheel"));
    ctx.runner.script("verify", Script::fail(1));

    let workflow = WorkflowFixture::parse(
        r#"
name: package
jobs:
  build:
    runs-on: local
    steps:
      - run: build
        upload:
          name: dist
          path: dist
      - run: verify
"#,
    );

    let report = ctx
        .orchestrator
        .run(&workflow, EventFixture::pull_request())
        .await
        .expect("run completes");

    assert_eq!(report.status, RunStatus::Failed);
    assert!(report.artifacts.is_empty());
    let stored = ctx.artifacts.list(report.run_id).await.expect("list artifacts");
    assert!(stored.is_empty());
}
