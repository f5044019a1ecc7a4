//! Command handlers.

use crate::commands::EventArgs;
use crate::config::{GauntletConfig, OutputFormat};
use console::style;
use futures::StreamExt;
use gauntlet_core::event::TriggerEvent;
use gauntlet_core::events::Event;
use gauntlet_core::ports::EventBus;
use gauntlet_core::run::{JobStatus, RunReport, RunStatus};
use gauntlet_core::workflow::WorkflowDefinition;
use gauntlet_runner::{
    ActionRegistry, FsArtifactStore, HostEnvironmentFactory, JobExecutor, ShellRunner,
};
use gauntlet_scheduler::bus::MemoryEventBus;
use gauntlet_scheduler::dag::DagBuilder;
use gauntlet_scheduler::matrix::MatrixExpander;
use gauntlet_scheduler::{Orchestrator, RunPlan};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Locations searched when no workflow path is given.
pub const DEFAULT_WORKFLOW_PATHS: &[&str] = &[
    ".gauntlet/workflow.yaml",
    ".gauntlet/workflow.yml",
    "gauntlet.yaml",
    "gauntlet.yml",
];

const STARTER_WORKFLOW: &str = r#"name: ci

on:
  pull_request:
    types: [opened, synchronize, reopened]

concurrency:
  group: ci-${{ github.ref }}
  cancel-in-progress: true

jobs:
  lint:
    runs-on: ubuntu-22.04
    steps:
      - uses: actions/checkout@v4
      - run: echo "Linting..."

  test:
    runs-on: ubuntu-22.04
    needs: [lint]
    strategy:
      fail-fast: false
      matrix:
        python: ["3.10", "3.11"]
    steps:
      - uses: actions/checkout@v4
      - run: echo "Testing on Python ${{ matrix.python }}"
"#;

/// Resolve an explicit workflow path or search the default locations.
pub fn resolve_workflow_path(path: Option<PathBuf>) -> CliResult<PathBuf> {
    if let Some(path) = path {
        return Ok(path);
    }
    DEFAULT_WORKFLOW_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|p| p.is_file())
        .ok_or_else(|| {
            format!(
                "No workflow found (looked for {})",
                DEFAULT_WORKFLOW_PATHS.join(", ")
            )
            .into()
        })
}

/// Build the trigger event from command-line flags.
pub fn build_event(args: &EventArgs) -> CliResult<TriggerEvent> {
    if let Some(path) = &args.event {
        let content = std::fs::read_to_string(path)?;
        let payload: serde_json::Value = serde_json::from_str(&content)?;
        return Ok(TriggerEvent::from_github_payload(&payload)?);
    }

    let mut event = TriggerEvent::pull_request(
        args.git_ref.clone().unwrap_or_else(|| "HEAD".to_string()),
        args.sha.clone().unwrap_or_else(|| "local".to_string()),
    );
    event.body = args.body.clone();
    Ok(event)
}

fn load_workflow(path: &Path) -> CliResult<WorkflowDefinition> {
    let workflow = WorkflowDefinition::load(path)?;
    workflow.validate()?;
    DagBuilder::new().check_jobs(&workflow)?;
    Ok(workflow)
}

/// Write a starter workflow.
pub async fn init(path: &Path) -> CliResult<()> {
    if path.exists() {
        println!("{} {} already exists", style("!").yellow(), path.display());
        return Ok(());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, STARTER_WORKFLOW)?;
    println!("{} Created {}", style("✓").green(), path.display());
    Ok(())
}

/// Validate a workflow.
pub async fn validate(path: Option<PathBuf>) -> CliResult<()> {
    let path = resolve_workflow_path(path)?;
    let workflow = load_workflow(&path)?;
    let expander = MatrixExpander::new();

    println!(
        "{} Workflow \"{}\" is valid",
        style("✓").green(),
        workflow.name
    );
    println!("  Jobs: {}", workflow.jobs.len());

    for (name, job) in &workflow.jobs {
        let cells = expander.expand(name, job.matrix()).len();
        let mut line = format!("    - {} ({} steps", name, job.steps.len());
        if cells > 1 {
            line.push_str(&format!(", {} matrix cells", cells));
        }
        line.push(')');
        if !job.needs.is_empty() {
            line.push_str(&format!(" needs {}", job.needs.join(", ")));
        }
        if let Some(wait) = &job.wait {
            let targets: Vec<&str> = wait.targets.iter().map(|t| t.job.as_str()).collect();
            line.push_str(&format!(" waits on {}", targets.join(", ")));
        }
        println!("{}", line);
    }

    Ok(())
}

fn plan_json(plan: &RunPlan) -> serde_json::Value {
    let instances: Vec<_> = plan
        .instances
        .iter()
        .map(|i| {
            serde_json::json!({
                "id": i.id,
                "job": i.job,
                "name": i.display_name,
                "matrix": i.matrix,
                "runs_on": i.runs_on,
                "concurrency_group": i.concurrency_group,
                "best_effort": i.best_effort,
            })
        })
        .collect();
    let edges: Vec<_> = plan
        .dag
        .edges()
        .into_iter()
        .map(|(from, to, edge)| {
            serde_json::json!({
                "from": from.display_name,
                "to": to.display_name,
                "ignore_failure": edge.ignore_failure,
            })
        })
        .collect();

    serde_json::json!({
        "run_id": plan.run_id,
        "workflow": plan.workflow.name,
        "instances": instances,
        "skipped": plan.skipped,
        "edges": edges,
    })
}

/// Show what a trigger event would run.
pub async fn plan(path: Option<PathBuf>, event: &EventArgs, json: bool) -> CliResult<()> {
    let path = resolve_workflow_path(path)?;
    let workflow = load_workflow(&path)?;
    let event = build_event(event)?;
    let plan = gauntlet_scheduler::Planner::new().plan(&workflow, &event)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan_json(&plan))?);
        return Ok(());
    }

    println!(
        "{} Plan for \"{}\" ({} instances)",
        style("▶").cyan(),
        style(&workflow.name).bold(),
        plan.instances.len()
    );
    for instance in &plan.instances {
        let mut line = format!(
            "  {} {}",
            style(&instance.display_name).bold(),
            style(format!("[{}]", instance.runs_on)).dim()
        );
        if let Some(group) = &instance.concurrency_group {
            line.push_str(&format!(" group={}", group));
        }
        if instance.best_effort {
            line.push_str(" (best-effort)");
        }
        println!("{}", line);
        for (upstream, edge) in plan.dag.upstream(instance.id) {
            let marker = if edge.ignore_failure { " (ignore failure)" } else { "" };
            println!("      waits on {}{}", upstream.display_name, marker);
        }
    }
    for skipped in &plan.skipped {
        println!("  {} {} (condition not met)", style("-").dim(), style(skipped).dim());
    }
    Ok(())
}

fn status_icon(status: JobStatus) -> String {
    match status {
        JobStatus::Succeeded => style("✓").green().to_string(),
        JobStatus::Failed => style("✗").red().to_string(),
        JobStatus::Cancelled => style("⊘").yellow().to_string(),
        JobStatus::Pending | JobStatus::Running => style("…").dim().to_string(),
    }
}

fn print_report(report: &RunReport) {
    println!();
    for job in &report.jobs {
        let duration = job
            .duration_ms()
            .map(|ms| format!(" {:.1}s", ms as f64 / 1000.0))
            .unwrap_or_default();
        let mut line = format!(
            "{} {}{}",
            status_icon(job.status),
            job.display_name,
            style(duration).dim()
        );
        if job.best_effort {
            line.push_str(" (best-effort)");
        }
        if let Some(failure) = &job.failure {
            line.push_str(&format!(" - {}", failure));
        }
        println!("{}", line);
    }
    for skipped in &report.skipped {
        println!("{} {} (skipped)", style("-").dim(), style(skipped).dim());
    }

    if !report.artifacts.is_empty() {
        println!("\nArtifacts:");
        for artifact in &report.artifacts {
            println!(
                "  {} ({} bytes) {}",
                artifact.name,
                artifact.size_bytes,
                style(artifact.location.display()).dim()
            );
        }
    }

    let summaries: Vec<_> = report
        .axis_summaries
        .iter()
        .filter(|s| s.succeeded + s.failed + s.cancelled > 1 || s.failed > 0)
        .collect();
    if !summaries.is_empty() {
        println!("\nMatrix:");
        for s in summaries {
            println!(
                "  {} {}={}: {} ok, {} failed, {} cancelled",
                s.job, s.axis, s.value, s.succeeded, s.failed, s.cancelled
            );
        }
    }

    let status = match report.status {
        RunStatus::Succeeded => style(report.status.to_string()).green().bold(),
        RunStatus::Failed => style(report.status.to_string()).red().bold(),
        _ => style(report.status.to_string()).yellow().bold(),
    };
    println!(
        "\nRun {} {} in {:.1}s",
        report.run_id,
        status,
        report.duration_ms as f64 / 1000.0
    );
}

/// Print job lifecycle events until the run completes.
async fn watch_events(bus: Arc<MemoryEventBus>) -> CliResult<tokio::task::JoinHandle<()>> {
    let mut events = bus.subscribe("run.>").await?;
    Ok(tokio::spawn(async move {
        while let Some(Ok(event)) = events.next().await {
            match event {
                Event::JobStarted(p) => println!("{} {}", style("▶").cyan(), p.display_name),
                Event::JobCompleted(p) => {
                    println!("{} {} {}", status_icon(p.status), p.display_name, p.status)
                }
                Event::JobCancelled(p) => {
                    println!("{} {} cancelled", status_icon(JobStatus::Cancelled), p.display_name)
                }
                Event::StepCompleted(p) => println!(
                    "    {} {} {}",
                    style("·").dim(),
                    p.job,
                    style(format!("{} ({:?})", p.step, p.status)).dim()
                ),
                Event::RunCompleted(_) => break,
                _ => {}
            }
        }
    }))
}

/// Execute a workflow locally. Returns whether the run succeeded.
pub async fn run(
    config: &GauntletConfig,
    path: Option<PathBuf>,
    event: &EventArgs,
    json: bool,
    keep_workspaces: bool,
) -> CliResult<bool> {
    let path = resolve_workflow_path(path)?;
    let workflow = load_workflow(&path)?;
    let event = build_event(event)?;
    let source_dir = std::env::current_dir()?;
    let quiet = json || config.output_format != OutputFormat::Table;

    let bus = Arc::new(MemoryEventBus::new());
    let artifacts = Arc::new(FsArtifactStore::new(&config.artifact_root));
    let environments = HostEnvironmentFactory::new(&config.workspace_root)
        .keep_workspaces(keep_workspaces || config.keep_workspaces);
    let executor = JobExecutor::new(
        Arc::new(ShellRunner::new()),
        Arc::new(environments),
        artifacts.clone(),
        bus.clone(),
    )
    .with_actions(ActionRegistry::new(config.actions.clone()))
    .with_config(config.executor_config(Some(source_dir)));

    let orchestrator = Arc::new(Orchestrator::new(
        config.orchestrator_config(),
        Arc::new(executor),
        artifacts,
        bus.clone(),
    ));

    let plan = orchestrator.plan(&workflow, &event)?;
    let run_id = plan.run_id;
    if !quiet {
        println!(
            "{} Running \"{}\" ({} instances, run {})",
            style("▶").cyan(),
            style(&workflow.name).bold(),
            plan.instances.len(),
            style(run_id).dim()
        );
    }

    let watcher = if quiet { None } else { Some(watch_events(bus.clone()).await?) };
    let interrupt = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{} Interrupted, cancelling run", style("!").yellow());
                orchestrator.cancel_run(run_id);
            }
        })
    };

    let report = orchestrator.execute(plan).await;
    interrupt.abort();
    if let Some(watcher) = watcher {
        let _ = tokio::time::timeout(Duration::from_secs(1), watcher).await;
    }
    let report = report?;

    match (json, config.output_format) {
        (true, _) | (false, OutputFormat::Json) => {
            println!("{}", serde_json::to_string_pretty(&report)?)
        }
        (false, OutputFormat::Yaml) => print!("{}", serde_yaml::to_string(&report)?),
        (false, OutputFormat::Table) => print_report(&report),
    }

    Ok(report.status.is_success())
}

/// Show configuration.
pub fn show_config(config: &GauntletConfig) -> CliResult<()> {
    println!("{}", serde_yaml::to_string(config)?);
    if let Ok(path) = GauntletConfig::config_path() {
        println!("{} {}", style("Config file:").dim(), path.display());
    }
    Ok(())
}

/// Set a configuration value.
pub fn set_config(config_path: Option<&Path>, key: &str, value: &str) -> CliResult<()> {
    let mut config = GauntletConfig::load(config_path)?;
    config.set(key, value)?;
    match config_path {
        Some(path) => std::fs::write(path, serde_yaml::to_string(&config)?)?,
        None => config.save()?,
    }
    println!("{} Set {} = {}", style("✓").green(), key, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_event_from_flags() {
        let args = EventArgs {
            event: None,
            body: Some("please /build-new-image".to_string()),
            sha: Some("cafe".to_string()),
            git_ref: Some("feature".to_string()),
        };
        let event = build_event(&args).unwrap();
        assert_eq!(event.body.as_deref(), Some("please /build-new-image"));
        assert_eq!(event.head_sha.as_deref(), Some("cafe"));
        assert_eq!(event.git_ref.as_deref(), Some("feature"));
    }

    #[test]
    fn test_build_event_from_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("event.json");
        std::fs::write(
            &path,
            r#"{"action":"synchronize","number":12,"pull_request":{"body":null,"head":{"sha":"abc","ref":"topic"},"base":{"ref":"main"}}}"#,
        )
        .unwrap();

        let args = EventArgs {
            event: Some(path),
            ..Default::default()
        };
        let event = build_event(&args).unwrap();
        assert_eq!(event.head_sha.as_deref(), Some("abc"));
        assert_eq!(event.body, None);
        assert_eq!(event.number, Some(12));
    }

    #[test]
    fn test_starter_workflow_is_valid() {
        let workflow = WorkflowDefinition::from_yaml(STARTER_WORKFLOW).unwrap();
        workflow.validate().unwrap();
        DagBuilder::new().check_jobs(&workflow).unwrap();
    }

    #[test]
    fn test_explicit_path_wins() {
        let path = resolve_workflow_path(Some(PathBuf::from("custom.yaml"))).unwrap();
        assert_eq!(path, PathBuf::from("custom.yaml"));
    }
}
