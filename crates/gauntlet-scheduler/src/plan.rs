//! Resolving a workflow and a trigger event into job instances.

use crate::dag::{DagBuilder, InstanceDag};
use crate::matrix::MatrixExpander;
use gauntlet_core::Result;
use gauntlet_core::condition::evaluate_str;
use gauntlet_core::event::TriggerEvent;
use gauntlet_core::ids::{JobInstanceId, RunId};
use gauntlet_core::interpolation::InterpolationContext;
use gauntlet_core::run::JobInstance;
use gauntlet_core::workflow::WorkflowDefinition;
use tracing::{debug, info};

/// Everything needed to execute one run.
#[derive(Debug)]
pub struct RunPlan {
    pub run_id: RunId,
    pub workflow: WorkflowDefinition,
    pub event: TriggerEvent,
    /// Instances in workflow order, cells in matrix order.
    pub instances: Vec<JobInstance>,
    /// Instances whose condition was false, by display name.
    pub skipped: Vec<String>,
    pub dag: InstanceDag,
    /// Run-level concurrency key, interpolated against the event.
    pub concurrency_group: Option<String>,
    pub cancel_in_progress: bool,
}

impl RunPlan {
    pub fn instance(&self, display_name: &str) -> Option<&JobInstance> {
        self.instances
            .iter()
            .find(|i| i.display_name == display_name)
    }

    pub fn instance_by_id(&self, id: JobInstanceId) -> Option<&JobInstance> {
        self.instances.iter().find(|i| i.id == id)
    }

    pub fn instances_of<'a>(&'a self, job: &'a str) -> impl Iterator<Item = &'a JobInstance> + 'a {
        self.instances.iter().filter(move |i| i.job == job)
    }
}

/// Builds run plans.
pub struct Planner {
    expander: MatrixExpander,
    dag_builder: DagBuilder,
}

impl Planner {
    pub fn new() -> Self {
        Self {
            expander: MatrixExpander::new(),
            dag_builder: DagBuilder::new(),
        }
    }

    /// Whether the workflow's `on:` block accepts the event. A workflow
    /// without one accepts everything.
    pub fn triggers(&self, workflow: &WorkflowDefinition, event: &TriggerEvent) -> bool {
        workflow.on.as_ref().is_none_or(|on| on.matches(event))
    }

    /// Expand every job, evaluate conditions and build the dependency graph.
    pub fn plan(&self, workflow: &WorkflowDefinition, event: &TriggerEvent) -> Result<RunPlan> {
        workflow.validate()?;
        self.dag_builder.check_jobs(workflow)?;

        let run_id = RunId::new();
        let mut instances = Vec::new();
        let mut skipped = Vec::new();

        for (job_name, job) in &workflow.jobs {
            let mut env = workflow.env.clone();
            env.extend(job.env.iter().map(|(k, v)| (k.clone(), v.clone())));

            for cell in self.expander.expand(job_name, job.matrix()) {
                let ctx = InterpolationContext {
                    env: env.clone(),
                    ..InterpolationContext::for_event(event.clone())
                }
                .with_matrix(cell.values.clone());

                if let Some(condition) = &job.condition
                    && !evaluate_str(condition, &ctx)
                {
                    debug!(instance = %cell.display_name, condition = %condition, "Condition false, skipping");
                    skipped.push(cell.display_name);
                    continue;
                }

                let concurrency_group = job
                    .concurrency
                    .as_ref()
                    .map(|c| ctx.interpolate(&c.group));

                instances.push(JobInstance {
                    id: JobInstanceId::new(),
                    run_id,
                    job: job_name.clone(),
                    display_name: cell.display_name,
                    runs_on: ctx.interpolate(&job.runs_on),
                    env: env.clone(),
                    concurrency_group,
                    cancel_in_progress: job.concurrency.as_ref().is_some_and(|c| c.cancel_in_progress),
                    timeout_minutes: job.timeout_minutes,
                    best_effort: job.continue_on_error,
                    definition: job.clone(),
                    matrix: cell.values,
                });
            }
        }

        let dag = self.dag_builder.build(workflow, &instances, event)?;

        let run_ctx = InterpolationContext {
            env: workflow.env.clone(),
            ..InterpolationContext::for_event(event.clone())
        };
        let concurrency_group = workflow
            .concurrency
            .as_ref()
            .map(|c| run_ctx.interpolate(&c.group));

        info!(
            run_id = %run_id,
            workflow = %workflow.name,
            instances = instances.len(),
            skipped = skipped.len(),
            "Planned run"
        );

        Ok(RunPlan {
            run_id,
            workflow: workflow.clone(),
            event: event.clone(),
            instances,
            skipped,
            dag,
            concurrency_group,
            cancel_in_progress: workflow
                .concurrency
                .as_ref()
                .is_some_and(|c| c.cancel_in_progress),
        })
    }
}

impl Default for Planner {
    fn default() -> Self {
        Self::new()
    }
}
