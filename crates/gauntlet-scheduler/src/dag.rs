//! Dependency graph over job instances.
//!
//! `needs` and `wait` both become edges from the upstream instance to the
//! waiting one, so unknown targets and cycles are rejected before a run
//! starts.

use gauntlet_core::condition::render;
use gauntlet_core::event::TriggerEvent;
use gauntlet_core::ids::JobInstanceId;
use gauntlet_core::interpolation::InterpolationContext;
use gauntlet_core::run::JobInstance;
use gauntlet_core::workflow::WorkflowDefinition;
use indexmap::IndexMap;
use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum DagError {
    #[error("Cycle detected in job dependencies at `{0}`")]
    CycleDetected(String),
    #[error("Unknown job `{job}` referenced by `{from}`")]
    UnknownJob { from: String, job: String },
    #[error("Workflow has no jobs")]
    EmptyWorkflow,
}

impl From<DagError> for gauntlet_core::Error {
    fn from(err: DagError) -> Self {
        match err {
            DagError::CycleDetected(job) => gauntlet_core::Error::DependencyCycle(job),
            DagError::UnknownJob { from, job } => gauntlet_core::Error::UnknownJob { from, job },
            DagError::EmptyWorkflow => {
                gauntlet_core::Error::InvalidWorkflow("workflow has no jobs".into())
            }
        }
    }
}

/// A job instance in the graph.
#[derive(Debug, Clone)]
pub struct DagNode {
    pub instance_id: JobInstanceId,
    pub job: String,
    pub display_name: String,
}

/// Edge from an upstream instance to the instance waiting on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitEdge {
    pub ignore_failure: bool,
}

/// Directed acyclic graph of job instances.
#[derive(Debug, Default)]
pub struct InstanceDag {
    graph: DiGraph<DagNode, WaitEdge>,
    index: HashMap<JobInstanceId, NodeIndex>,
}

impl InstanceDag {
    /// Instances with nothing to wait for.
    pub fn roots(&self) -> Vec<&DagNode> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .filter_map(|idx| self.graph.node_weight(idx))
            .collect()
    }

    /// Instances that must be terminal before `id` may start.
    pub fn upstream(&self, id: JobInstanceId) -> Vec<(&DagNode, WaitEdge)> {
        let Some(&idx) = self.index.get(&id) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(idx, Direction::Incoming)
            .filter_map(|edge| {
                self.graph
                    .node_weight(edge.source())
                    .map(|node| (node, *edge.weight()))
            })
            .collect()
    }

    /// Instances waiting on `id`.
    pub fn downstream(&self, id: JobInstanceId) -> Vec<&DagNode> {
        self.index
            .get(&id)
            .map(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Outgoing)
                    .filter_map(|n| self.graph.node_weight(n))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn topological_order(&self) -> Result<Vec<&DagNode>, DagError> {
        toposort(&self.graph, None)
            .map(|indices| {
                indices
                    .iter()
                    .filter_map(|&idx| self.graph.node_weight(idx))
                    .collect()
            })
            .map_err(|cycle| {
                let job = self
                    .graph
                    .node_weight(cycle.node_id())
                    .map(|n| n.job.clone())
                    .unwrap_or_default();
                DagError::CycleDetected(job)
            })
    }

    /// All edges as (upstream, downstream, edge).
    pub fn edges(&self) -> Vec<(&DagNode, &DagNode, WaitEdge)> {
        self.graph
            .edge_indices()
            .filter_map(|e| {
                let (from, to) = self.graph.edge_endpoints(e)?;
                Some((
                    self.graph.node_weight(from)?,
                    self.graph.node_weight(to)?,
                    *self.graph.edge_weight(e)?,
                ))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }
}

/// Builder for instance graphs.
pub struct DagBuilder;

impl DagBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Reject unknown targets and cycles at the job level.
    ///
    /// This catches cycles between jobs even when a condition would skip
    /// one of them for a particular event.
    pub fn check_jobs(&self, workflow: &WorkflowDefinition) -> Result<(), DagError> {
        if workflow.jobs.is_empty() {
            return Err(DagError::EmptyWorkflow);
        }

        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let mut name_to_index = HashMap::new();
        for name in workflow.jobs.keys() {
            name_to_index.insert(name.as_str(), graph.add_node(name.as_str()));
        }

        for (name, job) in &workflow.jobs {
            let job_idx = name_to_index[name.as_str()];
            for dep in dependency_names(job) {
                let dep_idx = name_to_index.get(dep).ok_or_else(|| DagError::UnknownJob {
                    from: name.clone(),
                    job: dep.to_string(),
                })?;
                graph.update_edge(*dep_idx, job_idx, ());
            }
        }

        toposort(&graph, None).map_err(|cycle| {
            DagError::CycleDetected(
                graph
                    .node_weight(cycle.node_id())
                    .map(|s| s.to_string())
                    .unwrap_or_default(),
            )
        })?;
        Ok(())
    }

    /// Build the instance graph for one run.
    ///
    /// Wait selectors are interpolated against the waiting instance's own
    /// matrix. A selector that matches nothing (typically because the target
    /// job was skipped by its condition) adds no edge.
    pub fn build(
        &self,
        workflow: &WorkflowDefinition,
        instances: &[JobInstance],
        event: &TriggerEvent,
    ) -> Result<InstanceDag, DagError> {
        self.check_jobs(workflow)?;

        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        let mut by_job: HashMap<&str, Vec<&JobInstance>> = HashMap::new();

        for instance in instances {
            let idx = graph.add_node(DagNode {
                instance_id: instance.id,
                job: instance.job.clone(),
                display_name: instance.display_name.clone(),
            });
            index.insert(instance.id, idx);
            by_job.entry(instance.job.as_str()).or_default().push(instance);
        }

        for instance in instances {
            let to = index[&instance.id];
            let job = &instance.definition;

            for need in &job.needs {
                let targets = by_job.get(need.as_str()).map(Vec::as_slice).unwrap_or(&[]);
                if targets.is_empty() {
                    info!(
                        instance = %instance.display_name,
                        target = %need,
                        "Needed job has no instances in this run, treating as satisfied"
                    );
                }
                for target in targets {
                    add_edge(&mut graph, index[&target.id], to, false);
                }
            }

            let Some(wait) = &job.wait else { continue };
            let ctx = InterpolationContext {
                env: instance.env.clone(),
                ..InterpolationContext::for_event(event.clone())
            }
            .with_matrix(instance.matrix.clone());

            for target in &wait.targets {
                let selector: IndexMap<String, Value> = target
                    .matrix
                    .iter()
                    .map(|(k, v)| (k.clone(), ctx.interpolate_value(v)))
                    .collect();
                let candidates = by_job.get(target.job.as_str()).map(Vec::as_slice).unwrap_or(&[]);
                let matched: Vec<&&JobInstance> = candidates
                    .iter()
                    .filter(|c| selector_matches(&selector, &c.matrix))
                    .collect();

                if matched.is_empty() {
                    if candidates.is_empty() {
                        info!(
                            instance = %instance.display_name,
                            target = %target.job,
                            "Wait target was skipped in this run, treating as satisfied"
                        );
                    } else {
                        warn!(
                            instance = %instance.display_name,
                            target = %target.job,
                            selector = ?selector,
                            "Wait selector matches no instance, treating as satisfied"
                        );
                    }
                }
                for upstream in matched {
                    add_edge(
                        &mut graph,
                        index[&upstream.id],
                        to,
                        wait.ignore_upstream_failure,
                    );
                }
            }
        }

        let dag = InstanceDag { graph, index };
        dag.topological_order()?;
        Ok(dag)
    }
}

impl Default for DagBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn dependency_names(job: &gauntlet_core::workflow::JobDefinition) -> impl Iterator<Item = &str> {
    job.needs.iter().map(String::as_str).chain(
        job.wait
            .iter()
            .flat_map(|w| w.targets.iter().map(|t| t.job.as_str())),
    )
}

/// A failure-tolerant edge never overrides a strict one between the same pair.
fn add_edge(
    graph: &mut DiGraph<DagNode, WaitEdge>,
    from: NodeIndex,
    to: NodeIndex,
    ignore_failure: bool,
) {
    match graph.find_edge(from, to) {
        Some(existing) => {
            if let Some(weight) = graph.edge_weight_mut(existing) {
                weight.ignore_failure &= ignore_failure;
            }
        }
        None => {
            graph.add_edge(from, to, WaitEdge { ignore_failure });
        }
    }
}

/// Values are compared by their rendered form, so `"3.10"` matches `3.10`.
fn selector_matches(selector: &IndexMap<String, Value>, cell: &IndexMap<String, Value>) -> bool {
    selector.iter().all(|(key, wanted)| {
        cell.get(key)
            .is_some_and(|actual| render(actual) == render(wanted))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Planner;

    const WAITING: &str = r#"
name: images
jobs:
  build-image:
    runs-on: ubuntu-22.04
    strategy:
      matrix:
        kube: [v1.25.11, v1.26.6, v1.27.3, v1.28.0]
    steps:
      - run: build
  functional:
    runs-on: ubuntu-22.04
    wait:
      on:
        - job: build-image
          matrix:
            kube: ${{ matrix.kube }}
    strategy:
      matrix:
        kube: [v1.25.11, v1.26.6, v1.27.3, v1.28.0]
    steps:
      - run: test
  report:
    runs-on: ubuntu-22.04
    needs: [build-image]
    steps:
      - run: report
"#;

    fn workflow(yaml: &str) -> WorkflowDefinition {
        WorkflowDefinition::from_yaml(yaml).unwrap()
    }

    #[test]
    fn test_selector_interpolates_own_matrix() {
        let plan = Planner::new()
            .plan(&workflow(WAITING), &TriggerEvent::pull_request("r", "s"))
            .unwrap();

        let functional = plan
            .instance("functional (kube=v1.26.6)")
            .expect("functional instance");
        let upstream = plan.dag.upstream(functional.id);
        assert_eq!(upstream.len(), 1);
        assert_eq!(upstream[0].0.display_name, "build-image (kube=v1.26.6)");
        assert!(!upstream[0].1.ignore_failure);
    }

    #[test]
    fn test_needs_waits_on_all_cells() {
        let plan = Planner::new()
            .plan(&workflow(WAITING), &TriggerEvent::pull_request("r", "s"))
            .unwrap();

        let report = plan.instance("report").unwrap();
        assert_eq!(plan.dag.upstream(report.id).len(), 4);
        assert_eq!(plan.dag.roots().len(), 4);
    }

    #[test]
    fn test_cycle_rejected() {
        let yaml = r#"
name: cyclic
jobs:
  a:
    runs-on: x
    needs: [b]
    steps: [{ run: a }]
  b:
    runs-on: x
    wait:
      on:
        - job: a
    steps: [{ run: b }]
"#;
        let err = DagBuilder::new().check_jobs(&workflow(yaml)).unwrap_err();
        assert!(matches!(err, DagError::CycleDetected(_)));
    }

    #[test]
    fn test_self_wait_rejected() {
        let yaml = r#"
name: selfish
jobs:
  a:
    runs-on: x
    needs: [a]
    steps: [{ run: a }]
"#;
        assert!(matches!(
            DagBuilder::new().check_jobs(&workflow(yaml)),
            Err(DagError::CycleDetected(_))
        ));
    }

    #[test]
    fn test_unknown_target_rejected() {
        let yaml = r#"
name: dangling
jobs:
  a:
    runs-on: x
    wait:
      on:
        - job: ghost
    steps: [{ run: a }]
"#;
        assert!(matches!(
            DagBuilder::new().check_jobs(&workflow(yaml)),
            Err(DagError::UnknownJob { .. })
        ));
    }

    #[test]
    fn test_strict_edge_wins() {
        let yaml = r#"
name: both
jobs:
  a:
    runs-on: x
    steps: [{ run: a }]
  b:
    runs-on: x
    needs: [a]
    wait:
      ignore-upstream-failure: true
      on:
        - job: a
    steps: [{ run: b }]
"#;
        let plan = Planner::new()
            .plan(&workflow(yaml), &TriggerEvent::pull_request("r", "s"))
            .unwrap();
        let b = plan.instance("b").unwrap();
        let upstream = plan.dag.upstream(b.id);
        assert_eq!(upstream.len(), 1);
        assert!(!upstream[0].1.ignore_failure);
    }
}
