//! Run status, artifact retention and per-axis summaries.

use gauntlet_core::artifact::Artifact;
use gauntlet_core::condition::render;
use gauntlet_core::ids::JobInstanceId;
use gauntlet_core::run::{AxisSummary, JobInstance, JobOutcome, JobStatus, RunStatus};
use gauntlet_core::workflow::UploadWhen;
use indexmap::IndexMap;

/// Collects terminal outcomes for the instances of one run.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    /// Every planned instance and whether it is best-effort.
    expected: IndexMap<JobInstanceId, bool>,
    outcomes: IndexMap<JobInstanceId, JobOutcome>,
}

impl ResultAggregator {
    pub fn new(instances: &[JobInstance]) -> Self {
        Self {
            expected: instances.iter().map(|i| (i.id, i.best_effort)).collect(),
            outcomes: IndexMap::new(),
        }
    }

    /// Record a terminal outcome. A later record for the same instance replaces it.
    pub fn record(&mut self, outcome: JobOutcome) {
        self.expected.entry(outcome.instance_id).or_insert(outcome.best_effort);
        self.outcomes.insert(outcome.instance_id, outcome);
    }

    pub fn outcome(&self, id: JobInstanceId) -> Option<&JobOutcome> {
        self.outcomes.get(&id)
    }

    /// Outcomes in planning order.
    pub fn outcomes(&self) -> Vec<JobOutcome> {
        self.expected
            .keys()
            .filter_map(|id| self.outcomes.get(id).cloned())
            .collect()
    }

    /// Failed if any required instance failed; Running while a required
    /// instance is outstanding; Cancelled if a required instance was
    /// cancelled; Succeeded otherwise. Best-effort instances never count.
    pub fn status(&self) -> RunStatus {
        let mut outstanding = false;
        let mut cancelled = false;

        for (id, best_effort) in &self.expected {
            if *best_effort {
                continue;
            }
            match self.outcomes.get(id).map(|o| o.status) {
                Some(JobStatus::Failed) => return RunStatus::Failed,
                Some(JobStatus::Cancelled) => cancelled = true,
                Some(JobStatus::Succeeded) => {}
                _ => outstanding = true,
            }
        }

        if outstanding {
            RunStatus::Running
        } else if cancelled {
            RunStatus::Cancelled
        } else {
            RunStatus::Succeeded
        }
    }

    /// Artifacts kept after the run: `always` uploads regardless of outcome,
    /// others only from Succeeded instances. Nothing from Cancelled instances.
    pub fn retained_artifacts(&self) -> Vec<Artifact> {
        self.partition_artifacts().0
    }

    /// Artifacts to delete from the store.
    pub fn discarded_artifacts(&self) -> Vec<Artifact> {
        self.partition_artifacts().1
    }

    fn partition_artifacts(&self) -> (Vec<Artifact>, Vec<Artifact>) {
        let mut kept = Vec::new();
        let mut discarded = Vec::new();
        for outcome in self.outcomes.values() {
            for artifact in &outcome.artifacts {
                let keep = match outcome.status {
                    JobStatus::Cancelled => false,
                    JobStatus::Succeeded => true,
                    _ => artifact.when == UploadWhen::Always,
                };
                if keep {
                    kept.push(artifact.clone());
                } else {
                    discarded.push(artifact.clone());
                }
            }
        }
        (kept, discarded)
    }

    /// Per job, per axis value, count how instances ended.
    pub fn axis_summaries(&self) -> Vec<AxisSummary> {
        let mut summaries: IndexMap<(String, String, String), AxisSummary> = IndexMap::new();

        for id in self.expected.keys() {
            let Some(outcome) = self.outcomes.get(id) else {
                continue;
            };
            for (axis, value) in &outcome.matrix {
                let value = render(value);
                let summary = summaries
                    .entry((outcome.job.clone(), axis.clone(), value.clone()))
                    .or_insert_with(|| AxisSummary {
                        job: outcome.job.clone(),
                        axis: axis.clone(),
                        value,
                        ..Default::default()
                    });
                match outcome.status {
                    JobStatus::Succeeded => summary.succeeded += 1,
                    JobStatus::Failed => summary.failed += 1,
                    JobStatus::Cancelled => summary.cancelled += 1,
                    JobStatus::Pending | JobStatus::Running => {}
                }
            }
        }

        summaries.into_values().collect()
    }
}
