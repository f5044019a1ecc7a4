//! Run planning and orchestration for Gauntlet.
//!
//! A workflow plus a trigger event becomes a [`plan::RunPlan`]: matrix cells
//! expanded, conditions evaluated, waits resolved into a dependency graph.
//! The [`orchestrator::Orchestrator`] then drives every instance to a
//! terminal state.

pub mod aggregator;
pub mod bus;
pub mod concurrency;
pub mod dag;
pub mod matrix;
pub mod orchestrator;
pub mod plan;
pub mod pool;
pub mod waiter;

pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use plan::{Planner, RunPlan};
