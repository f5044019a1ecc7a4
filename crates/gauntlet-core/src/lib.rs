//! Gauntlet Core
//!
//! Workflow model, expression language, and the shared vocabulary used by
//! the scheduler, runner and CLI crates.

pub mod artifact;
pub mod cancel;
pub mod condition;
pub mod error;
pub mod event;
pub mod events;
pub mod ids;
pub mod interpolation;
pub mod ports;
pub mod run;
pub mod workflow;

pub use error::{Error, Result};
pub use ids::*;
