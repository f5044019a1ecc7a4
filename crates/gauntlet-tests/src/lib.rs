//! Integration test infrastructure for Gauntlet.
//!
//! Orchestration tests run against a [`ScriptedRunner`] so that exit codes,
//! durations and cancellation points are deterministic. Shell-level tests use
//! [`TestContext::with_shell`].
//!
//! # Usage
//!
//! ```ignore
//! use gauntlet_tests::{TestContext, WorkflowFixture, EventFixture};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let ctx = TestContext::new();
//!     let report = ctx
//!         .orchestrator
//!         .run(&WorkflowFixture::demo(), EventFixture::pull_request())
//!         .await
//!         .unwrap();
//! }
//! ```

pub mod context;
pub mod fixtures;
pub mod helpers;

pub use context::TestContext;
pub use fixtures::*;
pub use helpers::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,gauntlet_scheduler=debug")),
        )
        .with_test_writer()
        .try_init();
}
