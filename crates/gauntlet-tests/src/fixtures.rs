//! Test fixtures for workflows and trigger events.

use gauntlet_core::event::TriggerEvent;
use gauntlet_core::workflow::WorkflowDefinition;

/// The bundled magnum-cluster-api demo workflow.
pub const DEMO_WORKFLOW: &str = include_str!("../../../demos/magnum-cluster-api.yaml");

/// Kubernetes versions exercised by the fan-out fixtures.
pub const KUBE_VERSIONS: [&str; 4] = ["v1.25.11", "v1.26.6", "v1.27.3", "v1.28.0"];

/// Factory for test workflows.
pub struct WorkflowFixture;

impl WorkflowFixture {
    pub fn parse(yaml: &str) -> WorkflowDefinition {
        let workflow = WorkflowDefinition::from_yaml(yaml).expect("fixture workflow parses");
        workflow.validate().expect("fixture workflow is valid");
        workflow
    }

    pub fn demo() -> WorkflowDefinition {
        Self::parse(DEMO_WORKFLOW)
    }

    /// One job with three sequential steps: `step-one`, `step-two`, `step-three`.
    /// `step-two` is `continue-on-error` when `best_effort` is set.
    pub fn three_steps(best_effort: bool) -> WorkflowDefinition {
        Self::parse(&format!(
            r#"
name: three-steps
jobs:
  unit:
    runs-on: local
    steps:
      - run: step-one
      - run: step-two
        continue-on-error: {}
      - run: step-three
"#,
            best_effort
        ))
    }

    /// `build` over the four Kubernetes versions; `functional` waits on all
    /// of them.
    pub fn kube_fanout(ignore_upstream_failure: bool) -> WorkflowDefinition {
        Self::parse(&format!(
            r#"
name: fanout
jobs:
  build:
    runs-on: local
    strategy:
      matrix:
        kube: [v1.25.11, v1.26.6, v1.27.3, v1.28.0]
    steps:
      - run: build ${{{{ matrix.kube }}}}
  functional:
    runs-on: local
    wait:
      on:
        - job: build
      ignore-upstream-failure: {}
    steps:
      - run: functional
"#,
            ignore_upstream_failure
        ))
    }

    /// Per-version image builds sharing a cancel-in-progress concurrency
    /// group keyed on the version.
    pub fn superseding_image_build() -> WorkflowDefinition {
        Self::parse(
            r#"
name: images
jobs:
  build-image:
    runs-on: local
    concurrency:
      group: image-${{ matrix.kube }}
      cancel-in-progress: true
    strategy:
      matrix:
        kube: [v1.27.3]
    steps:
      - run: image-builder ${{ matrix.kube }}
        upload:
          name: ubuntu-2204-kube-${{ matrix.kube }}.qcow2
          path: out/image.qcow2
      - run: publish ${{ github.sha }}
"#,
        )
    }

    /// Five-cell matrix job, optionally best-effort.
    pub fn five_cells(best_effort: bool) -> WorkflowDefinition {
        Self::parse(&format!(
            r#"
name: five
jobs:
  conformance:
    runs-on: local
    continue-on-error: {}
    strategy:
      matrix:
        kube: [v1.24.0, v1.25.11, v1.26.6, v1.27.3, v1.28.0]
    steps:
      - run: conformance ${{{{ matrix.kube }}}}
"#,
            best_effort
        ))
    }
}

/// Factory for trigger events.
pub struct EventFixture;

impl EventFixture {
    pub fn pull_request() -> TriggerEvent {
        TriggerEvent::pull_request("refs/pull/42/merge", "0123456789abcdef")
    }

    pub fn with_body(body: &str) -> TriggerEvent {
        Self::pull_request().with_body(body)
    }

    pub fn with_sha(sha: &str) -> TriggerEvent {
        TriggerEvent::pull_request("refs/pull/42/merge", sha)
    }
}
