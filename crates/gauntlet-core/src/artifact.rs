//! Artifact records and naming conventions.

use crate::ids::{ArtifactId, JobInstanceId, RunId};
use crate::workflow::UploadWhen;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// A named blob produced by one job instance, scoped to its run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub run_id: RunId,
    pub name: String,
    pub producer: JobInstanceId,
    pub job: String,
    pub matrix: IndexMap<String, Value>,
    /// Location inside the artifact store.
    pub location: PathBuf,
    pub size_bytes: u64,
    pub when: UploadWhen,
    pub created_at: DateTime<Utc>,
}

/// Where a store put an uploaded artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub location: PathBuf,
    pub size_bytes: u64,
}

/// Image artifact name, e.g. `ubuntu-2204-kube-v1.27.3.qcow2`.
pub fn image_artifact_name(os: &str, kube_version: &str) -> String {
    format!("{}-kube-{}.qcow2", os, kube_version)
}

/// Conformance results bundle, e.g. `sonobuoy-results-v1.27.3.tar.gz`.
pub fn sonobuoy_results_name(kube_version: &str) -> String {
    format!("sonobuoy-results-{}.tar.gz", kube_version)
}
