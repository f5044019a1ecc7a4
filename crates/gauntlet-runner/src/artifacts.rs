//! Filesystem-backed artifact store.

use async_trait::async_trait;
use gauntlet_core::artifact::StoredArtifact;
use gauntlet_core::ids::RunId;
use gauntlet_core::ports::ArtifactStore;
use gauntlet_core::{Error, Result};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Stores artifacts as plain files under `<root>/<run_id>/<name>`.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn location(&self, run_id: RunId, name: &str) -> Result<PathBuf> {
        let name_path = Path::new(name);
        let plain = !name.is_empty()
            && name_path
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !plain {
            return Err(Error::ArtifactUploadFailed(format!(
                "invalid artifact name `{}`",
                name
            )));
        }
        Ok(self.root.join(run_id.to_string()).join(name_path))
    }
}

/// Copy a file or directory tree, returning the number of bytes copied.
pub async fn copy_tree(source: &Path, dest: &Path) -> Result<u64> {
    let metadata = tokio::fs::metadata(source).await?;
    if metadata.is_file() {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        return Ok(tokio::fs::copy(source, dest).await?);
    }

    let mut total = 0;
    let mut pending = vec![(source.to_path_buf(), dest.to_path_buf())];
    while let Some((from, to)) = pending.pop() {
        tokio::fs::create_dir_all(&to).await?;
        let mut entries = tokio::fs::read_dir(&from).await?;
        while let Some(entry) = entries.next_entry().await? {
            let target = to.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                pending.push((entry.path(), target));
            } else {
                total += tokio::fs::copy(entry.path(), &target).await?;
            }
        }
    }
    Ok(total)
}

async fn remove_path(path: &Path) -> std::io::Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(e) => Err(e),
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(&self, run_id: RunId, name: &str, source: &Path) -> Result<StoredArtifact> {
        let location = self.location(run_id, name)?;
        if !tokio::fs::try_exists(source).await.unwrap_or(false) {
            return Err(Error::ArtifactUploadFailed(format!(
                "{}: {} does not exist",
                name,
                source.display()
            )));
        }

        // Re-uploading a name within one run replaces the earlier artifact.
        if tokio::fs::try_exists(&location).await.unwrap_or(false) {
            remove_path(&location).await?;
        }

        let size_bytes = copy_tree(source, &location)
            .await
            .map_err(|e| Error::ArtifactUploadFailed(format!("{}: {}", name, e)))?;

        info!(run_id = %run_id, artifact = %name, size_bytes, "Stored artifact");
        Ok(StoredArtifact {
            location,
            size_bytes,
        })
    }

    async fn get(&self, run_id: RunId, name: &str, dest: &Path) -> Result<()> {
        let location = self.location(run_id, name)?;
        if !tokio::fs::try_exists(&location).await.unwrap_or(false) {
            return Err(Error::ArtifactNotFound(format!("{} (run {})", name, run_id)));
        }
        let bytes = copy_tree(&location, dest).await?;
        debug!(run_id = %run_id, artifact = %name, dest = %dest.display(), bytes, "Fetched artifact");
        Ok(())
    }

    async fn delete(&self, run_id: RunId, name: &str) -> Result<()> {
        let location = self.location(run_id, name)?;
        match remove_path(&location).await {
            Ok(()) => {
                info!(run_id = %run_id, artifact = %name, "Deleted artifact");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, run_id: RunId) -> Result<Vec<String>> {
        let dir = self.root.join(run_id.to_string());
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }
}
