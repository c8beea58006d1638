//! File-based checkpoint store.
//!
//! Layout: one directory per run under the store root, one JSON file per
//! checkpoint version (`checkpoint-v{version}.json`). Writes go to a
//! temporary file in the same directory and become visible only via rename,
//! so a reader never observes a partial checkpoint.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::error::CheckpointError;

use super::{Checkpoint, CheckpointStore};

const FILE_PREFIX: &str = "checkpoint-v";
const FILE_SUFFIX: &str = ".json";

/// Checkpoint store persisting JSON files under a root directory.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    /// Creates a store rooted at the given directory. The directory is
    /// created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(run_id)
    }

    fn version_path(&self, run_id: &str, version: u64) -> PathBuf {
        self.run_dir(run_id)
            .join(format!("{FILE_PREFIX}{version}{FILE_SUFFIX}"))
    }

    fn parse_version(path: &Path) -> Option<u64> {
        let name = path.file_name()?.to_str()?;
        name.strip_prefix(FILE_PREFIX)?
            .strip_suffix(FILE_SUFFIX)?
            .parse()
            .ok()
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn put(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let dir = self.run_dir(&checkpoint.run_id);
        tokio::fs::create_dir_all(&dir).await?;

        let payload = serde_json::to_vec_pretty(checkpoint)?;
        // Staging file in the same directory so rename stays on one
        // filesystem.
        let tmp = dir.join(format!(".tmp-{}", Uuid::new_v4()));
        tokio::fs::write(&tmp, payload).await?;

        let target = self.version_path(&checkpoint.run_id, checkpoint.version);
        tokio::fs::rename(&tmp, &target).await?;
        debug!(
            run_id = %checkpoint.run_id,
            version = checkpoint.version,
            path = %target.display(),
            "Checkpoint file written"
        );
        Ok(())
    }

    async fn latest(&self, run_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let dir = self.run_dir(run_id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut best: Option<(u64, PathBuf)> = None;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if let Some(version) = Self::parse_version(&path) {
                if best.as_ref().is_none_or(|(v, _)| version > *v) {
                    best = Some((version, path));
                }
            }
        }

        let Some((version, path)) = best else {
            return Ok(None);
        };
        let bytes = tokio::fs::read(&path).await?;
        let checkpoint: Checkpoint = serde_json::from_slice(&bytes)?;
        if checkpoint.version != version {
            return Err(CheckpointError::Corrupt {
                run_id: run_id.to_string(),
                reason: format!(
                    "file {} claims version {} in its payload",
                    path.display(),
                    checkpoint.version
                ),
            });
        }
        Ok(Some(checkpoint))
    }

    async fn delete_run(&self, run_id: &str) -> Result<(), CheckpointError> {
        match tokio::fs::remove_dir_all(self.run_dir(run_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
