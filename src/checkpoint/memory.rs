//! In-memory checkpoint store for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::CheckpointError;

use super::{Checkpoint, CheckpointStore};

/// Checkpoint store backed by a process-local map.
///
/// Provides the same atomicity guarantee trivially (puts happen under one
/// lock) and a failure toggle for exercising the degraded automatic-save
/// path.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    runs: Mutex<HashMap<String, Vec<Checkpoint>>>,
    fail_puts: AtomicBool,
}

impl MemoryCheckpointStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent `put` calls fail, simulating a store outage.
    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Returns how many checkpoints are held for a run.
    pub fn version_count(&self, run_id: &str) -> usize {
        self.runs
            .lock()
            .unwrap()
            .get(run_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn put(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(CheckpointError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "simulated store outage",
            )));
        }
        let mut runs = self.runs.lock().unwrap();
        runs.entry(checkpoint.run_id.clone())
            .or_default()
            .push(checkpoint.clone());
        Ok(())
    }

    async fn latest(&self, run_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let runs = self.runs.lock().unwrap();
        Ok(runs
            .get(run_id)
            .and_then(|versions| versions.iter().max_by_key(|cp| cp.version))
            .cloned())
    }

    async fn delete_run(&self, run_id: &str) -> Result<(), CheckpointError> {
        self.runs.lock().unwrap().remove(run_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn checkpoint(run_id: &str, version: u64) -> Checkpoint {
        Checkpoint {
            run_id: run_id.to_string(),
            phase: "test".to_string(),
            version,
            completed_ids: Default::default(),
            in_flight_metadata: Default::default(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_latest_picks_highest_version() {
        let store = MemoryCheckpointStore::new();
        store.put(&checkpoint("run", 1)).await.unwrap();
        store.put(&checkpoint("run", 3)).await.unwrap();
        store.put(&checkpoint("run", 2)).await.unwrap();

        let latest = store.latest("run").await.unwrap().unwrap();
        assert_eq!(latest.version, 3);
        assert_eq!(store.version_count("run"), 3);
    }

    #[tokio::test]
    async fn test_missing_run_is_none() {
        let store = MemoryCheckpointStore::new();
        assert!(store.latest("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fail_toggle() {
        let store = MemoryCheckpointStore::new();
        store.set_fail_puts(true);
        assert!(store.put(&checkpoint("run", 1)).await.is_err());

        store.set_fail_puts(false);
        assert!(store.put(&checkpoint("run", 1)).await.is_ok());
    }
}
