//! Resumable progress state for the bulk-setup orchestrator.

use crate::error::Result;
use crate::util::atomic_write;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Persisted record of setup progress, written after every session so a
/// crash or interruption can resume without redoing completed work.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetupState {
    /// Paths that completed indexing successfully.
    pub processed_paths: HashSet<String>,
    /// Paths that exceeded the per-session deadline.
    pub timed_out_paths: HashSet<String>,
    /// Paths that failed, keyed to the failure reason.
    pub failed_paths: HashMap<String, String>,
}

impl SetupState {
    /// Loads state from `path`, returning a fresh empty state if the file
    /// is missing or unreadable.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        std::fs::read(path)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default()
    }

    /// Atomically rewrites `path` with the current state.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the rename fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| crate::error::StorageError::Serialization(e.to_string()))?;
        atomic_write(path, &bytes)?;
        Ok(())
    }

    /// Marks `path` processed, clearing any stale timeout/failure record.
    pub fn mark_processed(&mut self, path: &str) {
        self.processed_paths.insert(path.to_string());
        self.timed_out_paths.remove(path);
        self.failed_paths.remove(path);
    }

    /// Marks `path` as having exceeded the cooperative deadline.
    pub fn mark_timed_out(&mut self, path: &str) {
        self.timed_out_paths.insert(path.to_string());
    }

    /// Marks `path` as failed with `reason`.
    pub fn mark_failed(&mut self, path: &str, reason: String) {
        self.failed_paths.insert(path.to_string(), reason);
    }

    /// Returns whether `path` was already processed.
    #[must_use]
    pub fn is_processed(&self, path: &str) -> bool {
        self.processed_paths.contains(path)
    }

    /// Moves every timed-out path back into the work queue by clearing the
    /// record (used by `retry_timeouts`).
    pub fn clear_timeouts(&mut self) -> Vec<String> {
        self.timed_out_paths.drain().collect()
    }
}

/// Default state-file path under a storage root.
#[must_use]
pub fn default_state_path(storage_dir: &Path) -> PathBuf {
    storage_dir.join("setup_state.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let state = SetupState::load(&dir.path().join("missing.json"));
        assert!(state.processed_paths.is_empty());
    }

    #[test]
    fn test_save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("setup_state.json");
        let mut state = SetupState::default();
        state.mark_processed("a.jsonl");
        state.mark_failed("b.jsonl", "boom".to_string());
        state.save(&path).unwrap();

        let loaded = SetupState::load(&path);
        assert!(loaded.is_processed("a.jsonl"));
        assert_eq!(loaded.failed_paths.get("b.jsonl").unwrap(), "boom");
    }

    #[test]
    fn test_mark_processed_clears_prior_timeout() {
        let mut state = SetupState::default();
        state.mark_timed_out("a.jsonl");
        state.mark_processed("a.jsonl");
        assert!(!state.timed_out_paths.contains("a.jsonl"));
        assert!(state.is_processed("a.jsonl"));
    }

    #[test]
    fn test_clear_timeouts_drains_and_returns() {
        let mut state = SetupState::default();
        state.mark_timed_out("a.jsonl");
        state.mark_timed_out("b.jsonl");
        let drained = state.clear_timeouts();
        assert_eq!(drained.len(), 2);
        assert!(state.timed_out_paths.is_empty());
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("setup_state.json");
        std::fs::write(&path, b"not json").unwrap();
        let state = SetupState::load(&path);
        assert!(state.processed_paths.is_empty());
    }
}
