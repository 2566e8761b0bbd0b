//! Append-only fork-history log, capped at [`MAX_ENTRIES`] and feeding the
//! preference service's boost computation (§4.7, §4.12).

use crate::core::{ForkHistoryEntry, PreferenceRecord};
use crate::error::Result;
use crate::util::atomic_write;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub use crate::core::MAX_ENTRIES;

/// Thread-safe, disk-backed fork-history log.
pub struct ForkHistory {
    path: PathBuf,
    entries: Mutex<VecDeque<ForkHistoryEntry>>,
}

impl ForkHistory {
    /// Loads the log from `path`, starting empty if the file is missing or
    /// unreadable.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        let entries = std::fs::read(path)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<Vec<ForkHistoryEntry>>(&bytes).ok())
            .map(VecDeque::from)
            .unwrap_or_default();
        Self { path: path.to_path_buf(), entries: Mutex::new(entries) }
    }

    fn persist(&self, guard: &VecDeque<ForkHistoryEntry>) -> Result<()> {
        let as_vec: Vec<&ForkHistoryEntry> = guard.iter().collect();
        let bytes = serde_json::to_vec_pretty(&as_vec)
            .map_err(|e| crate::error::StorageError::Serialization(e.to_string()))?;
        atomic_write(&self.path, &bytes)?;
        Ok(())
    }

    /// Appends `entry`, evicting the oldest entry past [`MAX_ENTRIES`].
    pub fn record(&self, entry: ForkHistoryEntry) -> Result<()> {
        let mut guard = self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.push_back(entry);
        while guard.len() > MAX_ENTRIES {
            guard.pop_front();
        }
        self.persist(&guard)
    }

    /// Returns up to `limit` entries, newest first.
    #[must_use]
    pub fn list(&self, limit: usize) -> Vec<ForkHistoryEntry> {
        let guard = self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.iter().rev().take(limit).cloned().collect()
    }

    /// Returns every entry for `session_id`, newest first.
    #[must_use]
    pub fn for_session(&self, session_id: &str) -> Vec<ForkHistoryEntry> {
        let guard = self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.iter().rev().filter(|e| e.session_id == session_id).cloned().collect()
    }
}

/// Aggregates `entries` (all belonging to one session) into a
/// [`PreferenceRecord`], or `None` if `entries` is empty.
#[must_use]
pub fn aggregate_preference(entries: &[ForkHistoryEntry]) -> Option<PreferenceRecord> {
    if entries.is_empty() {
        return None;
    }
    let fork_count = u32::try_from(entries.len()).unwrap_or(u32::MAX);
    let avg_position = entries.iter().map(|e| e.position as f64).sum::<f64>() / entries.len() as f64;
    let last_selected_at: DateTime<Utc> = entries.iter().map(|e| e.timestamp).max().unwrap_or_else(Utc::now);
    Some(PreferenceRecord { fork_count, avg_position, last_selected_at })
}
