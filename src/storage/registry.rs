//! Session registry: the durable `{id: Session}` map, persisted as one JSON
//! document written atomically.

use crate::core::Session;
use crate::error::{Result, StorageError};
use crate::util::atomic_write;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// On-disk shape of `session-registry.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegistryDocument {
    version: u32,
    last_synced: Option<DateTime<Utc>>,
    sessions: HashMap<String, Session>,
}

impl Default for RegistryDocument {
    fn default() -> Self {
        Self {
            version: 1,
            last_synced: None,
            sessions: HashMap::new(),
        }
    }
}

/// Optional filters for [`SessionRegistry::list`].
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// Restrict to an exact project label.
    pub project: Option<String>,
    /// Restrict to sessions carrying this tag.
    pub tag: Option<String>,
    /// Restrict to sessions with this archived flag.
    pub archived: Option<bool>,
}

impl ListFilter {
    fn matches(&self, session: &Session) -> bool {
        if let Some(project) = &self.project {
            if &session.project != project {
                return false;
            }
        }
        if let Some(tag) = &self.tag {
            if !session.tags.contains(tag) {
                return false;
            }
        }
        if let Some(archived) = self.archived {
            if session.archived != archived {
                return false;
            }
        }
        true
    }
}

/// Aggregate counts over the registry, per §4.6 `get_stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistryStats {
    /// Total number of registered sessions.
    pub session_count: usize,
    /// Sessions currently archived.
    pub archived_count: usize,
    /// Sum of `chunk_count` across all sessions.
    pub total_chunks: usize,
}

/// A single-mutex-serialized, JSON-backed session registry.
///
/// All operations take the lock only for the duration of the in-memory
/// mutation plus the atomic write; callers must never hold a reference into
/// the registry across an embedding or vector-store call.
pub struct SessionRegistry {
    path: PathBuf,
    document: Mutex<RegistryDocument>,
}

impl SessionRegistry {
    /// Loads the registry from `path`, starting empty if the file is
    /// missing or fails to parse.
    ///
    /// # Errors
    ///
    /// Returns an error only if `path` exists but cannot be read at all.
    pub fn load(path: &Path) -> Result<Self> {
        let document = if path.exists() {
            let bytes = std::fs::read(path)
                .map_err(|e| StorageError::RegistryCorrupt(format!("read failed: {e}")))?;
            serde_json::from_slice(&bytes).unwrap_or_default()
        } else {
            RegistryDocument::default()
        };
        Ok(Self {
            path: path.to_path_buf(),
            document: Mutex::new(document),
        })
    }

    fn persist(&self, document: &RegistryDocument) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(document)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        atomic_write(&self.path, &bytes)
            .map_err(|e| StorageError::Unavailable(format!("registry write failed: {e}")))?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, RegistryDocument>> {
        self.document
            .lock()
            .map_err(|_| StorageError::Unavailable("registry lock poisoned".to_string()).into())
    }

    /// Inserts or fully replaces a session record.
    ///
    /// # Errors
    ///
    /// Returns an error if the write to disk fails.
    pub fn add(&self, session: Session) -> Result<()> {
        let mut doc = self.lock()?;
        doc.sessions.insert(session.session_id.clone(), session);
        self.persist(&doc)
    }

    /// Fetches a session by id.
    ///
    /// # Errors
    ///
    /// Returns an error only if the internal lock is poisoned.
    pub fn get(&self, session_id: &str) -> Result<Option<Session>> {
        let doc = self.lock()?;
        Ok(doc.sessions.get(session_id).cloned())
    }

    /// Applies `update` to the session's current state if present, then
    /// persists. Returns `Ok(None)` (no-op, no write) if the session is
    /// absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the write to disk fails.
    pub fn update<F>(&self, session_id: &str, update: F) -> Result<Option<Session>>
    where
        F: FnOnce(&mut Session),
    {
        let mut doc = self.lock()?;
        let Some(session) = doc.sessions.get_mut(session_id) else {
            return Ok(None);
        };
        update(session);
        let updated = session.clone();
        self.persist(&doc)?;
        Ok(Some(updated))
    }

    /// Removes a session. Returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the write to disk fails.
    pub fn delete(&self, session_id: &str) -> Result<bool> {
        let mut doc = self.lock()?;
        let existed = doc.sessions.remove(session_id).is_some();
        if existed {
            self.persist(&doc)?;
        }
        Ok(existed)
    }

    /// Lists sessions matching `filter`, newest-updated first.
    ///
    /// # Errors
    ///
    /// Returns an error only if the internal lock is poisoned.
    pub fn list(&self, filter: &ListFilter) -> Result<Vec<Session>> {
        let doc = self.lock()?;
        let mut sessions: Vec<Session> = doc
            .sessions
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    /// Records the registry-wide last-synced timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if the write to disk fails.
    pub fn set_last_synced(&self, when: DateTime<Utc>) -> Result<()> {
        let mut doc = self.lock()?;
        doc.last_synced = Some(when);
        self.persist(&doc)
    }

    /// Aggregate counts across all sessions.
    ///
    /// # Errors
    ///
    /// Returns an error only if the internal lock is poisoned.
    pub fn get_stats(&self) -> Result<RegistryStats> {
        let doc = self.lock()?;
        let session_count = doc.sessions.len();
        let archived_count = doc.sessions.values().filter(|s| s.archived).count();
        let total_chunks = doc.sessions.values().map(|s| s.chunk_count).sum();
        Ok(RegistryStats {
            session_count,
            archived_count,
            total_chunks,
        })
    }

    /// Removes every session from the registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the write to disk fails.
    pub fn clear(&self) -> Result<()> {
        let mut doc = self.lock()?;
        doc.sessions.clear();
        doc.last_synced = None;
        self.persist(&doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(id: &str, project: &str) -> Session {
        Session::new(id.to_string(), project.to_string(), 5, 2)
    }

    #[test]
    fn test_load_missing_file_starts_empty() {
        let dir = tempdir().unwrap();
        let registry = SessionRegistry::load(&dir.path().join("registry.json")).unwrap();
        assert_eq!(registry.get_stats().unwrap().session_count, 0);
    }

    #[test]
    fn test_add_then_get() {
        let dir = tempdir().unwrap();
        let registry = SessionRegistry::load(&dir.path().join("registry.json")).unwrap();
        registry.add(sample("s1", "proj")).unwrap();
        let fetched = registry.get("s1").unwrap().unwrap();
        assert_eq!(fetched.project, "proj");
    }

    #[test]
    fn test_get_missing_returns_none() {
        let dir = tempdir().unwrap();
        let registry = SessionRegistry::load(&dir.path().join("registry.json")).unwrap();
        assert!(registry.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_update_applies_partial_change() {
        let dir = tempdir().unwrap();
        let registry = SessionRegistry::load(&dir.path().join("registry.json")).unwrap();
        registry.add(sample("s1", "proj")).unwrap();
        let updated = registry
            .update("s1", |s| { s.tags.insert("auth".to_string()); })
            .unwrap()
            .unwrap();
        assert!(updated.tags.contains("auth"));
    }

    #[test]
    fn test_update_missing_session_is_noop() {
        let dir = tempdir().unwrap();
        let registry = SessionRegistry::load(&dir.path().join("registry.json")).unwrap();
        let result = registry.update("missing", |s| s.archived = true).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_delete_removes_session() {
        let dir = tempdir().unwrap();
        let registry = SessionRegistry::load(&dir.path().join("registry.json")).unwrap();
        registry.add(sample("s1", "proj")).unwrap();
        assert!(registry.delete("s1").unwrap());
        assert!(registry.get("s1").unwrap().is_none());
    }

    #[test]
    fn test_list_filters_by_project() {
        let dir = tempdir().unwrap();
        let registry = SessionRegistry::load(&dir.path().join("registry.json")).unwrap();
        registry.add(sample("s1", "proj-a")).unwrap();
        registry.add(sample("s2", "proj-b")).unwrap();
        let filter = ListFilter {
            project: Some("proj-a".to_string()),
            ..Default::default()
        };
        let results = registry.list(&filter).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].session_id, "s1");
    }

    #[test]
    fn test_persists_across_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");
        {
            let registry = SessionRegistry::load(&path).unwrap();
            registry.add(sample("s1", "proj")).unwrap();
        }
        let reloaded = SessionRegistry::load(&path).unwrap();
        assert!(reloaded.get("s1").unwrap().is_some());
    }

    #[test]
    fn test_clear_empties_registry() {
        let dir = tempdir().unwrap();
        let registry = SessionRegistry::load(&dir.path().join("registry.json")).unwrap();
        registry.add(sample("s1", "proj")).unwrap();
        registry.clear().unwrap();
        assert_eq!(registry.get_stats().unwrap().session_count, 0);
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(&path, b"not json").unwrap();
        let registry = SessionRegistry::load(&path).unwrap();
        assert_eq!(registry.get_stats().unwrap().session_count, 0);
    }
}
