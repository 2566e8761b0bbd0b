//! Archive/restore: moves aged-out sessions between the active and archive
//! vector-store partitions, keeping the registry's `archived` flag in sync
//! (§4.12).

use crate::error::{Error, Result};
use crate::storage::{Partition, SessionRegistry, VectorStore};
use chrono::{DateTime, Utc};

/// Default age, in days, past which `sweep` archives a session.
pub const DEFAULT_THRESHOLD_DAYS: i64 = 365;

/// Moves `session_id`'s chunks from active to archive and flips the
/// registry's `archived` flag.
///
/// # Errors
///
/// Returns [`Error::NotFound`] if the session is unknown, or a storage
/// error if the move fails.
pub fn archive_session(registry: &SessionRegistry, store: &VectorStore, session_id: &str) -> Result<()> {
    store.move_to_partition(session_id, Partition::Archive)?;
    let updated = registry.update(session_id, |s| s.archived = true)?;
    updated.map(|_| ()).ok_or_else(|| Error::NotFound(session_id.to_string()))
}

/// Moves `session_id`'s chunks back from archive to active and clears the
/// registry's `archived` flag.
///
/// # Errors
///
/// Returns [`Error::NotFound`] if the session is unknown, or a storage
/// error if the move fails.
pub fn restore_session(registry: &SessionRegistry, store: &VectorStore, session_id: &str) -> Result<()> {
    store.move_to_partition(session_id, Partition::Active)?;
    let updated = registry.update(session_id, |s| s.archived = false)?;
    updated.map(|_| ()).ok_or_else(|| Error::NotFound(session_id.to_string()))
}

/// Archives every non-archived session whose `updated_at` is older than
/// `threshold_days`, as of `now`. Returns the archived session ids.
///
/// # Errors
///
/// Returns an error if the registry listing or a move fails.
pub fn sweep(registry: &SessionRegistry, store: &VectorStore, threshold_days: i64, now: DateTime<Utc>) -> Result<Vec<String>> {
    let sessions = registry.list(&crate::storage::ListFilter { project: None, tag: None, archived: Some(false) })?;
    let mut archived = Vec::new();
    for session in sessions {
        if session.age_days(now) >= threshold_days as f64 {
            archive_session(registry, store, &session.session_id)?;
            archived.push(session.session_id);
        }
    }
    Ok(archived)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Chunk, Session};

    fn setup() -> (SessionRegistry, VectorStore) {
        let dir = tempfile::tempdir().unwrap();
        let registry = SessionRegistry::load(&dir.path().join("registry.json")).unwrap();
        let store = VectorStore::in_memory().unwrap();
        registry.add(Session::new("s1".into(), "proj".into(), 1, 1)).unwrap();
        let chunk = Chunk::new("s1", 0, "hello".into(), 0..1, "proj".into());
        store.upsert_chunks(&[chunk], Partition::Active).unwrap();
        (registry, store)
    }

    #[test]
    fn test_archive_then_restore_round_trips() {
        let (registry, store) = setup();
        archive_session(&registry, &store, "s1").unwrap();
        assert!(registry.get("s1").unwrap().unwrap().archived);
        assert!(store.list_by_session("s1", Partition::Active).unwrap().is_empty());
        assert_eq!(store.list_by_session("s1", Partition::Archive).unwrap().len(), 1);

        restore_session(&registry, &store, "s1").unwrap();
        assert!(!registry.get("s1").unwrap().unwrap().archived);
        assert_eq!(store.list_by_session("s1", Partition::Active).unwrap().len(), 1);
    }

    #[test]
    fn test_archive_unknown_session_errors() {
        let (registry, store) = setup();
        assert!(archive_session(&registry, &store, "ghost").is_err());
    }

    #[test]
    fn test_sweep_archives_only_old_sessions() {
        let (registry, store) = setup();
        registry.update("s1", |s| s.updated_at = Utc::now() - chrono::Duration::days(400)).unwrap();
        let archived = sweep(&registry, &store, DEFAULT_THRESHOLD_DAYS, Utc::now()).unwrap();
        assert_eq!(archived, vec!["s1".to_string()]);
    }

    #[test]
    fn test_sweep_skips_recent_sessions() {
        let (registry, store) = setup();
        let archived = sweep(&registry, &store, DEFAULT_THRESHOLD_DAYS, Utc::now()).unwrap();
        assert!(archived.is_empty());
    }
}
