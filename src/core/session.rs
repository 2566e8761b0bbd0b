//! Session metadata, the unit of retrieval and forking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Durable metadata for one indexed transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque id, unique across all transcripts. Also the registry key.
    pub session_id: String,
    /// Originating project label, derived from the transcript's directory.
    pub project: String,
    /// When this session was first indexed.
    pub created_at: DateTime<Utc>,
    /// When this session's chunks were last replaced.
    pub updated_at: DateTime<Utc>,
    /// Number of messages extracted from the transcript.
    pub message_count: usize,
    /// Number of chunks currently indexed for this session.
    pub chunk_count: usize,
    /// Lowercase-normalized tags.
    pub tags: BTreeSet<String>,
    /// Cached extractive summary, if generated.
    pub summary: Option<String>,
    /// `chunk_count` at the time `summary` was last generated, used to
    /// decide when a ≥10% change warrants regeneration.
    pub summarized_at_chunk_count: Option<usize>,
    /// Whether this session's chunks live in the archive partition.
    pub archived: bool,
    /// When the background indexer last synced this session, if ever.
    pub last_synced: Option<DateTime<Utc>>,
}

impl Session {
    /// Creates a freshly-indexed session record.
    #[must_use]
    pub fn new(session_id: String, project: String, message_count: usize, chunk_count: usize) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            project,
            created_at: now,
            updated_at: now,
            message_count,
            chunk_count,
            tags: BTreeSet::new(),
            summary: None,
            summarized_at_chunk_count: None,
            archived: false,
            last_synced: Some(now),
        }
    }

    /// Replaces this session's chunk-derived fields after a re-index,
    /// preserving `created_at`, tags, and any cached summary.
    pub fn reindex(&mut self, message_count: usize, chunk_count: usize, now: DateTime<Utc>) {
        self.message_count = message_count;
        self.chunk_count = chunk_count;
        self.updated_at = now;
        self.last_synced = Some(now);
    }

    /// Age of this session's last update, in fractional days.
    #[must_use]
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        let secs = (now - self.updated_at).num_seconds().max(0) as f64;
        secs / 86_400.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_defaults() {
        let s = Session::new("sess-1".to_string(), "proj".to_string(), 10, 3);
        assert_eq!(s.session_id, "sess-1");
        assert!(!s.archived);
        assert!(s.tags.is_empty());
        assert_eq!(s.created_at, s.updated_at);
    }

    #[test]
    fn test_reindex_preserves_created_at() {
        let mut s = Session::new("sess-1".to_string(), "proj".to_string(), 10, 3);
        let created = s.created_at;
        let later = created + chrono::Duration::hours(2);
        s.reindex(20, 5, later);
        assert_eq!(s.created_at, created);
        assert_eq!(s.updated_at, later);
        assert_eq!(s.message_count, 20);
        assert_eq!(s.chunk_count, 5);
    }

    #[test]
    fn test_age_days() {
        let mut s = Session::new("sess-1".to_string(), "proj".to_string(), 1, 1);
        s.updated_at = Utc::now() - chrono::Duration::days(10);
        let age = s.age_days(Utc::now());
        assert!((age - 10.0).abs() < 0.01);
    }
}
