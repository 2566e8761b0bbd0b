//! Fork-history log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of fork-history entries retained, per §3.
pub const MAX_ENTRIES: usize = 100;

/// One record of a user forking into a prior session from a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForkHistoryEntry {
    /// The session that was forked into.
    pub session_id: String,
    /// When the fork happened.
    pub timestamp: DateTime<Utc>,
    /// The normalized query text that produced the ranking being forked from.
    pub query: String,
    /// 0-based position of `session_id` in the ranking shown to the user.
    pub position: usize,
    /// Optional outcome tag the caller attached later.
    pub outcome: Option<String>,
}

impl ForkHistoryEntry {
    /// Creates a new entry timestamped `now`.
    #[must_use]
    pub fn new(session_id: String, query: String, position: usize) -> Self {
        Self {
            session_id,
            timestamp: Utc::now(),
            query,
            position,
            outcome: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_entry() {
        let e = ForkHistoryEntry::new("s1".to_string(), "oauth jwt".to_string(), 0);
        assert_eq!(e.session_id, "s1");
        assert_eq!(e.position, 0);
        assert!(e.outcome.is_none());
    }
}
