//! Per-session preference aggregate, derived from fork history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregate of a user's past fork selections for one session, used to
/// compute the preference boost in §4.7.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreferenceRecord {
    /// Number of times this session was forked into.
    pub fork_count: u32,
    /// Mean 0-based ranking position at selection time.
    pub avg_position: f64,
    /// Most recent selection timestamp.
    pub last_selected_at: DateTime<Utc>,
}

impl PreferenceRecord {
    /// Computes the additive preference boost per §4.7:
    /// `min(0.10, 0.04·log2(1+fork_count) + 0.02·position_bonus + 0.02·recency_of_last_selection)`.
    ///
    /// `position_bonus` rewards selections made from low (better) ranking
    /// positions: `1.0` at position 0, decaying linearly to `0.0` by
    /// position 10 or worse. `recency_of_last_selection` decays linearly
    /// from `1.0` (today) to `0.0` at 90 days old.
    #[must_use]
    pub fn boost(&self, now: DateTime<Utc>) -> f64 {
        let fork_term = 0.04 * (1.0 + f64::from(self.fork_count)).log2();

        let position_bonus = (1.0 - self.avg_position / 10.0).clamp(0.0, 1.0);
        let position_term = 0.02 * position_bonus;

        let age_days = (now - self.last_selected_at).num_seconds().max(0) as f64 / 86_400.0;
        let recency_bonus = (1.0 - age_days / 90.0).clamp(0.0, 1.0);
        let recency_term = 0.02 * recency_bonus;

        (fork_term + position_term + recency_term).min(0.10)
    }
}
