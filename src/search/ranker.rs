//! Composite session ranker.
//!
//! Combines per-session chunk-similarity statistics with registry state,
//! fork-history preference, and an optional temporal query descriptor into
//! one score, mirroring the weighted-sum style of the teacher's `rrf`
//! module but over a richer per-session feature set.

use crate::core::{Chunk, PreferenceRecord, Session};
use chrono::{DateTime, Utc};

/// Base-score weights, per §4.7. Configuration can only override
/// `recency_weight`; the remaining four stay fixed to keep the weighted sum
/// well-defined (they are not independently exposed in configuration).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankerWeights {
    /// Weight on the best single-chunk similarity.
    pub best: f64,
    /// Weight on the mean chunk similarity.
    pub avg: f64,
    /// Weight on the hit-chunk-to-total-chunk ratio.
    pub ratio: f64,
    /// Weight on recency of last update.
    pub recency: f64,
    /// Weight on the chain/success-rate placeholder.
    pub chain: f64,
    /// Minimum `best` similarity a session must clear to be kept.
    pub similarity_threshold: f64,
}

impl Default for RankerWeights {
    fn default() -> Self {
        Self {
            best: 0.40,
            avg: 0.20,
            ratio: 0.05,
            recency: 0.25,
            chain: 0.10,
            similarity_threshold: 0.3,
        }
    }
}

/// A time-range filter attached to the query, used for the temporal boost.
#[derive(Debug, Clone, Copy)]
pub struct TemporalQuery {
    /// Start of the queried range.
    pub from: DateTime<Utc>,
    /// End of the queried range.
    pub to: DateTime<Utc>,
}

impl TemporalQuery {
    /// Temporal boost per §4.7: `+0.05` when `when` falls inside the range,
    /// otherwise linearly decayed to `0.0` over 30 days of distance from
    /// the nearer range boundary.
    fn boost(&self, when: DateTime<Utc>) -> f64 {
        if when >= self.from && when <= self.to {
            return 0.05;
        }
        let distance_days = if when < self.from {
            (self.from - when).num_seconds().max(0) as f64 / 86_400.0
        } else {
            (when - self.to).num_seconds().max(0) as f64 / 86_400.0
        };
        let decay = (1.0 - distance_days / 30.0).clamp(0.0, 1.0);
        0.05 * decay
    }
}

/// Per-factor breakdown for one ranked session, useful for explaining a
/// result to the caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBreakdown {
    /// Max similarity across the session's hit chunks.
    pub best: f64,
    /// Mean similarity across the session's hit chunks.
    pub avg: f64,
    /// hit-chunk-count / total-chunk-count, capped at 1.
    pub ratio: f64,
    /// `exp(-age_days / 30)`.
    pub recency: f64,
    /// Success-rate placeholder, currently always 0.5.
    pub chain: f64,
    /// Weighted sum of the five factors above.
    pub base: f64,
    /// Additive memory-marker boost.
    pub memory_boost: f64,
    /// Additive fork-history preference boost.
    pub preference_boost: f64,
    /// Additive temporal-query boost.
    pub temporal_boost: f64,
    /// `base + memory_boost + preference_boost + temporal_boost`.
    pub total: f64,
}

/// One ranked session, carrying its score breakdown and the chunks that hit.
#[derive(Debug, Clone)]
pub struct RankedSession {
    /// The registry entry that was ranked.
    pub session: Session,
    /// The session's hit chunks, most-similar first.
    pub hits: Vec<(Chunk, f32)>,
    /// The computed score breakdown.
    pub score: ScoreBreakdown,
}

/// Ranks sessions per §4.7, dropping any below `weights.similarity_threshold`
/// and sorting by total score descending, then newer `updated_at`, then
/// higher `best`.
#[must_use]
pub fn rank_sessions(
    mut grouped: Vec<(Session, Vec<(Chunk, f32)>)>,
    preferences: &std::collections::HashMap<String, PreferenceRecord>,
    temporal: Option<TemporalQuery>,
    weights: &RankerWeights,
    now: DateTime<Utc>,
) -> Vec<RankedSession> {
    grouped.retain(|(_, hits)| !hits.is_empty());

    let mut ranked: Vec<RankedSession> = grouped
        .into_iter()
        .map(|(session, mut hits)| {
            hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            let score = score_session(&session, &hits, preferences, temporal, weights, now);
            RankedSession { session, hits, score }
        })
        .filter(|r| r.score.best >= weights.similarity_threshold)
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .total
            .partial_cmp(&a.score.total)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.session.updated_at.cmp(&a.session.updated_at))
            .then_with(|| b.score.best.partial_cmp(&a.score.best).unwrap_or(std::cmp::Ordering::Equal))
    });

    ranked
}

fn score_session(
    session: &Session,
    hits: &[(Chunk, f32)],
    preferences: &std::collections::HashMap<String, PreferenceRecord>,
    temporal: Option<TemporalQuery>,
    weights: &RankerWeights,
    now: DateTime<Utc>,
) -> ScoreBreakdown {
    let similarities: Vec<f64> = hits.iter().map(|(_, sim)| f64::from(*sim)).collect();
    let best = similarities.iter().copied().fold(f64::MIN, f64::max).max(0.0);
    let avg = similarities.iter().sum::<f64>() / similarities.len().max(1) as f64;
    let ratio = if session.chunk_count == 0 {
        0.0
    } else {
        (hits.len() as f64 / session.chunk_count as f64).min(1.0)
    };
    let recency = (-session.age_days(now) / 30.0).exp();
    let chain = 0.5;

    let base = weights.best * best
        + weights.avg * avg
        + weights.ratio * ratio
        + weights.recency * recency
        + weights.chain * chain;

    let memory_boost = hits
        .iter()
        .map(|(chunk, _)| chunk.memory_boost())
        .fold(0.0_f64, f64::max);

    let preference_boost = preferences
        .get(&session.session_id)
        .map_or(0.0, |pref| pref.boost(now));

    let temporal_boost = temporal.map_or(0.0, |t| t.boost(session.updated_at));

    let total = base + memory_boost + preference_boost + temporal_boost;

    ScoreBreakdown {
        best,
        avg,
        ratio,
        recency,
        chain,
        base,
        memory_boost,
        preference_boost,
        temporal_boost,
        total,
    }
}
