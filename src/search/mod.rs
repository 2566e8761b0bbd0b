//! Ranking, caching, and end-to-end query orchestration over the vector
//! store and session registry.

mod cache;
mod orchestrator;
mod ranker;

pub use cache::{canonical_filter_key, normalize_query, TtlLruCache};
pub use orchestrator::{OrchestratorConfig, QueryFilters, SearchOrchestrator, SearchResultItem};
pub use ranker::{rank_sessions, RankedSession, RankerWeights, ScoreBreakdown, TemporalQuery};
