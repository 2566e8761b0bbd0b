//! Search orchestrator: ties the embedding gateway, vector store, session
//! registry, and composite ranker into the end-to-end query pipeline.

use crate::core::{Chunk, PreferenceRecord};
use crate::embedding::EmbeddingGateway;
use crate::error::{Result, SearchError};
use crate::search::cache::{canonical_filter_key, normalize_query, TtlLruCache};
use crate::search::ranker::{rank_sessions, RankedSession, RankerWeights, TemporalQuery};
use crate::storage::{Partition, SearchFilter, SessionRegistry, VectorStore};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Query-level filters, per §4.9.
#[derive(Debug, Clone, Default)]
pub struct QueryFilters {
    /// Restrict to an exact project label, or the producer's current one.
    pub project: Option<String>,
    /// `"all"` or `"project"`. `"project"` requires `filters.project` to
    /// also be set; [`SearchOrchestrator::search`] rejects the combination
    /// of `scope: "project"` with no project otherwise, since there is no
    /// ambient "current project" for a multi-session search to fall back
    /// on.
    pub scope: Option<String>,
    /// Restrict to chunks carrying any of these tags.
    pub tags: Vec<String>,
    /// Optional time-range filter, reused for both the store filter and the
    /// ranker's temporal boost.
    pub time_range: Option<(chrono::DateTime<Utc>, chrono::DateTime<Utc>)>,
    /// Whether to also search the archive partition.
    pub include_archive: bool,
}

impl QueryFilters {
    fn cache_key(&self, query: &str) -> String {
        let canon = serde_json::json!({
            "project": self.project,
            "scope": self.scope,
            "tags": ({
                let mut t = self.tags.clone();
                t.sort();
                t
            }),
            "time_range": self.time_range.map(|(f, t)| (f.to_rfc3339(), t.to_rfc3339())),
            "include_archive": self.include_archive,
        });
        format!("{}::{}", normalize_query(query), canonical_filter_key(&canon))
    }

    fn store_filter(&self) -> SearchFilter {
        SearchFilter {
            project: self.project.clone(),
            archived: None,
            tags: if self.tags.is_empty() {
                None
            } else {
                Some(self.tags.iter().cloned().collect())
            },
            memory_types: None,
            time_range: self.time_range,
        }
    }
}

/// Tunable numeric constants from §4.9/§4.14, all configuration-overridable.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    /// How many chunks to request from the vector store per search.
    pub k_chunks: usize,
    /// How many ranked sessions to return.
    pub top_n_sessions: usize,
    /// Preview length in characters before truncation.
    pub preview_length: usize,
    /// Result-cache and query-cache capacity.
    pub cache_size: usize,
    /// Cache entry TTL.
    pub cache_ttl: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            k_chunks: 200,
            top_n_sessions: 5,
            preview_length: 200,
            cache_size: 100,
            cache_ttl: Duration::from_secs(300),
        }
    }
}

/// One search hit, ready to present to a caller.
#[derive(Debug, Clone)]
pub struct SearchResultItem {
    /// The ranked session this result summarizes.
    pub session: RankedSession,
    /// Concatenated, truncated preview text from the top hit chunks.
    pub preview: String,
}

/// Coordinates a search end to end, caching both embeddings and full result
/// sets.
pub struct SearchOrchestrator {
    gateway: EmbeddingGateway,
    store: Arc<VectorStore>,
    registry: Arc<SessionRegistry>,
    config: OrchestratorConfig,
    embedding_cache: Mutex<TtlLruCache<String, Vec<f32>>>,
    result_cache: Mutex<TtlLruCache<String, Vec<SearchResultItem>>>,
    last_seen_generation: Mutex<u64>,
}

impl SearchOrchestrator {
    /// Builds an orchestrator over the given components. `store` and
    /// `registry` are shared (not owned) so the same instances can be
    /// driven concurrently by the background indexer and the RPC tool
    /// layer.
    #[must_use]
    pub fn new(
        gateway: EmbeddingGateway,
        store: Arc<VectorStore>,
        registry: Arc<SessionRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            embedding_cache: Mutex::new(TtlLruCache::new(config.cache_size, config.cache_ttl)),
            result_cache: Mutex::new(TtlLruCache::new(config.cache_size, config.cache_ttl)),
            last_seen_generation: Mutex::new(store.generation()),
            gateway,
            store,
            registry,
            config,
        }
    }

    /// Runs the §4.9 search pipeline for `query`.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::EmptyQuery`] if `query` normalizes to an
    /// empty string, or propagates an embedding/storage failure.
    pub fn search(
        &self,
        query: &str,
        filters: &QueryFilters,
        preferences: &HashMap<String, PreferenceRecord>,
    ) -> Result<Vec<SearchResultItem>> {
        let normalized = normalize_query(query);
        if normalized.is_empty() {
            return Err(SearchError::EmptyQuery.into());
        }
        if filters.scope.as_deref() == Some("project") && filters.project.is_none() {
            return Err(SearchError::ScopeRequiresProject.into());
        }

        self.invalidate_on_mutation();

        let cache_key = filters.cache_key(&normalized);
        if let Some(cached) = self.result_cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner).get(&cache_key) {
            return Ok(cached);
        }

        let query_vec = self.embed_cached(&normalized)?;

        let store_filter = filters.store_filter();
        let mut partitions = vec![Partition::Active];
        if filters.include_archive {
            partitions.push(Partition::Archive);
        }
        let hits = self
            .store
            .search(&query_vec, self.config.k_chunks, &store_filter, &partitions)?;

        let grouped = self.group_with_registry(hits)?;

        let temporal = filters.time_range.map(|(from, to)| TemporalQuery { from, to });
        let ranked = rank_sessions(grouped, preferences, temporal, &RankerWeights::default(), Utc::now());

        let results: Vec<SearchResultItem> = ranked
            .into_iter()
            .take(self.config.top_n_sessions)
            .map(|ranked| {
                let preview = build_preview(&ranked.hits, self.config.preview_length);
                SearchResultItem { session: ranked, preview }
            })
            .collect();

        self.result_cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .put(cache_key, results.clone());

        Ok(results)
    }

    fn embed_cached(&self, normalized_query: &str) -> Result<Vec<f32>> {
        if let Some(cached) = self
            .embedding_cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&normalized_query.to_string())
        {
            return Ok(cached);
        }
        let vectors = self.gateway.embed_texts(&[normalized_query.to_string()])?;
        let vector = vectors.into_iter().next().unwrap_or_default();
        self.embedding_cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .put(normalized_query.to_string(), vector.clone());
        Ok(vector)
    }

    fn group_with_registry(
        &self,
        hits: Vec<(Chunk, f32)>,
    ) -> Result<Vec<(crate::core::Session, Vec<(Chunk, f32)>)>> {
        let mut by_session: HashMap<String, Vec<(Chunk, f32)>> = HashMap::new();
        for (chunk, sim) in hits {
            by_session
                .entry(chunk.metadata.session_id.clone())
                .or_default()
                .push((chunk, sim));
        }

        let mut grouped = Vec::new();
        for (session_id, chunk_hits) in by_session {
            if let Some(session) = self.registry.get(&session_id)? {
                grouped.push((session, chunk_hits));
            }
        }
        Ok(grouped)
    }

    /// Clears the result cache (never the embedding cache) if the vector
    /// store's mutation generation has advanced since the last check.
    fn invalidate_on_mutation(&self) {
        let current = self.store.generation();
        let mut last_seen = self
            .last_seen_generation
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if *last_seen != current {
            self.result_cache
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clear();
            *last_seen = current;
        }
    }
}

/// Builds a preview from up to the three highest-similarity chunks:
/// concatenates their text, trims to `max_len` on a word boundary, and
/// appends an ellipsis if truncated.
fn build_preview(hits: &[(Chunk, f32)], max_len: usize) -> String {
    let combined = hits
        .iter()
        .take(3)
        .map(|(chunk, _)| chunk.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");

    if combined.len() <= max_len {
        return combined;
    }

    let mut cut = max_len;
    while cut > 0 && !combined.is_char_boundary(cut) {
        cut -= 1;
    }
    let truncated = &combined[..cut];
    let boundary = truncated.rfind(char::is_whitespace).unwrap_or(cut);
    format!("{}...", truncated[..boundary].trim_end())
}
