//! Process-wide configuration record (§4.14), loaded once at start from
//! `config.json` under `storage_dir` and atomically rewritten on save.

use crate::error::{Error, Result};
use crate::util::atomic_write;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Embedding-gateway tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Name of the embedding model in use (informational; the actual model
    /// is selected by the `fastembed-embeddings` feature at build time).
    pub model_name: String,
    /// Output vector width.
    pub dimension: usize,
    /// Default batch size before adaptive sizing kicks in.
    pub batch_size: usize,
    /// Largest batch the gateway will ever send to the embedder.
    pub max_batch_size: usize,
    /// Smallest batch the gateway will ever send to the embedder.
    pub min_batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_name: "all-MiniLM-L6-v2".to_string(),
            dimension: crate::embedding::DEFAULT_DIMENSIONS,
            batch_size: 32,
            max_batch_size: 64,
            min_batch_size: 8,
        }
    }
}

/// Search/ranking tunables, per §4.7/§4.9.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Chunks requested from the vector store per query.
    pub k_chunks: usize,
    /// Ranked sessions returned per query.
    pub top_n_sessions: usize,
    /// Preview length in characters before truncation.
    pub preview_length: usize,
    /// Minimum `best` similarity a session must clear to be kept.
    pub similarity_threshold: f64,
    /// Weight on recency in the composite score (the only ranker weight
    /// configuration may override).
    pub recency_weight: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { k_chunks: 200, top_n_sessions: 5, preview_length: 200, similarity_threshold: 0.3, recency_weight: 0.25 }
    }
}

/// Chunking tunables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfigSection {
    /// Target chunk size, in estimated tokens.
    pub target_tokens: usize,
    /// Overlap between consecutive chunks, in estimated tokens.
    pub overlap_tokens: usize,
    /// Hard ceiling on a single chunk's token estimate.
    pub max_tokens: usize,
}

impl Default for ChunkingConfigSection {
    fn default() -> Self {
        Self { target_tokens: 750, overlap_tokens: 150, max_tokens: 1000 }
    }
}

/// Background-indexer tunables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    /// Per-path debounce delay before a changed file is (re)indexed.
    pub debounce_delay_secs: u64,
    /// Periodic checkpoint interval, in chunks embedded.
    pub checkpoint_interval: usize,
    /// Whether the background watcher starts at all.
    pub enabled: bool,
}

impl IndexingConfig {
    /// `debounce_delay_secs` as a [`Duration`].
    #[must_use]
    pub const fn debounce_delay(&self) -> Duration {
        Duration::from_secs(self.debounce_delay_secs)
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self { debounce_delay_secs: 5, checkpoint_interval: 15, enabled: true }
    }
}

/// Bulk-setup orchestrator tunables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetupConfigSection {
    /// Per-session cooperative deadline, in seconds.
    pub timeout_per_session_secs: u64,
    /// Sessions per re-exec'd batch-mode child.
    pub batch_size: usize,
    /// Parallel worker count (1 = sequential).
    pub workers: usize,
    /// Forces CPU-only embedding even if a GPU backend is available.
    pub use_cpu: bool,
}

impl SetupConfigSection {
    /// `timeout_per_session_secs` as a [`Duration`].
    #[must_use]
    pub const fn timeout_per_session(&self) -> Duration {
        Duration::from_secs(self.timeout_per_session_secs)
    }
}

impl Default for SetupConfigSection {
    fn default() -> Self {
        Self { timeout_per_session_secs: 30, batch_size: 5, workers: 1, use_cpu: false }
    }
}

/// Process memory budget tunables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Soft ceiling used by the adaptive batch sizer.
    pub max_memory_mb: usize,
    /// Whether to drop cached batch buffers between setup batches.
    pub gc_between_batches: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { max_memory_mb: 2000, gc_between_batches: true }
    }
}

/// Cache sizing tunables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Query-embedding cache capacity.
    pub query_cache_size: usize,
    /// Result-set cache capacity.
    pub result_cache_size: usize,
    /// Entry time-to-live, in seconds.
    pub ttl_seconds: u64,
}

impl CacheConfig {
    /// `ttl_seconds` as a [`Duration`].
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { query_cache_size: 100, result_cache_size: 50, ttl_seconds: 300 }
    }
}

/// Top-level configuration record, loaded once at process start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Embedding-gateway group.
    pub embedding: EmbeddingConfig,
    /// Search/ranking group.
    pub search: SearchConfig,
    /// Chunking group.
    pub chunking: ChunkingConfigSection,
    /// Background-indexer group.
    pub indexing: IndexingConfig,
    /// Bulk-setup group.
    pub setup: SetupConfigSection,
    /// Memory-budget group.
    pub memory: MemoryConfig,
    /// Cache-sizing group.
    pub cache: CacheConfig,
    /// Base directory for all persistent state.
    pub storage_dir: std::path::PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            embedding: EmbeddingConfig::default(),
            search: SearchConfig::default(),
            chunking: ChunkingConfigSection::default(),
            indexing: IndexingConfig::default(),
            setup: SetupConfigSection::default(),
            memory: MemoryConfig::default(),
            cache: CacheConfig::default(),
            storage_dir: default_storage_dir(),
        }
    }
}

/// User-scoped default storage directory: `~/.local/share/vibefork` (or the
/// platform equivalent via [`dirs::data_dir`]), falling back to `./vibefork`
/// if no home directory can be resolved.
#[must_use]
pub fn default_storage_dir() -> std::path::PathBuf {
    dirs::data_dir().map_or_else(|| std::path::PathBuf::from("./vibefork"), |dir| dir.join("vibefork"))
}

impl Config {
    /// Loads configuration from `path`, falling back to defaults for any
    /// missing file or unparseable field (missing keys take their default
    /// per-field rather than failing the whole load).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file exists but is not valid JSON,
    /// or if the loaded record fails [`Config::validate`].
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let bytes = std::fs::read(path).map_err(Error::Io)?;
            serde_json::from_slice(&bytes).map_err(|e| Error::Config { message: format!("invalid config.json: {e}") })?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Atomically rewrites `path` with this configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the rename fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self).map_err(|e| Error::Config { message: e.to_string() })?;
        atomic_write(path, &bytes)?;
        Ok(())
    }

    /// Rejects values that would make the rest of the system misbehave:
    /// zero-sized batches/caches, chunk overlap exceeding target size, and
    /// similar nonsensical combinations.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid field found.
    pub fn validate(&self) -> Result<()> {
        if self.embedding.min_batch_size == 0 || self.embedding.min_batch_size > self.embedding.max_batch_size {
            return Err(Error::Config { message: "embedding.min_batch_size must be >0 and <= max_batch_size".to_string() });
        }
        if self.chunking.overlap_tokens >= self.chunking.target_tokens {
            return Err(Error::Config { message: "chunking.overlap_tokens must be less than target_tokens".to_string() });
        }
        if self.chunking.target_tokens > self.chunking.max_tokens {
            return Err(Error::Config { message: "chunking.target_tokens must not exceed max_tokens".to_string() });
        }
        if self.search.top_n_sessions == 0 {
            return Err(Error::Config { message: "search.top_n_sessions must be > 0".to_string() });
        }
        if self.setup.workers == 0 {
            return Err(Error::Config { message: "setup.workers must be > 0".to_string() });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = Config::default();
        config.search.top_n_sessions = 8;
        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.search.top_n_sessions, 8);
    }

    #[test]
    fn test_missing_keys_in_file_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"search": {"top_n_sessions": 3}}"#).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.search.top_n_sessions, 3);
        assert_eq!(config.search.k_chunks, SearchConfig::default().k_chunks);
    }

    #[test]
    fn test_validate_rejects_overlap_ge_target() {
        let mut config = Config::default();
        config.chunking.overlap_tokens = config.chunking.target_tokens;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = Config::default();
        config.setup.workers = 0;
        assert!(config.validate().is_err());
    }
}
