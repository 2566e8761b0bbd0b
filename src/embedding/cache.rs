//! Content-addressed, disk-backed embedding cache.
//!
//! Keys are the SHA-256 hash of a text's UTF-8 bytes, so identical chunk
//! text across sessions (or across re-indexing the same session) never
//! pays for a second model call.

use crate::error::{EmbeddingError, Result};
use crate::util::atomic_write;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Computes the cache key for `text`: the hex-encoded SHA-256 of its UTF-8
/// bytes.
#[must_use]
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

/// Multi-reader/single-writer cache of `hash -> embedding`, persisted as
/// `{hash: vector[]}` JSON and rewritten atomically.
pub struct EmbeddingCache {
    path: PathBuf,
    entries: RwLock<HashMap<String, Vec<f32>>>,
}

impl EmbeddingCache {
    /// Loads the cache from `path` if it exists, otherwise starts empty.
    /// A corrupt cache file is treated as empty rather than fatal: cache
    /// misses are safe, they just cost a model call.
    ///
    /// # Errors
    ///
    /// Returns an error only if `path` exists but cannot be read at all
    /// (not if its contents fail to parse).
    pub fn load(path: &Path) -> Result<Self> {
        let entries = if path.exists() {
            let bytes = std::fs::read(path)
                .map_err(|e| EmbeddingError::Cache(format!("failed to read cache: {e}")))?;
            serde_json::from_slice(&bytes).unwrap_or_default()
        } else {
            HashMap::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            entries: RwLock::new(entries),
        })
    }

    /// Looks up the embedding for `text`'s content hash.
    #[must_use]
    pub fn get(&self, text: &str) -> Option<Vec<f32>> {
        let key = content_hash(text);
        self.entries.read().ok()?.get(&key).cloned()
    }

    /// Inserts an embedding keyed by `text`'s content hash. Does not flush
    /// to disk; call [`EmbeddingCache::flush`] when durability is needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory lock is poisoned.
    pub fn put(&self, text: &str, embedding: Vec<f32>) -> Result<()> {
        let key = content_hash(text);
        let mut guard = self
            .entries
            .write()
            .map_err(|_| EmbeddingError::Cache("cache lock poisoned".to_string()))?;
        guard.insert(key, embedding);
        Ok(())
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map(|g| g.len()).unwrap_or(0)
    }

    /// Whether the cache currently holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flushes the current in-memory view to disk atomically (temp file
    /// then rename).
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn flush(&self) -> Result<()> {
        let guard = self
            .entries
            .read()
            .map_err(|_| EmbeddingError::Cache("cache lock poisoned".to_string()))?;
        let bytes = serde_json::to_vec(&*guard)
            .map_err(|e| EmbeddingError::Cache(format!("failed to serialize cache: {e}")))?;
        drop(guard);
        atomic_write(&self.path, &bytes)
            .map_err(|e| EmbeddingError::Cache(format!("failed to write cache: {e}")))?;
        Ok(())
    }
}
