//! Caching, adaptively-batching front for an [`Embedder`].

use crate::embedding::{Embedder, EmbeddingCache};
use crate::error::Result;
use tracing::debug;

/// Bounds and budget controlling [`EmbeddingGateway::embed_texts`]'s batch
/// sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    /// Smallest batch ever sent to the embedder.
    pub min_batch: usize,
    /// Largest batch ever sent to the embedder.
    pub max_batch: usize,
    /// Soft memory budget in MB used to derive a batch size between the
    /// two bounds above; an approximation since we don't probe live
    /// process memory, only the configured ceiling and embedding width.
    pub max_memory_mb: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            min_batch: 8,
            max_batch: 64,
            max_memory_mb: 2000,
        }
    }
}

/// Embeds text through a persistent content-addressed cache, batching cache
/// misses to the underlying [`Embedder`] in adaptively-sized groups.
pub struct EmbeddingGateway {
    embedder: Box<dyn Embedder>,
    cache: EmbeddingCache,
    batch: BatchConfig,
}

impl EmbeddingGateway {
    /// Builds a gateway over `embedder`, backed by `cache`.
    #[must_use]
    pub fn new(embedder: Box<dyn Embedder>, cache: EmbeddingCache, batch: BatchConfig) -> Self {
        Self {
            embedder,
            cache,
            batch,
        }
    }

    /// This embedder's output dimensionality.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.embedder.dimensions()
    }

    /// Embeds `texts`, preserving input order. Cache hits never touch the
    /// model; misses are grouped into adaptively-sized batches.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::EmbeddingError::Unavailable`] if the
    /// underlying model fails on any batch; never silently returns a zero
    /// vector for a failed embed.
    pub fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut miss_indices = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            if let Some(cached) = self.cache.get(text) {
                results[i] = Some(cached);
            } else {
                miss_indices.push(i);
            }
        }

        let batch_size = self.adaptive_batch_size();
        for batch in miss_indices.chunks(batch_size) {
            let batch_texts: Vec<&str> = batch.iter().map(|&i| texts[i].as_str()).collect();
            let embeddings = self.embedder.embed_batch(&batch_texts)?;
            for (&idx, embedding) in batch.iter().zip(embeddings.into_iter()) {
                self.cache.put(&texts[idx], embedding.clone())?;
                results[idx] = Some(embedding);
            }
            self.reclaim_hint();
        }

        Ok(results
            .into_iter()
            .map(|r| r.expect("every index is filled by either a cache hit or a batch result"))
            .collect())
    }

    /// Flushes the embedding cache to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache cannot be serialized or written.
    pub fn flush_cache(&self) -> Result<()> {
        self.cache.flush()
    }

    /// Computes the batch size for the next model call, scaling the
    /// configured memory budget down by the per-vector footprint and
    /// clamping to `[min_batch, max_batch]`.
    fn adaptive_batch_size(&self) -> usize {
        let bytes_per_vector = self.embedder.dimensions() * std::mem::size_of::<f32>();
        if bytes_per_vector == 0 {
            return self.batch.max_batch;
        }
        let budget_bytes = self.batch.max_memory_mb * 1024 * 1024;
        let derived = budget_bytes / bytes_per_vector.max(1) / 64;
        derived.clamp(self.batch.min_batch, self.batch.max_batch)
    }

    /// Best-effort hint that scratch memory from the last batch can be
    /// reclaimed before starting the next one.
    fn reclaim_hint(&self) {
        debug!("embedding batch complete, hinting memory reclaim");
    }
}
