//! Embedding generation for semantic search.
//!
//! Provides embedding generation using fastembed (when the
//! `fastembed-embeddings` feature is enabled) or a deterministic hash-based
//! fallback, fronted by a caching, adaptively-batching gateway.

mod cache;
mod fallback;

#[cfg(feature = "fastembed-embeddings")]
mod fastembed_impl;

mod gateway;

pub use cache::EmbeddingCache;
pub use fallback::FallbackEmbedder;
pub use gateway::{BatchConfig, EmbeddingGateway};

#[cfg(feature = "fastembed-embeddings")]
pub use fastembed_impl::FastEmbedEmbedder;

use crate::error::Result;

/// Default embedding dimensionality, matching the all-MiniLM-L6-v2 model
/// used by the optional `fastembed` backend.
pub const DEFAULT_DIMENSIONS: usize = 384;

/// A pure-function text-to-vector model, injected into the gateway.
///
/// Implementations must be thread-safe since the gateway may call them from
/// multiple background-indexer workers concurrently.
pub trait Embedder: Send + Sync {
    /// Returns this embedder's output dimensionality.
    fn dimensions(&self) -> usize;

    /// Embeds a single text.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::EmbeddingError::Unavailable`] if the model
    /// cannot produce a vector for this call.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embeds a batch of texts, preserving input order. The default
    /// implementation calls [`Embedder::embed`] once per text;
    /// implementations with native batch support should override this.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding generation fails for any text.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// Cosine similarity between two vectors, in `[-1.0, 1.0]`. Returns `0.0`
/// for mismatched lengths or a zero-magnitude vector rather than panicking.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

/// Returns the default embedder for the enabled feature set: `FastEmbed`
/// when `fastembed-embeddings` is on, the hash-based fallback otherwise.
///
/// # Errors
///
/// Returns an error if the `fastembed` model fails to initialize.
#[cfg(feature = "fastembed-embeddings")]
pub fn create_embedder() -> Result<Box<dyn Embedder>> {
    Ok(Box::new(FastEmbedEmbedder::new()?))
}

/// Returns the default embedder for the enabled feature set: `FastEmbed`
/// when `fastembed-embeddings` is on, the hash-based fallback otherwise.
///
/// # Errors
///
/// Never fails for the fallback embedder.
#[cfg(not(feature = "fastembed-embeddings"))]
pub fn create_embedder() -> Result<Box<dyn Embedder>> {
    Ok(Box::new(FallbackEmbedder::new(DEFAULT_DIMENSIONS)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_mismatched_lengths() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = vec![0.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_create_embedder_default_dimensions() {
        let embedder = create_embedder().unwrap();
        assert_eq!(embedder.dimensions(), DEFAULT_DIMENSIONS);
    }
}
