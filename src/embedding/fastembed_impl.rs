//! `FastEmbed`-backed embedder.
//!
//! Real semantic embeddings via all-MiniLM-L6-v2, behind the
//! `fastembed-embeddings` feature. Catches ONNX runtime panics so a
//! malformed input degrades to an error rather than bringing down the
//! service.

use crate::embedding::{Embedder, DEFAULT_DIMENSIONS};
use crate::error::{EmbeddingError, Result};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Mutex, OnceLock};

static EMBEDDING_MODEL: OnceLock<Mutex<fastembed::TextEmbedding>> = OnceLock::new();

/// Embedder backed by the `fastembed` crate's all-MiniLM-L6-v2 model.
///
/// The model is loaded lazily on first use, not at construction, so
/// creating this embedder never touches the network or disk.
pub struct FastEmbedEmbedder {
    model_name: &'static str,
}

impl FastEmbedEmbedder {
    /// Creates a new embedder handle. The underlying model is not loaded
    /// until the first [`Embedder::embed`] call.
    ///
    /// # Errors
    ///
    /// Never fails; kept fallible to match the [`Embedder`] construction
    /// contract used elsewhere in the crate.
    #[allow(clippy::unnecessary_wraps)]
    pub fn new() -> Result<Self> {
        Ok(Self {
            model_name: "all-MiniLM-L6-v2",
        })
    }

    fn model() -> Result<&'static Mutex<fastembed::TextEmbedding>> {
        if let Some(model) = EMBEDDING_MODEL.get() {
            return Ok(model);
        }

        let options = fastembed::InitOptions::new(fastembed::EmbeddingModel::AllMiniLML6V2)
            .with_show_download_progress(false);
        let model = fastembed::TextEmbedding::try_new(options).map_err(|e| {
            EmbeddingError::Unavailable {
                reason: format!("failed to load embedding model: {e}"),
            }
        })?;

        let _ = EMBEDDING_MODEL.set(Mutex::new(model));
        EMBEDDING_MODEL.get().ok_or_else(|| {
            EmbeddingError::Unavailable {
                reason: "model initialization race".to_string(),
            }
            .into()
        })
    }

    /// The underlying model's human-readable name.
    #[must_use]
    pub const fn model_name(&self) -> &'static str {
        self.model_name
    }
}

impl Embedder for FastEmbedEmbedder {
    fn dimensions(&self) -> usize {
        DEFAULT_DIMENSIONS
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Err(EmbeddingError::Unavailable {
                reason: "cannot embed empty text".to_string(),
            }
            .into());
        }

        let model = Self::model()?;
        let mut model = model.lock().map_err(|e| EmbeddingError::Unavailable {
            reason: format!("failed to lock embedding model: {e}"),
        })?;

        let texts = [text];
        let result = catch_unwind(AssertUnwindSafe(|| model.embed(texts.to_vec(), None)));

        let embeddings = result
            .map_err(|panic_info| {
                EmbeddingError::Unavailable {
                    reason: format!("onnx runtime panic: {}", describe_panic(&panic_info)),
                }
            })?
            .map_err(|e| EmbeddingError::Unavailable {
                reason: format!("embedding failed: {e}"),
            })?;

        embeddings.into_iter().next().ok_or_else(|| {
            EmbeddingError::Unavailable {
                reason: "model returned no embedding".to_string(),
            }
            .into()
        })
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|t| t.is_empty()) {
            return Err(EmbeddingError::Unavailable {
                reason: "cannot embed empty text".to_string(),
            }
            .into());
        }

        let model = Self::model()?;
        let mut model = model.lock().map_err(|e| EmbeddingError::Unavailable {
            reason: format!("failed to lock embedding model: {e}"),
        })?;

        let owned: Vec<String> = texts.iter().map(|t| (*t).to_string()).collect();
        let result = catch_unwind(AssertUnwindSafe(|| model.embed(owned, None)));

        result
            .map_err(|panic_info| {
                EmbeddingError::Unavailable {
                    reason: format!("onnx runtime panic: {}", describe_panic(&panic_info)),
                }
                .into()
            })
            .and_then(|r| {
                r.map_err(|e| {
                    EmbeddingError::Unavailable {
                        reason: format!("batch embedding failed: {e}"),
                    }
                    .into()
                })
            })
    }
}

fn describe_panic(panic_info: &(dyn std::any::Any + Send)) -> String {
    panic_info
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic_info.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
