//! Chunk representation for the vector index.

use serde::{Deserialize, Serialize};
use std::ops::Range;

/// A memory-marker category detected in a chunk's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemoryType {
    /// Architecture/approach discussion.
    Pattern,
    /// A solution the conversation confirmed worked.
    WorkingSolution,
    /// An open item the conversation left unresolved.
    Waiting,
}

impl MemoryType {
    /// The additive ranking boost this marker contributes, per §4.3.
    #[must_use]
    pub const fn boost(self) -> f64 {
        match self {
            Self::Pattern => 0.05,
            Self::WorkingSolution => 0.08,
            Self::Waiting => 0.02,
        }
    }
}

/// Scalar metadata stored alongside a chunk's embedding.
///
/// Lists here are encoded as JSON strings by the vector store adapter when
/// persisted, since the backing store only round-trips scalar columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Owning session id.
    pub session_id: String,
    /// Originating project label.
    pub project: String,
    /// RFC 3339 timestamp of the chunk's content (from its first message).
    pub timestamp: Option<String>,
    /// Contiguous range of message indices this chunk covers.
    pub message_indices: Range<usize>,
    /// Ordered, distinct memory markers detected in the chunk's text.
    pub memory_types: Vec<MemoryType>,
    /// Lowercase-normalized tags inherited from the owning session.
    pub tags: Vec<String>,
    /// Whether this chunk currently lives in the archive partition.
    pub archived: bool,
}

/// A chunk of transcript text, the unit of embedding and retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// `session_id:chunk_index`.
    pub chunk_id: String,
    /// 0-based, dense index within the owning session.
    pub chunk_index: usize,
    /// Chunk text.
    pub text: String,
    /// Approximate token count (4 chars ≈ 1 token).
    pub token_count: usize,
    /// Embedding vector, present once the embedding gateway has run.
    pub embedding: Option<Vec<f32>>,
    /// Scalar + list metadata for filtering.
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// Builds the canonical `chunk_id` for a session/index pair.
    #[must_use]
    pub fn make_id(session_id: &str, chunk_index: usize) -> String {
        format!("{session_id}:{chunk_index}")
    }

    /// Creates a new, not-yet-embedded chunk.
    #[must_use]
    pub fn new(
        session_id: &str,
        chunk_index: usize,
        text: String,
        message_indices: Range<usize>,
        project: String,
    ) -> Self {
        let token_count = text.len().div_ceil(4);
        Self {
            chunk_id: Self::make_id(session_id, chunk_index),
            chunk_index,
            text,
            token_count,
            embedding: None,
            metadata: ChunkMetadata {
                session_id: session_id.to_string(),
                project,
                timestamp: None,
                message_indices,
                memory_types: Vec::new(),
                tags: Vec::new(),
                archived: false,
            },
        }
    }

    /// Sets the embedding vector.
    pub fn set_embedding(&mut self, embedding: Vec<f32>) {
        self.embedding = Some(embedding);
    }

    /// Computes the additive memory-marker boost for this chunk, capped at
    /// 0.15 per §4.3.
    #[must_use]
    pub fn memory_boost(&self) -> f64 {
        let total: f64 = self.metadata.memory_types.iter().map(|m| m.boost()).sum();
        total.min(0.15)
    }
}
