//! Duplicate-session detection: pairs whose mean, L2-normalized chunk
//! embeddings exceed a similarity threshold (§4.12).

use crate::core::Chunk;
use crate::embedding::cosine_similarity;

/// Minimum chunk count, per side, for a session to be eligible.
pub const MIN_CHUNKS: usize = 3;
/// Default similarity threshold for flagging a pair as duplicates.
pub const DEFAULT_THRESHOLD: f32 = 0.85;

/// One flagged duplicate pair.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicatePair {
    /// First session id.
    pub a: String,
    /// Second session id.
    pub b: String,
    /// Cosine similarity between their session-level embeddings.
    pub similarity: f32,
}

/// Computes a session-level embedding: the mean of its chunks' embeddings,
/// L2-normalized. Returns `None` if no chunk carries an embedding.
#[must_use]
pub fn session_embedding(chunks: &[Chunk]) -> Option<Vec<f32>> {
    let vectors: Vec<&Vec<f32>> = chunks.iter().filter_map(|c| c.embedding.as_ref()).collect();
    let dims = vectors.first()?.len();
    if dims == 0 {
        return None;
    }

    let mut mean = vec![0.0f32; dims];
    for v in &vectors {
        if v.len() != dims {
            continue;
        }
        for (m, x) in mean.iter_mut().zip(v.iter()) {
            *m += x;
        }
    }
    let count = vectors.len() as f32;
    for m in &mut mean {
        *m /= count;
    }

    let norm = mean.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        return Some(mean);
    }
    Some(mean.into_iter().map(|x| x / norm).collect())
}

/// Finds all pairs among `sessions` (id, chunks) whose session-level
/// embeddings exceed `threshold`, requiring at least [`MIN_CHUNKS`] chunks
/// on each side.
#[must_use]
pub fn find_duplicates(sessions: &[(String, Vec<Chunk>)], threshold: f32) -> Vec<DuplicatePair> {
    let embedded: Vec<(&str, Vec<f32>)> = sessions
        .iter()
        .filter(|(_, chunks)| chunks.len() >= MIN_CHUNKS)
        .filter_map(|(id, chunks)| session_embedding(chunks).map(|v| (id.as_str(), v)))
        .collect();

    let mut pairs = Vec::new();
    for i in 0..embedded.len() {
        for j in (i + 1)..embedded.len() {
            let sim = cosine_similarity(&embedded[i].1, &embedded[j].1);
            if sim >= threshold {
                pairs.push(DuplicatePair { a: embedded[i].0.to_string(), b: embedded[j].0.to_string(), similarity: sim });
            }
        }
    }
    pairs.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    pairs
}
