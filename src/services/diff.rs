//! Semantic diff of two sessions via greedy cosine-pair matching over their
//! indexed chunks, plus a tag/memory-type topic overlap score (§4.12).
//!
//! The spec frames this as message-level comparison; this crate only keeps
//! embeddings at chunk granularity, so chunks stand in as the comparison
//! unit (the closest available embedded granularity).

use crate::core::Chunk;
use crate::embedding::cosine_similarity;
use std::collections::HashSet;

/// Weight given to content similarity in the overall diff score.
const CONTENT_WEIGHT: f64 = 0.7;
/// Weight given to topic-set overlap in the overall diff score.
const TOPIC_WEIGHT: f64 = 0.3;

/// One greedily-matched pair of chunks, one from each session.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedPair {
    /// Matching chunk from session A.
    pub a_chunk_id: String,
    /// Matching chunk from session B.
    pub b_chunk_id: String,
    /// Cosine similarity between the two.
    pub similarity: f32,
}

/// Result of comparing two sessions.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionDiff {
    /// Chunks matched above the similarity threshold.
    pub common: Vec<MatchedPair>,
    /// Chunk ids from session A with no match above threshold.
    pub unique_to_a: Vec<String>,
    /// Chunk ids from session B with no match above threshold.
    pub unique_to_b: Vec<String>,
    /// `0.7 * mean(common similarities) + 0.3 * topic_overlap`.
    pub overall: f64,
}

fn topic_set(chunks: &[Chunk]) -> HashSet<String> {
    chunks
        .iter()
        .flat_map(|c| c.metadata.tags.iter().cloned().chain(c.metadata.memory_types.iter().map(|m| format!("{m:?}"))))
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Greedily matches chunks between `a` and `b` by cosine similarity,
/// highest-scoring pairs first, each chunk used at most once.
#[must_use]
pub fn diff_sessions(a: &[Chunk], b: &[Chunk], match_threshold: f32) -> SessionDiff {
    let mut candidates: Vec<(usize, usize, f32)> = Vec::new();
    for (i, ca) in a.iter().enumerate() {
        let Some(va) = &ca.embedding else { continue };
        for (j, cb) in b.iter().enumerate() {
            let Some(vb) = &cb.embedding else { continue };
            let sim = cosine_similarity(va, vb);
            if sim >= match_threshold {
                candidates.push((i, j, sim));
            }
        }
    }
    candidates.sort_by(|x, y| y.2.total_cmp(&x.2));

    let mut used_a = vec![false; a.len()];
    let mut used_b = vec![false; b.len()];
    let mut common = Vec::new();
    for (i, j, sim) in candidates {
        if used_a[i] || used_b[j] {
            continue;
        }
        used_a[i] = true;
        used_b[j] = true;
        common.push(MatchedPair { a_chunk_id: a[i].chunk_id.clone(), b_chunk_id: b[j].chunk_id.clone(), similarity: sim });
    }

    let unique_to_a = a.iter().enumerate().filter(|(i, _)| !used_a[*i]).map(|(_, c)| c.chunk_id.clone()).collect();
    let unique_to_b = b.iter().enumerate().filter(|(i, _)| !used_b[*i]).map(|(_, c)| c.chunk_id.clone()).collect();

    let content_score = if common.is_empty() {
        0.0
    } else {
        common.iter().map(|m| f64::from(m.similarity)).sum::<f64>() / common.len() as f64
    };
    let topic_overlap = jaccard(&topic_set(a), &topic_set(b));
    let overall = CONTENT_WEIGHT * content_score + TOPIC_WEIGHT * topic_overlap;

    SessionDiff { common, unique_to_a, unique_to_b, overall }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Chunk;

    fn chunk_with(session: &str, idx: usize, embedding: Vec<f32>, tags: Vec<String>) -> Chunk {
        let mut c = Chunk::new(session, idx, format!("text {idx}"), 0..1, "proj".into());
        c.set_embedding(embedding);
        c.metadata.tags = tags;
        c
    }

    #[test]
    fn test_identical_sessions_match_fully() {
        let a = vec![chunk_with("a", 0, vec![1.0, 0.0], vec!["auth".into()])];
        let b = vec![chunk_with("b", 0, vec![1.0, 0.0], vec!["auth".into()])];
        let diff = diff_sessions(&a, &b, 0.5);
        assert_eq!(diff.common.len(), 1);
        assert!(diff.unique_to_a.is_empty());
        assert!(diff.unique_to_b.is_empty());
        assert!(diff.overall > 0.9);
    }

    #[test]
    fn test_disjoint_sessions_yield_no_matches() {
        let a = vec![chunk_with("a", 0, vec![1.0, 0.0], vec![])];
        let b = vec![chunk_with("b", 0, vec![0.0, 1.0], vec![])];
        let diff = diff_sessions(&a, &b, 0.5);
        assert!(diff.common.is_empty());
        assert_eq!(diff.unique_to_a.len(), 1);
        assert_eq!(diff.unique_to_b.len(), 1);
    }

    #[test]
    fn test_greedy_matching_is_one_to_one() {
        let a = vec![chunk_with("a", 0, vec![1.0, 0.0], vec![]), chunk_with("a", 1, vec![0.9, 0.1], vec![])];
        let b = vec![chunk_with("b", 0, vec![1.0, 0.0], vec![])];
        let diff = diff_sessions(&a, &b, 0.5);
        assert_eq!(diff.common.len(), 1);
        assert_eq!(diff.unique_to_a.len(), 1);
    }

    #[test]
    fn test_missing_embeddings_are_skipped() {
        let a = vec![Chunk::new("a", 0, "no embedding".into(), 0..1, "proj".into())];
        let b = vec![chunk_with("b", 0, vec![1.0, 0.0], vec![])];
        let diff = diff_sessions(&a, &b, 0.5);
        assert!(diff.common.is_empty());
        assert_eq!(diff.unique_to_a.len(), 1);
    }
}
