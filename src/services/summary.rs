//! Per-session extractive summary: top-k sentences by TF-IDF over the
//! session's chunk text, excluding fenced code blocks (§4.12).

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)```.*?```").expect("valid code-fence regex"));
static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[A-Za-z0-9_']+").expect("valid word regex"));

/// Strips fenced code blocks from `text`.
#[must_use]
fn strip_code_blocks(text: &str) -> String {
    CODE_FENCE.replace_all(text, " ").to_string()
}

/// Splits `text` into sentences on `.`/`!`/`?` followed by whitespace,
/// without relying on lookbehind (unsupported by the `regex` crate).
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if matches!(bytes[i], b'.' | b'!' | b'?') {
            let next_is_boundary = bytes.get(i + 1).is_none_or(|b| b.is_ascii_whitespace());
            if next_is_boundary {
                sentences.push(text[start..=i].trim());
                start = i + 1;
            }
        }
        i += 1;
    }
    if start < text.len() {
        let tail = text[start..].trim();
        if !tail.is_empty() {
            sentences.push(tail);
        }
    }
    sentences.into_iter().filter(|s| !s.is_empty()).collect()
}

fn tokenize(sentence: &str) -> Vec<String> {
    WORD.find_iter(sentence).map(|m| m.as_str().to_ascii_lowercase()).collect()
}

/// Produces a top-`top_k`-sentence extractive summary of `text`.
///
/// Sentences are scored by the sum of their tokens' TF-IDF weight, computed
/// over the sentence set as the document corpus, then returned in their
/// original order (not score order) so the summary reads coherently.
#[must_use]
pub fn generate_summary(text: &str, top_k: usize) -> String {
    let cleaned = strip_code_blocks(text);
    let sentences: Vec<&str> = split_sentences(cleaned.trim());
    if sentences.is_empty() {
        return String::new();
    }
    if sentences.len() <= top_k {
        return sentences.join(" ");
    }

    let tokenized: Vec<Vec<String>> = sentences.iter().map(|s| tokenize(s)).collect();
    let n = tokenized.len() as f64;

    let mut doc_freq: HashMap<&str, usize> = HashMap::new();
    for tokens in &tokenized {
        let mut seen = std::collections::HashSet::new();
        for t in tokens {
            if seen.insert(t.as_str()) {
                *doc_freq.entry(t.as_str()).or_insert(0) += 1;
            }
        }
    }

    let mut scored: Vec<(usize, f64)> = tokenized
        .iter()
        .enumerate()
        .map(|(i, tokens)| {
            if tokens.is_empty() {
                return (i, 0.0);
            }
            let mut tf: HashMap<&str, usize> = HashMap::new();
            for t in tokens {
                *tf.entry(t.as_str()).or_insert(0) += 1;
            }
            let score: f64 = tf
                .iter()
                .map(|(term, count)| {
                    let df = doc_freq.get(term).copied().unwrap_or(1) as f64;
                    let idf = (n / df).ln().max(0.0) + 1.0;
                    (*count as f64 / tokens.len() as f64) * idf
                })
                .sum();
            (i, score)
        })
        .collect();

    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    let mut top_indices: Vec<usize> = scored.into_iter().take(top_k).map(|(i, _)| i).collect();
    top_indices.sort_unstable();

    top_indices.into_iter().map(|i| sentences[i].trim()).collect::<Vec<_>>().join(" ")
}

/// Returns whether a cached summary should be regenerated: true when the
/// chunk count has changed by at least 10% since the summary was produced.
#[must_use]
pub fn should_regenerate(summarized_at_chunk_count: usize, current_chunk_count: usize) -> bool {
    if summarized_at_chunk_count == 0 {
        return current_chunk_count > 0;
    }
    let delta = summarized_at_chunk_count.abs_diff(current_chunk_count);
    (delta as f64 / summarized_at_chunk_count as f64) >= 0.10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_blocks_removes_fences() {
        let text = "Before. ```let x = 1;``` After.";
        let cleaned = strip_code_blocks(text);
        assert!(!cleaned.contains("let x"));
    }

    #[test]
    fn test_short_text_returned_whole() {
        let text = "One sentence only.";
        assert_eq!(generate_summary(text, 3), "One sentence only.");
    }

    #[test]
    fn test_summary_picks_top_k_sentences_in_order() {
        let text = "The cat sat. The cat sat on the mat. Routing configuration uses nginx upstream pools extensively. A short one. Another unrelated sentence about weather and clouds.";
        let summary = generate_summary(text, 2);
        assert!(!summary.is_empty());
        assert!(summary.split(' ').count() < text.split(' ').count());
    }

    #[test]
    fn test_empty_text_yields_empty_summary() {
        assert_eq!(generate_summary("   ", 3), String::new());
    }

    #[test]
    fn test_should_regenerate_threshold() {
        assert!(!should_regenerate(100, 105));
        assert!(should_regenerate(100, 111));
        assert!(should_regenerate(0, 1));
        assert!(!should_regenerate(0, 0));
    }
}
