//! Memory-marker extraction: detects PATTERN / WORKING_SOLUTION / WAITING
//! cues in chunk text via case-insensitive, word-boundary keyword matching.

use crate::core::MemoryType;
use regex::Regex;
use std::sync::OnceLock;

/// Half-width of the context window captured around a keyword match.
const CONTEXT_RADIUS: usize = 100;

/// One detected marker occurrence, with surrounding context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerMatch {
    /// The category this match belongs to.
    pub memory_type: MemoryType,
    /// The keyword that matched, lowercased.
    pub keyword: String,
    /// Up to ±100 chars of surrounding text.
    pub context: String,
}

/// Result of running the extractor over one chunk of text.
#[derive(Debug, Clone, Default)]
pub struct MarkerExtraction {
    /// Distinct memory types detected, ordered by first occurrence.
    pub memory_types: Vec<MemoryType>,
    /// Every individual keyword match, in text order.
    pub matches: Vec<MarkerMatch>,
}

fn keyword_patterns(memory_type: MemoryType) -> &'static [&'static str] {
    match memory_type {
        MemoryType::Pattern => &[
            "design pattern",
            "pattern",
            "approach",
            "architecture",
            "strategy",
        ],
        MemoryType::WorkingSolution => &["working", "tested", "verified", "solved"],
        MemoryType::Waiting => &["todo", "pending", "waiting", "blocked", "in progress"],
    }
}

fn compiled_regex(memory_type: MemoryType) -> &'static Regex {
    macro_rules! static_regex {
        ($name:ident, $memory_type:expr) => {{
            static $name: OnceLock<Regex> = OnceLock::new();
            $name.get_or_init(|| {
                let alternation = keyword_patterns($memory_type).join("|");
                Regex::new(&format!(r"(?i)\b({alternation})\b")).expect("valid marker regex")
            })
        }};
    }

    match memory_type {
        MemoryType::Pattern => static_regex!(PATTERN_RE, MemoryType::Pattern),
        MemoryType::WorkingSolution => static_regex!(WORKING_SOLUTION_RE, MemoryType::WorkingSolution),
        MemoryType::Waiting => static_regex!(WAITING_RE, MemoryType::Waiting),
    }
}

/// Extracts the ordered, distinct set of memory markers present in `text`,
/// plus every individual keyword match with a ±100-char context window.
#[must_use]
pub fn extract_markers(text: &str) -> MarkerExtraction {
    const CATEGORIES: [MemoryType; 3] = [
        MemoryType::Pattern,
        MemoryType::WorkingSolution,
        MemoryType::Waiting,
    ];

    let mut matches: Vec<(usize, MarkerMatch)> = Vec::new();
    for memory_type in CATEGORIES {
        for m in compiled_regex(memory_type).find_iter(text) {
            let start = m.start().saturating_sub(CONTEXT_RADIUS);
            let end = (m.end() + CONTEXT_RADIUS).min(text.len());
            let start = floor_char_boundary(text, start);
            let end = ceil_char_boundary(text, end);
            matches.push((
                m.start(),
                MarkerMatch {
                    memory_type,
                    keyword: m.as_str().to_ascii_lowercase(),
                    context: text[start..end].to_string(),
                },
            ));
        }
    }
    matches.sort_by_key(|(pos, _)| *pos);

    let mut memory_types = Vec::new();
    for (_, m) in &matches {
        if !memory_types.contains(&m.memory_type) {
            memory_types.push(m.memory_type);
        }
    }

    MarkerExtraction {
        memory_types,
        matches: matches.into_iter().map(|(_, m)| m).collect(),
    }
}

fn floor_char_boundary(text: &str, mut pos: usize) -> usize {
    while pos > 0 && !text.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

fn ceil_char_boundary(text: &str, mut pos: usize) -> usize {
    while pos < text.len() && !text.is_char_boundary(pos) {
        pos += 1;
    }
    pos
}
