//! Message-sequence chunker.
//!
//! Splits a session's message list into overlapping, code-block-safe chunks
//! sized by an approximate 4-chars-per-token heuristic.

use crate::chunking::marker::extract_markers;
use crate::core::{Chunk, Message, MessageRole, Timestamp};
use crate::error::{ChunkingError, Result};
use std::ops::Range;

/// Tunable bounds for [`MessageChunker`], in tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkingConfig {
    /// Preferred chunk size; a chunk flushes once it reaches this size
    /// outside an open code fence.
    pub target_tokens: usize,
    /// Approximate token overlap carried into the next chunk.
    pub overlap_tokens: usize,
    /// Hard upper bound; exceeding it forces a flush even mid-fence.
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_tokens: 750,
            overlap_tokens: 150,
            max_tokens: 1000,
        }
    }
}

impl ChunkingConfig {
    fn validate(self) -> Result<()> {
        if self.target_tokens == 0 {
            return Err(ChunkingError::InvalidConfig {
                reason: "target_tokens must be > 0".to_string(),
            }
            .into());
        }
        if self.max_tokens < self.target_tokens {
            return Err(ChunkingError::InvalidConfig {
                reason: "max_tokens must be >= target_tokens".to_string(),
            }
            .into());
        }
        if self.overlap_tokens >= self.target_tokens {
            return Err(ChunkingError::InvalidConfig {
                reason: "overlap_tokens must be < target_tokens".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

/// Splits message sequences into chunks per [`ChunkingConfig`].
#[derive(Debug, Clone)]
pub struct MessageChunker {
    config: ChunkingConfig,
}

impl Default for MessageChunker {
    fn default() -> Self {
        Self::new(ChunkingConfig::default())
    }
}

impl MessageChunker {
    /// Creates a chunker with the given configuration.
    #[must_use]
    pub const fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    /// Chunks `messages` belonging to `session_id`/`project`.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkingError::InvalidConfig`] if the configuration's
    /// token bounds are inconsistent.
    pub fn chunk(
        &self,
        messages: &[Message],
        session_id: &str,
        project: &str,
    ) -> Result<Vec<Chunk>> {
        self.config.validate()?;

        if messages.is_empty() {
            return Ok(Vec::new());
        }

        let mut chunks = Vec::new();
        let mut buffer: Vec<usize> = Vec::new();
        let mut i = 0;

        let min_chunk_tokens = self.config.target_tokens / 3;

        while i < messages.len() {
            let msg_tokens = messages[i].estimate_tokens();

            if msg_tokens > self.config.max_tokens {
                // A standalone flush of `buffer` here would not be the
                // session's final chunk if more messages follow, so a small
                // buffer must not be emitted on its own: fold it into the
                // oversized message's leading split instead of flushing it
                // first.
                let carry = if !buffer.is_empty() && buffer_tokens(&buffer, messages) < min_chunk_tokens {
                    std::mem::take(&mut buffer)
                } else {
                    if !buffer.is_empty() {
                        self.flush(&buffer, messages, session_id, project, &mut chunks);
                        buffer.clear();
                    }
                    Vec::new()
                };
                self.push_oversized(i, messages, session_id, project, &carry, &mut chunks);
                i += 1;
                continue;
            }

            let projected = buffer_tokens(&buffer, messages) + msg_tokens;
            if !buffer.is_empty() && projected > self.config.max_tokens {
                if buffer_tokens(&buffer, messages) < min_chunk_tokens {
                    // `buffer` alone would fall under the minimum chunk-size
                    // floor and this isn't the final chunk; absorb this
                    // message's budget into it rather than emit a tiny
                    // orphan chunk, even though the combined size exceeds
                    // `max_tokens`.
                    buffer.push(i);
                    i += 1;
                }
                let overlap = self.compute_overlap(&buffer, messages);
                self.flush(&buffer, messages, session_id, project, &mut chunks);
                buffer = overlap;
                continue;
            }

            buffer.push(i);
            i += 1;

            if buffer_tokens(&buffer, messages) >= self.config.target_tokens
                && fence_balanced(&buffer, messages)
            {
                let overlap = self.compute_overlap(&buffer, messages);
                self.flush(&buffer, messages, session_id, project, &mut chunks);
                buffer = overlap;
            }
        }

        if !buffer.is_empty() {
            self.flush(&buffer, messages, session_id, project, &mut chunks);
        }

        Ok(chunks)
    }

    /// Returns the trailing suffix of `buffer` whose token total is closest
    /// to, but not exceeding, `overlap_tokens`. Falls back to an empty
    /// buffer if even the single trailing message exceeds `max_tokens`,
    /// guaranteeing the caller always makes forward progress.
    fn compute_overlap(&self, buffer: &[usize], messages: &[Message]) -> Vec<usize> {
        if self.config.overlap_tokens == 0 {
            return Vec::new();
        }
        let mut tail = Vec::new();
        let mut tokens = 0;
        for &idx in buffer.iter().rev() {
            let t = messages[idx].estimate_tokens();
            if tokens + t > self.config.max_tokens {
                break;
            }
            tail.push(idx);
            tokens += t;
            if tokens >= self.config.overlap_tokens {
                break;
            }
        }
        tail.reverse();
        tail
    }

    fn flush(
        &self,
        buffer: &[usize],
        messages: &[Message],
        session_id: &str,
        project: &str,
        out: &mut Vec<Chunk>,
    ) {
        let Some(&first) = buffer.first() else {
            return;
        };
        let Some(&last) = buffer.last() else {
            return;
        };

        let text = render_messages(buffer, messages);
        let chunk_index = out.len();
        let mut chunk = Chunk::new(
            session_id,
            chunk_index,
            text,
            first..(last + 1),
            project.to_string(),
        );
        chunk.metadata.timestamp = messages[first].timestamp.map(Timestamp::to_rfc3339);
        chunk.metadata.memory_types = extract_markers(&chunk.text).memory_types;
        out.push(chunk);
    }

    /// Splits a single message whose own text exceeds `max_tokens` into
    /// several chunks, breaking at paragraph then line boundaries and never
    /// inside a fenced code block (best-effort at the hard size cap).
    ///
    /// `carry` is a short, otherwise-too-small buffer of preceding message
    /// indices folded into the leading split chunk's text and range instead
    /// of being emitted as its own undersized chunk.
    fn push_oversized(
        &self,
        msg_idx: usize,
        messages: &[Message],
        session_id: &str,
        project: &str,
        carry: &[usize],
        out: &mut Vec<Chunk>,
    ) {
        let text = &messages[msg_idx].content;
        let max_chars = self.config.max_tokens * 4;
        for (split_index, range) in split_text_into_ranges(text, max_chars).into_iter().enumerate() {
            let chunk_index = out.len();
            let (chunk_text, first_index) = if split_index == 0 && !carry.is_empty() {
                (format!("{}\n\n{}", render_messages(carry, messages), &text[range]), carry[0])
            } else {
                (text[range].to_string(), msg_idx)
            };
            let mut chunk = Chunk::new(
                session_id,
                chunk_index,
                chunk_text,
                first_index..(msg_idx + 1),
                project.to_string(),
            );
            chunk.metadata.timestamp = messages[msg_idx].timestamp.map(Timestamp::to_rfc3339);
            chunk.metadata.memory_types = extract_markers(&chunk.text).memory_types;
            out.push(chunk);
        }
    }
}

fn buffer_tokens(buffer: &[usize], messages: &[Message]) -> usize {
    buffer.iter().map(|&i| messages[i].estimate_tokens()).sum()
}

fn fence_balanced(buffer: &[usize], messages: &[Message]) -> bool {
    let fences: usize = buffer
        .iter()
        .map(|&i| messages[i].content.matches("```").count())
        .sum();
    fences % 2 == 0
}

fn role_label(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::Other => "other",
    }
}

fn render_messages(buffer: &[usize], messages: &[Message]) -> String {
    buffer
        .iter()
        .map(|&i| format!("{}: {}", role_label(messages[i].role), messages[i].content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Splits `text` into byte ranges each no longer than `max_chars`,
/// preferring a paragraph break, then a line break, then a raw char
/// boundary. A break point inside an open fenced code block is skipped in
/// favor of the next-best candidate.
fn split_text_into_ranges(text: &str, max_chars: usize) -> Vec<Range<usize>> {
    if text.is_empty() {
        return Vec::new();
    }

    let toggles: Vec<usize> = text.match_indices("```").map(|(i, _)| i).collect();
    let inside_fence = |pos: usize| toggles.iter().filter(|&&t| t < pos).count() % 2 == 1;

    let mut ranges = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let cap = (start + max_chars).min(text.len());
        if cap >= text.len() {
            ranges.push(start..text.len());
            break;
        }

        let window = &text[start..cap];
        let boundary = window
            .rfind("\n\n")
            .map(|idx| start + idx + 2)
            .filter(|&b| b > start && !inside_fence(b))
            .or_else(|| {
                window
                    .rfind('\n')
                    .map(|idx| start + idx + 1)
                    .filter(|&b| b > start && !inside_fence(b))
            })
            .unwrap_or_else(|| {
                let mut b = cap;
                while b > start && !text.is_char_boundary(b) {
                    b -= 1;
                }
                if b <= start {
                    b = start + 1;
                    while b < text.len() && !text.is_char_boundary(b) {
                        b += 1;
                    }
                }
                b
            });

        ranges.push(start..boundary);
        start = boundary;
    }

    ranges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{MessageRole, Timestamp};

    fn msg(role: MessageRole, content: &str) -> Message {
        Message::new(role, content.to_string(), None, None).unwrap()
    }

    #[test]
    fn test_empty_input_produces_no_chunks() {
        let chunker = MessageChunker::default();
        let chunks = chunker.chunk(&[], "s1", "proj").unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_small_session_produces_one_chunk() {
        let chunker = MessageChunker::default();
        let messages = vec![
            msg(MessageRole::User, "How do I parse JSON in Rust?"),
            msg(MessageRole::Assistant, "Use serde_json::from_str."),
        ];
        let chunks = chunker.chunk(&messages, "s1", "proj").unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].metadata.message_indices, 0..2);
        assert_eq!(chunks[0].chunk_id, "s1:0");
    }

    #[test]
    fn test_large_session_splits_into_multiple_chunks() {
        let config = ChunkingConfig {
            target_tokens: 50,
            overlap_tokens: 10,
            max_tokens: 80,
        };
        let chunker = MessageChunker::new(config);
        let messages: Vec<Message> = (0..20)
            .map(|i| {
                let role = if i % 2 == 0 {
                    MessageRole::User
                } else {
                    MessageRole::Assistant
                };
                msg(role, &"word ".repeat(20))
            })
            .collect();
        let chunks = chunker.chunk(&messages, "s1", "proj").unwrap();
        assert!(chunks.len() > 1);
        for (idx, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, idx);
        }
    }

    #[test]
    fn test_adjacent_chunks_overlap_without_gap() {
        let config = ChunkingConfig {
            target_tokens: 40,
            overlap_tokens: 10,
            max_tokens: 60,
        };
        let chunker = MessageChunker::new(config);
        let messages: Vec<Message> = (0..10)
            .map(|_| msg(MessageRole::User, &"token ".repeat(10)))
            .collect();
        let chunks = chunker.chunk(&messages, "s1", "proj").unwrap();
        for pair in chunks.windows(2) {
            let a = &pair[0].metadata.message_indices;
            let b = &pair[1].metadata.message_indices;
            assert!(b.start <= a.end, "chunk message_indices must not gap");
        }
    }

    #[test]
    fn test_oversized_single_message_is_split() {
        let config = ChunkingConfig {
            target_tokens: 50,
            overlap_tokens: 10,
            max_tokens: 100,
        };
        let chunker = MessageChunker::new(config);
        let huge_text = "Paragraph one sentence.\n\n".repeat(100);
        let messages = vec![msg(MessageRole::Assistant, &huge_text)];
        let chunks = chunker.chunk(&messages, "s1", "proj").unwrap();
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert_eq!(chunk.metadata.message_indices, 0..1);
        }
    }

    #[test]
    fn test_never_splits_inside_fenced_code_block() {
        let config = ChunkingConfig {
            target_tokens: 20,
            overlap_tokens: 5,
            max_tokens: 40,
        };
        let chunker = MessageChunker::new(config);
        let code = format!("intro text\n\n```\n{}\n```\n\nmore text here", "line\n".repeat(30));
        let messages = vec![msg(MessageRole::Assistant, &code)];
        let chunks = chunker.chunk(&messages, "s1", "proj").unwrap();
        for chunk in &chunks {
            assert_eq!(chunk.text.matches("```").count() % 2, 0);
        }
    }

    #[test]
    fn test_small_leading_buffer_is_merged_into_oversized_chunk_not_flushed_alone() {
        let config = ChunkingConfig {
            target_tokens: 90,
            overlap_tokens: 10,
            max_tokens: 40,
        };
        let chunker = MessageChunker::new(config);
        let messages = vec![
            msg(MessageRole::User, "hi"),
            msg(MessageRole::Assistant, &"word ".repeat(100)),
        ];
        let chunks = chunker.chunk(&messages, "s1", "proj").unwrap();
        assert!(chunks.len() > 1, "the oversized message should still split into several chunks");
        // The tiny leading message must be folded into the first split
        // chunk's range rather than emitted as its own undersized chunk.
        assert_eq!(chunks[0].metadata.message_indices.start, 0);
        assert!(chunks[0].text.contains("hi"));
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(chunk.token_count >= config.target_tokens / 3, "non-final chunk fell under the minimum size floor");
        }
    }

    #[test]
    fn test_small_buffer_absorbs_next_message_instead_of_flushing_alone() {
        let config = ChunkingConfig {
            target_tokens: 90,
            overlap_tokens: 10,
            max_tokens: 40,
        };
        let chunker = MessageChunker::new(config);
        // message0 alone sits under the floor (25 tokens < 30); message1 (20
        // tokens) pushes the buffer over max_tokens, forcing the absorb path.
        // message2 is small enough that the post-flush overlap buffer (just
        // message1) accepts it without overflowing again.
        let messages = vec![
            msg(MessageRole::User, &"b".repeat(100)),
            msg(MessageRole::Assistant, &"a".repeat(80)),
            msg(MessageRole::User, "thanks, that helps a lot with the routing bug"),
        ];
        let chunks = chunker.chunk(&messages, "s1", "proj").unwrap();
        assert_eq!(chunks[0].metadata.message_indices, 0..2, "the small leading message must be absorbed, not flushed alone");
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(chunk.token_count >= config.target_tokens / 3, "non-final chunk fell under the minimum size floor");
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let chunker = MessageChunker::new(ChunkingConfig {
            target_tokens: 0,
            overlap_tokens: 0,
            max_tokens: 10,
        });
        let messages = vec![msg(MessageRole::User, "hi")];
        assert!(chunker.chunk(&messages, "s1", "proj").is_err());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_target_rejected() {
        let chunker = MessageChunker::new(ChunkingConfig {
            target_tokens: 10,
            overlap_tokens: 10,
            max_tokens: 20,
        });
        let messages = vec![msg(MessageRole::User, "hi")];
        assert!(chunker.chunk(&messages, "s1", "proj").is_err());
    }

    #[test]
    fn test_chunk_carries_first_message_timestamp() {
        let chunker = MessageChunker::default();
        let ts = Timestamp::from_json(&serde_json::json!("2024-01-15T10:30:00Z")).unwrap();
        let message = Message::new(MessageRole::User, "hello".to_string(), Some(ts), None).unwrap();
        let chunks = chunker.chunk(&[message], "s1", "proj").unwrap();
        assert!(chunks[0].metadata.timestamp.is_some());
    }

    #[test]
    fn test_memory_markers_attached() {
        let chunker = MessageChunker::default();
        let messages = vec![msg(
            MessageRole::Assistant,
            "We verified the fix is tested and working in production.",
        )];
        let chunks = chunker.chunk(&messages, "s1", "proj").unwrap();
        assert!(!chunks[0].metadata.memory_types.is_empty());
    }
}
