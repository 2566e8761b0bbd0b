//! Streaming reader for append-only JSON-line transcript files.

use crate::core::{Message, MessageRole, Timestamp};
use crate::error::{Result, TranscriptError};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Statistics gathered while reading a transcript file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStats {
    /// Total complete lines encountered.
    pub lines_read: usize,
    /// Lines that failed to parse and were skipped.
    pub lines_skipped: usize,
    /// Bytes consumed (complete lines only; a trailing partial write is not
    /// counted, matching the "stop at EOF" behavior for live-appended files).
    pub bytes_consumed: usize,
}

/// Reads one transcript file into a flat list of [`Message`]s.
pub struct TranscriptReader {
    strict: bool,
}

impl Default for TranscriptReader {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptReader {
    /// Creates a reader in tolerant mode (malformed lines are skipped).
    #[must_use]
    pub const fn new() -> Self {
        Self { strict: false }
    }

    /// Creates a reader that returns an error on the first malformed line.
    #[must_use]
    pub const fn strict() -> Self {
        Self { strict: true }
    }

    /// Reads `path` line by line, never buffering more than one line at a
    /// time from disk. A trailing line with no terminating `\n` is treated
    /// as an in-progress write by the producer and dropped; the background
    /// indexer will be re-notified once the write completes.
    ///
    /// # Errors
    ///
    /// Returns [`TranscriptError::ReadFailed`] if the file cannot be opened,
    /// or a parse error in strict mode.
    pub fn read(&self, path: &Path) -> Result<(Vec<Message>, ReadStats)> {
        let file = File::open(path).map_err(|e| TranscriptError::ReadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let mut reader = BufReader::new(file);
        let mut stats = ReadStats::default();
        let mut messages = Vec::new();
        let mut raw = Vec::new();

        loop {
            raw.clear();
            let n = reader
                .read_until(b'\n', &mut raw)
                .map_err(|e| TranscriptError::ReadFailed {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
            if n == 0 {
                break;
            }
            if raw.last() != Some(&b'\n') {
                // Incomplete trailing line: producer is still writing it.
                break;
            }

            stats.lines_read += 1;
            stats.bytes_consumed += n;

            let line = String::from_utf8_lossy(&raw);
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match parse_line(trimmed) {
                Ok(Some(msg)) => messages.push(msg),
                Ok(None) => {}
                Err(reason) => {
                    stats.lines_skipped += 1;
                    if self.strict {
                        return Err(TranscriptError::ParseError {
                            path: path.display().to_string(),
                            line_no: stats.lines_read,
                            reason,
                        }
                        .into());
                    }
                    tracing::warn!(path = %path.display(), line = stats.lines_read, %reason, "skipping malformed transcript line");
                }
            }
        }

        Ok((messages, stats))
    }
}

/// Parses one transcript line into a `Message`, handling both the flat
/// `{role, content, timestamp?}` and nested `{message: {...}}` shapes.
fn parse_line(line: &str) -> std::result::Result<Option<Message>, String> {
    let value: serde_json::Value = serde_json::from_str(line).map_err(|e| e.to_string())?;

    let obj = match &value {
        serde_json::Value::Object(map) => map,
        _ => return Err("line is not a JSON object".to_string()),
    };

    // Nested shape: {"message": {role, content, ...}}
    let obj = if let Some(serde_json::Value::Object(nested)) = obj.get("message") {
        nested
    } else {
        obj
    };

    let role = obj
        .get("role")
        .and_then(|v| v.as_str())
        .map_or(MessageRole::Other, MessageRole::parse);

    let content = obj.get("content").map(flatten_content).unwrap_or_default();

    let timestamp = obj.get("timestamp").and_then(Timestamp::from_json);

    let metadata = obj.get("metadata").and_then(|v| v.as_object()).cloned();

    Ok(Message::new(role, content, timestamp, metadata))
}

/// Flattens a `content` field that is either a plain string or an array of
/// content blocks, concatenating the textual blocks in order.
fn flatten_content(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(blocks) => blocks
            .iter()
            .filter_map(block_text)
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

/// Extracts the text of one content block, recognizing `{"type":"text",
/// "text": "..."}` and plain-string blocks; anything else (tool_use, image,
/// ...) is skipped.
fn block_text(block: &serde_json::Value) -> Option<String> {
    match block {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(obj) => {
            let is_text_type = obj
                .get("type")
                .and_then(|v| v.as_str())
                .is_none_or(|t| t == "text");
            if is_text_type {
                obj.get("text").and_then(|v| v.as_str()).map(str::to_string)
            } else {
                None
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_lines(lines: &[&str]) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(f, "{line}").unwrap();
        }
        f.flush().unwrap();
        f
    }

    #[test]
    fn test_read_flat_shape() {
        let f = write_lines(&[r#"{"role":"user","content":"hello there"}"#]);
        let reader = TranscriptReader::new();
        let (msgs, stats) = reader.read(f.path()).unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].role, MessageRole::User);
        assert_eq!(msgs[0].content, "hello there");
        assert_eq!(stats.lines_read, 1);
        assert_eq!(stats.lines_skipped, 0);
    }

    #[test]
    fn test_read_nested_shape() {
        let f = write_lines(&[r#"{"message":{"role":"assistant","content":"hi"}}"#]);
        let reader = TranscriptReader::new();
        let (msgs, _stats) = reader.read(f.path()).unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].role, MessageRole::Assistant);
    }

    #[test]
    fn test_read_content_block_array() {
        let line = r#"{"role":"assistant","content":[{"type":"text","text":"part one "},{"type":"tool_use","id":"x"},{"type":"text","text":"part two"}]}"#;
        let f = write_lines(&[line]);
        let reader = TranscriptReader::new();
        let (msgs, _stats) = reader.read(f.path()).unwrap();
        assert_eq!(msgs[0].content, "part one part two");
    }

    #[test]
    fn test_read_skips_malformed_line_non_strict() {
        let f = write_lines(&[
            r#"{"role":"user","content":"good"}"#,
            "not json at all",
            r#"{"role":"user","content":"also good"}"#,
        ]);
        let reader = TranscriptReader::new();
        let (msgs, stats) = reader.read(f.path()).unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(stats.lines_skipped, 1);
    }

    #[test]
    fn test_read_strict_errors_on_malformed_line() {
        let f = write_lines(&["not json"]);
        let reader = TranscriptReader::strict();
        assert!(reader.read(f.path()).is_err());
    }

    #[test]
    fn test_read_drops_empty_content_messages() {
        let f = write_lines(&[r#"{"role":"user","content":""}"#]);
        let reader = TranscriptReader::new();
        let (msgs, _stats) = reader.read(f.path()).unwrap();
        assert!(msgs.is_empty());
    }

    #[test]
    fn test_read_empty_file() {
        let f = NamedTempFile::new().unwrap();
        let reader = TranscriptReader::new();
        let (msgs, stats) = reader.read(f.path()).unwrap();
        assert!(msgs.is_empty());
        assert_eq!(stats.lines_read, 0);
    }

    #[test]
    fn test_read_missing_file_errors() {
        let reader = TranscriptReader::new();
        assert!(reader.read(Path::new("/nonexistent/path.jsonl")).is_err());
    }

    #[test]
    fn test_read_ignores_incomplete_trailing_line() {
        let mut f = NamedTempFile::new().unwrap();
        write!(f, r#"{{"role":"user","content":"complete"}}"#).unwrap();
        write!(f, "\n").unwrap();
        write!(f, r#"{{"role":"user","content":"incomplete"#).unwrap(); // no trailing newline
        f.flush().unwrap();

        let reader = TranscriptReader::new();
        let (msgs, stats) = reader.read(f.path()).unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].content, "complete");
        assert_eq!(stats.lines_read, 1);
    }

    #[test]
    fn test_read_epoch_timestamp() {
        let f = write_lines(&[r#"{"role":"user","content":"hi","timestamp":1705315800}"#]);
        let reader = TranscriptReader::new();
        let (msgs, _stats) = reader.read(f.path()).unwrap();
        assert!(msgs[0].timestamp.is_some());
    }
}
