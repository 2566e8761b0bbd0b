//! Transcript message representation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role that produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// The human operator.
    User,
    /// The AI coding assistant.
    Assistant,
    /// System prompts, tool results, or anything else the producer emits.
    Other,
}

impl MessageRole {
    /// Parses a role string, falling back to `Other` for unrecognized values.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "user" | "human" => Self::User,
            "assistant" | "ai" | "model" => Self::Assistant,
            _ => Self::Other,
        }
    }
}

/// A message timestamp, accepted either as ISO-8601 or epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub DateTime<Utc>);

impl Timestamp {
    /// Parses a JSON value that is either an RFC 3339 string or a numeric
    /// epoch-seconds value. Returns `None` for anything else (including a
    /// missing field), matching the reader's "timestamp may be missing"
    /// invariant.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| Self(dt.with_timezone(&Utc))),
            serde_json::Value::Number(n) => n
                .as_f64()
                .and_then(|secs| DateTime::from_timestamp(secs as i64, 0))
                .map(Self),
            _ => None,
        }
    }

    /// Returns the timestamp as an RFC 3339 string.
    #[must_use]
    pub fn to_rfc3339(self) -> String {
        self.0.to_rfc3339()
    }
}

/// A single message extracted from a transcript line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who produced the message.
    pub role: MessageRole,
    /// Flattened plain-text content. Never empty (empty-content lines are
    /// dropped by the reader before a `Message` is constructed).
    pub content: String,
    /// When the message was produced, if the transcript line carried one.
    pub timestamp: Option<Timestamp>,
    /// Opaque metadata the producer attached to the line, if any.
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Message {
    /// Creates a new message. Returns `None` if `content` is empty after
    /// trimming, matching the reader's "empty message is dropped" invariant.
    #[must_use]
    pub fn new(
        role: MessageRole,
        content: String,
        timestamp: Option<Timestamp>,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Option<Self> {
        if content.trim().is_empty() {
            return None;
        }
        Some(Self {
            role,
            content,
            timestamp,
            metadata,
        })
    }

    /// Returns a rough token-count estimate using the 4-chars-per-token
    /// heuristic used throughout the chunker and ranker.
    #[must_use]
    pub fn estimate_tokens(&self) -> usize {
        self.content.len().div_ceil(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse() {
        assert_eq!(MessageRole::parse("user"), MessageRole::User);
        assert_eq!(MessageRole::parse("Assistant"), MessageRole::Assistant);
        assert_eq!(MessageRole::parse("tool"), MessageRole::Other);
    }

    #[test]
    fn test_message_drops_empty_content() {
        assert!(Message::new(MessageRole::User, "   ".to_string(), None, None).is_none());
        assert!(Message::new(MessageRole::User, String::new(), None, None).is_none());
    }

    #[test]
    fn test_message_keeps_nonempty_content() {
        let msg = Message::new(MessageRole::User, "hello".to_string(), None, None);
        assert!(msg.is_some());
    }

    #[test]
    fn test_timestamp_from_rfc3339() {
        let v = serde_json::Value::String("2024-01-15T10:30:00Z".to_string());
        let ts = Timestamp::from_json(&v);
        assert!(ts.is_some());
    }

    #[test]
    fn test_timestamp_from_epoch_seconds() {
        let v = serde_json::json!(1_705_315_800);
        let ts = Timestamp::from_json(&v);
        assert!(ts.is_some());
    }

    #[test]
    fn test_timestamp_from_invalid_value() {
        let v = serde_json::json!({"not": "a timestamp"});
        assert!(Timestamp::from_json(&v).is_none());
    }

    #[test]
    fn test_estimate_tokens() {
        let msg = Message::new(MessageRole::User, "a".repeat(40), None, None).unwrap();
        assert_eq!(msg.estimate_tokens(), 10);
    }
}
