//! Error types for the vibefork retrieval service.
//!
//! Mirrors the teacher crate's approach: one `thiserror` enum per component,
//! folded into a single top-level `Error` so call sites can propagate with
//! `?` regardless of which layer failed.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for all vibefork operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Transcript reading/parsing errors.
    #[error("transcript error: {0}")]
    Transcript(#[from] TranscriptError),

    /// Chunking-related errors.
    #[error("chunking error: {0}")]
    Chunking(#[from] ChunkingError),

    /// Embedding gateway errors.
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Vector store / registry storage errors.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Search/ranking errors.
    #[error("search error: {0}")]
    Search(#[from] SearchError),

    /// JSON-RPC dispatcher errors.
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),

    /// Configuration errors.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// A cooperative deadline expired.
    #[error("operation timed out after {elapsed_secs}s")]
    Timeout {
        /// Seconds elapsed before the timeout fired.
        elapsed_secs: u64,
    },

    /// Requested entity is absent from the registry.
    #[error("not found: {0}")]
    NotFound(String),

    /// Two writers raced on the same session id; the loser should retry.
    #[error("conflict on session {session_id}")]
    Conflict {
        /// The session id both writers targeted.
        session_id: String,
    },

    /// Generic I/O error wrapper.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Transcript-reader-specific errors.
#[derive(Error, Debug)]
pub enum TranscriptError {
    /// A line could not be parsed as JSON and strict mode was requested.
    #[error("malformed line {line_no} in {path}: {reason}")]
    ParseError {
        /// Path of the transcript file.
        path: String,
        /// 1-based line number.
        line_no: usize,
        /// Parser failure reason.
        reason: String,
    },

    /// The file produced zero usable messages.
    #[error("transcript empty: {path}")]
    Empty {
        /// Path of the transcript file.
        path: String,
    },

    /// The file could not be opened or read.
    #[error("failed to read {path}: {reason}")]
    ReadFailed {
        /// Path of the transcript file.
        path: String,
        /// Underlying I/O failure reason.
        reason: String,
    },
}

/// Chunking-specific errors.
#[derive(Error, Debug)]
pub enum ChunkingError {
    /// Chunk size configuration is invalid (zero target, overlap too large).
    #[error("invalid chunk configuration: {reason}")]
    InvalidConfig {
        /// Reason the configuration is invalid.
        reason: String,
    },

    /// A produced chunk exceeds the configured maximum.
    #[error("chunk size {size} exceeds maximum {max}")]
    ChunkTooLarge {
        /// Actual token estimate.
        size: usize,
        /// Maximum allowed tokens.
        max: usize,
    },
}

/// Embedding-gateway-specific errors.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// The embedding model could not produce vectors for this call.
    #[error("embedding model unavailable: {reason}")]
    Unavailable {
        /// Underlying failure reason.
        reason: String,
    },

    /// The on-disk content cache could not be read or written.
    #[error("embedding cache error: {0}")]
    Cache(String),

    /// Embedding dimensionality mismatch between cache and model.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Configured dimension.
        expected: usize,
        /// Dimension actually produced.
        actual: usize,
    },
}

/// Storage-specific errors (session registry + vector store).
#[derive(Error, Debug)]
pub enum StorageError {
    /// The vector store database could not be opened.
    #[error("vector store unavailable: {0}")]
    Unavailable(String),

    /// A database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Session registry JSON could not be parsed.
    #[error("registry corrupt: {0}")]
    RegistryCorrupt(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Search/ranking-specific errors.
#[derive(Error, Debug)]
pub enum SearchError {
    /// The query text normalized to an empty string.
    #[error("empty query")]
    EmptyQuery,

    /// An invalid time-range filter was supplied.
    #[error("invalid time range: {0}")]
    InvalidTimeRange(String),

    /// `scope: "project"` was given with no project to restrict to.
    #[error("scope \"project\" requires a project filter")]
    ScopeRequiresProject,
}

/// JSON-RPC dispatcher errors, pre-mapped to the spec's error codes.
#[derive(Error, Debug)]
pub enum RpcError {
    /// The request body was not valid JSON.
    #[error("parse error")]
    ParseError,

    /// The request did not match the JSON-RPC request shape.
    #[error("invalid request")]
    InvalidRequest,

    /// No handler registered for the given method.
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// The params object failed validation for the method.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// A `tools/call` referenced an unregistered tool.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// A tool call was received before `initialize`/`notifications/initialized`.
    #[error("service not initialized")]
    Uninitialized,

    /// A required external dependency (embedder, store) is unavailable.
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),
}

impl RpcError {
    /// Maps this error to its JSON-RPC 2.0 numeric code.
    #[must_use]
    pub const fn code(&self) -> i64 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound(_) => -32601,
            Self::InvalidParams(_) => -32602,
            Self::UnknownTool(_) => -32001,
            Self::Uninitialized => -32002,
            Self::DependencyUnavailable(_) => -32003,
        }
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(StorageError::from(err))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
