//! Splits transcript messages into overlapping, code-block-safe chunks and
//! tags each with any detected memory markers.

mod chunker;
mod marker;

pub use chunker::{ChunkingConfig, MessageChunker};
pub use marker::{extract_markers, MarkerExtraction, MarkerMatch};
