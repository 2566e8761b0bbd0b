//! Transcript I/O.
//!
//! Streams an append-only line-delimited JSON transcript file into
//! [`crate::core::Message`] values without holding the whole file in memory.

mod reader;

pub use reader::{ReadStats, TranscriptReader};
