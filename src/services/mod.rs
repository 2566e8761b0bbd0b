//! Auxiliary services layered on top of the registry and vector store:
//! fork history, tagging, summarization, diffing, duplicate detection,
//! clustering, and archiving (§4.12).

pub mod archive;
pub mod cluster;
pub mod diff;
pub mod duplicate;
pub mod history;
pub mod summary;
pub mod tagging;
