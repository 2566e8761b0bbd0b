//! Domain types shared across the retrieval engine.
//!
//! Mirrors the teacher crate's `core` module: plain, serializable structs
//! with small builder-style helpers, no behavior tied to storage or search.

mod chunk;
mod cluster;
mod fork_history;
mod message;
mod preference;
mod session;

pub use chunk::{Chunk, ChunkMetadata, MemoryType};
pub use cluster::ClusterAssignment;
pub use fork_history::{ForkHistoryEntry, MAX_ENTRIES};
pub use message::{Message, MessageRole, Timestamp};
pub use preference::PreferenceRecord;
pub use session::Session;
