//! Background transcript indexing: the read/chunk/embed/write pipeline and
//! the filesystem watcher that drives it as transcripts change on disk.

mod pipeline;
mod watcher;

pub use pipeline::{discover_candidates, index_path, project_for_path, session_id_for_path, IndexOutcome, IndexState};
pub use watcher::{BackgroundIndexer, IndexerConfig};
