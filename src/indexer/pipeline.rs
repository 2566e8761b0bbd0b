//! The read → chunk → embed → write pipeline shared by the background
//! indexer and the initial-setup orchestrator.

use crate::chunking::MessageChunker;
use crate::core::Session;
use crate::embedding::EmbeddingGateway;
use crate::error::Result;
use crate::io::TranscriptReader;
use crate::storage::{Partition, SessionRegistry, VectorStore};
use crate::util::atomic_write;
use chrono::Utc;
use std::path::{Path, PathBuf};

/// Indexing state transitions per §4.10.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexState {
    /// No work has started on this path yet.
    Unknown,
    /// The reader is parsing the transcript file.
    Parsing,
    /// Chunks are being embedded.
    Embedding,
    /// Chunks are being written to the vector store and registry.
    Writing,
    /// Indexing completed successfully.
    Indexed,
    /// Indexing failed; the path is retried on the next triggering event.
    Failed {
        /// Human-readable failure reason.
        reason: String,
    },
}

/// Result of running the pipeline once over a single transcript path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    /// The file produced at least one chunk and was written to the store.
    Indexed {
        /// The session id derived from the path.
        session_id: String,
        /// Messages extracted by the reader.
        message_count: usize,
        /// Chunks produced and embedded.
        chunk_count: usize,
    },
    /// The file yielded zero usable messages; nothing was written.
    Empty {
        /// The session id derived from the path.
        session_id: String,
    },
}

/// Derives a session id from a transcript path: its file stem, falling back
/// to the full path string if the file has no stem (e.g. a dotfile).
#[must_use]
pub fn session_id_for_path(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map_or_else(|| path.to_string_lossy().to_string(), ToString::to_string)
}

/// Writes a lightweight checkpoint sidecar so a crash mid-embedding loses
/// at most one checkpoint interval's worth of work; purely advisory, never
/// read back by this crate today (a future resume path would consult it).
fn write_checkpoint(checkpoint_dir: &Path, session_id: &str, embedded_through: usize) -> Result<()> {
    let path = checkpoint_dir.join(format!("{session_id}.json"));
    let body = serde_json::json!({
        "session_id": session_id,
        "embedded_through": embedded_through,
    });
    let bytes = serde_json::to_vec(&body).unwrap_or_default();
    atomic_write(&path, &bytes).map_err(|e| {
        crate::error::StorageError::Unavailable(format!("checkpoint write failed: {e}")).into()
    })
}

/// Runs the full pipeline for one transcript file: read, chunk, embed,
/// delete-then-insert in the store, and upsert the registry entry.
///
/// `on_state` is called at every state transition; `checkpoint_dir`, when
/// given, receives a progress sidecar every `checkpoint_interval` chunks.
///
/// # Errors
///
/// Returns an error from any stage; `on_state` is called with
/// [`IndexState::Failed`] before the error propagates.
#[allow(clippy::too_many_arguments)]
pub fn index_path(
    path: &Path,
    project: &str,
    reader: &TranscriptReader,
    chunker: &MessageChunker,
    gateway: &EmbeddingGateway,
    store: &VectorStore,
    registry: &SessionRegistry,
    checkpoint_dir: Option<&Path>,
    checkpoint_interval: usize,
    mut on_state: impl FnMut(IndexState),
) -> Result<IndexOutcome> {
    let session_id = session_id_for_path(path);

    let mut run = || -> Result<IndexOutcome> {
        on_state(IndexState::Parsing);
        let (messages, _stats) = reader.read(path)?;
        if messages.is_empty() {
            return Ok(IndexOutcome::Empty { session_id: session_id.clone() });
        }

        let mut chunks = chunker.chunk(&messages, &session_id, project)?;

        on_state(IndexState::Embedding);
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = gateway.embed_texts(&texts)?;
        for (chunk, vector) in chunks.iter_mut().zip(vectors.into_iter()) {
            chunk.set_embedding(vector);
        }
        if let Some(dir) = checkpoint_dir {
            for (i, _) in chunks.iter().enumerate() {
                if (i + 1) % checkpoint_interval.max(1) == 0 {
                    write_checkpoint(dir, &session_id, i + 1)?;
                }
            }
        }
        gateway.flush_cache()?;

        on_state(IndexState::Writing);
        store.reindex_session(&session_id, &chunks, Partition::Active)?;

        let message_count = messages.len();
        let chunk_count = chunks.len();
        let now = Utc::now();
        let updated = registry.update(&session_id, |s| s.reindex(message_count, chunk_count, now))?;
        if updated.is_none() {
            registry.add(Session::new(session_id.clone(), project.to_string(), message_count, chunk_count))?;
        }
        registry.set_last_synced(now)?;

        Ok(IndexOutcome::Indexed { session_id: session_id.clone(), message_count, chunk_count })
    };

    match run() {
        Ok(outcome) => {
            on_state(IndexState::Indexed);
            Ok(outcome)
        }
        Err(e) => {
            on_state(IndexState::Failed { reason: e.to_string() });
            Err(e)
        }
    }
}

/// Derives the producer-relative project label for a path: its parent
/// directory's file name, or `"default"` if the path has no parent.
#[must_use]
pub fn project_for_path(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .ok()
        .and_then(|rel| rel.parent())
        .and_then(|p| p.components().next())
        .and_then(|c| c.as_os_str().to_str())
        .map_or_else(|| "default".to_string(), ToString::to_string)
}

/// Discovers candidate transcript files under `root`: files with the
/// `.jsonl` extension above `min_size_bytes`, per §4.11's size floor.
#[must_use]
pub fn discover_candidates(root: &Path, min_size_bytes: u64) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            if let Ok(metadata) = entry.metadata() {
                if metadata.len() >= min_size_bytes {
                    candidates.push(path);
                }
            }
        }
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{BatchConfig, EmbeddingCache, FallbackEmbedder};
    use std::io::Write;

    fn write_transcript(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        path
    }

    fn deps(dir: &Path) -> (TranscriptReader, MessageChunker, EmbeddingGateway, VectorStore, SessionRegistry) {
        let cache = EmbeddingCache::load(&dir.join("cache.json")).unwrap();
        let gateway = EmbeddingGateway::new(Box::new(FallbackEmbedder::new(16)), cache, BatchConfig::default());
        let store = VectorStore::in_memory().unwrap();
        let registry = SessionRegistry::load(&dir.join("registry.json")).unwrap();
        (TranscriptReader::new(), MessageChunker::default(), gateway, store, registry)
    }

    #[test]
    fn test_session_id_from_path() {
        let id = session_id_for_path(Path::new("/a/b/session-123.jsonl"));
        assert_eq!(id, "session-123");
    }

    #[test]
    fn test_index_path_empty_file_yields_empty_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_transcript(dir.path(), "empty.jsonl", &[]);
        let (reader, chunker, gateway, store, registry) = deps(dir.path());
        let outcome = index_path(&path, "proj", &reader, &chunker, &gateway, &store, &registry, None, 10, |_| {}).unwrap();
        assert!(matches!(outcome, IndexOutcome::Empty { .. }));
    }

    #[test]
    fn test_index_path_writes_chunks_and_registry() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_transcript(
            dir.path(),
            "s1.jsonl",
            &[r#"{"role":"user","content":"how do I rotate logs"}"#],
        );
        let (reader, chunker, gateway, store, registry) = deps(dir.path());
        let outcome = index_path(&path, "proj", &reader, &chunker, &gateway, &store, &registry, None, 10, |_| {}).unwrap();
        match outcome {
            IndexOutcome::Indexed { session_id, chunk_count, .. } => {
                assert_eq!(session_id, "s1");
                assert!(chunk_count >= 1);
                assert!(registry.get("s1").unwrap().is_some());
            }
            IndexOutcome::Empty { .. } => panic!("expected indexed outcome"),
        }
    }

    #[test]
    fn test_index_path_state_transitions_observed() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_transcript(dir.path(), "s1.jsonl", &[r#"{"role":"user","content":"hello"}"#]);
        let (reader, chunker, gateway, store, registry) = deps(dir.path());
        let mut states = Vec::new();
        index_path(&path, "proj", &reader, &chunker, &gateway, &store, &registry, None, 10, |s| states.push(s)).unwrap();
        assert!(states.contains(&IndexState::Parsing));
        assert!(states.contains(&IndexState::Embedding));
        assert!(states.contains(&IndexState::Writing));
        assert!(states.contains(&IndexState::Indexed));
    }

    #[test]
    fn test_reindex_replaces_previous_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_transcript(dir.path(), "s1.jsonl", &[r#"{"role":"user","content":"first version"}"#]);
        let (reader, chunker, gateway, store, registry) = deps(dir.path());
        index_path(&path, "proj", &reader, &chunker, &gateway, &store, &registry, None, 10, |_| {}).unwrap();

        std::fs::write(&path, "{\"role\":\"user\",\"content\":\"second version now longer\"}\n").unwrap();
        index_path(&path, "proj", &reader, &chunker, &gateway, &store, &registry, None, 10, |_| {}).unwrap();

        let chunks = store.list_by_session("s1", Partition::Active).unwrap();
        assert!(chunks.iter().all(|c| c.text.contains("second version")));
    }

    #[test]
    fn test_discover_candidates_filters_by_extension_and_size() {
        let dir = tempfile::tempdir().unwrap();
        write_transcript(dir.path(), "big.jsonl", &["x".repeat(200).as_str()]);
        write_transcript(dir.path(), "tiny.jsonl", &["x"]);
        std::fs::write(dir.path().join("notes.txt"), "irrelevant").unwrap();
        let found = discover_candidates(dir.path(), 100);
        assert_eq!(found.len(), 1);
        assert!(found[0].ends_with("big.jsonl"));
    }

    #[test]
    fn test_project_for_path_uses_first_relative_component() {
        let root = Path::new("/transcripts");
        let path = Path::new("/transcripts/my-project/session.jsonl");
        assert_eq!(project_for_path(path, root), "my-project");
    }

    #[test]
    fn test_project_for_path_defaults_when_flat() {
        let root = Path::new("/transcripts");
        let path = Path::new("/transcripts/session.jsonl");
        assert_eq!(project_for_path(path, root), "default");
    }
}
