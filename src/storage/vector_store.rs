//! SQLite-backed vector store: the only component that understands how
//! chunk metadata and embeddings are actually laid out on disk.

use crate::core::{Chunk, ChunkMetadata, MemoryType};
use crate::embedding::cosine_similarity;
use crate::error::{Result, StorageError};
use crate::storage::schema::{
    CHECK_SCHEMA_SQL, CURRENT_SCHEMA_VERSION, GET_VERSION_SQL, SCHEMA_SQL, SET_VERSION_SQL,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Which partition of the store an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    /// Chunks for sessions not yet archived.
    Active,
    /// Chunks for sessions moved out of the active set, per §4.12 archive.
    Archive,
}

/// Equality/membership/range constraints applied during [`VectorStore::search`].
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Restrict to an exact project label.
    pub project: Option<String>,
    /// Restrict to chunks with this archived flag.
    pub archived: Option<bool>,
    /// Keep chunks that carry at least one of these tags.
    pub tags: Option<HashSet<String>>,
    /// Keep chunks that carry at least one of these memory markers.
    pub memory_types: Option<HashSet<MemoryType>>,
    /// Keep chunks whose timestamp falls within `[from, to]`.
    pub time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl SearchFilter {
    fn matches(&self, metadata: &ChunkMetadata) -> bool {
        if let Some(project) = &self.project {
            if &metadata.project != project {
                return false;
            }
        }
        if let Some(archived) = self.archived {
            if metadata.archived != archived {
                return false;
            }
        }
        if let Some(tags) = &self.tags {
            if !metadata.tags.iter().any(|t| tags.contains(t)) {
                return false;
            }
        }
        if let Some(memory_types) = &self.memory_types {
            if !metadata
                .memory_types
                .iter()
                .any(|m| memory_types.contains(m))
            {
                return false;
            }
        }
        if let Some((from, to)) = self.time_range {
            let Some(ts) = metadata
                .timestamp
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            else {
                return false;
            };
            let ts = ts.with_timezone(&Utc);
            if ts < from || ts > to {
                return false;
            }
        }
        true
    }
}

/// Chunk counts per partition, per §4.5 `get_stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreStats {
    /// Number of chunks in the active partition.
    pub active_chunks: usize,
    /// Number of chunks in the archive partition.
    pub archive_chunks: usize,
}

/// Adapter over a pair of SQLite databases, one per partition.
///
/// Each partition's connection is behind its own mutex; cross-partition
/// calls ([`VectorStore::move_to_partition`], union searches) only ever
/// hold one at a time to avoid lock-ordering deadlocks.
pub struct VectorStore {
    active: Mutex<Connection>,
    archive: Mutex<Connection>,
    generation: std::sync::atomic::AtomicU64,
}

impl VectorStore {
    /// Opens (creating if absent) the active and archive databases under
    /// `root`: `root/chunks.db` and `root/archive/chunks.db`.
    ///
    /// # Errors
    ///
    /// Returns an error if either database cannot be opened or initialized.
    pub fn open(root: &Path) -> Result<Self> {
        let active = Self::open_one(&root.join("chunks.db"))?;
        let archive = Self::open_one(&root.join("archive").join("chunks.db"))?;
        Ok(Self {
            active: Mutex::new(active),
            archive: Mutex::new(archive),
            generation: std::sync::atomic::AtomicU64::new(0),
        })
    }

    /// Opens an in-memory store pair, for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if either in-memory database cannot be initialized.
    pub fn in_memory() -> Result<Self> {
        let active = Connection::open_in_memory().map_err(StorageError::from)?;
        let archive = Connection::open_in_memory().map_err(StorageError::from)?;
        Self::init(&active)?;
        Self::init(&archive)?;
        Ok(Self {
            active: Mutex::new(active),
            archive: Mutex::new(archive),
            generation: std::sync::atomic::AtomicU64::new(0),
        })
    }

    /// Monotonically increasing counter bumped by every mutating call
    /// (`upsert_chunks`, `delete_by_session`, `move_to_partition`). The
    /// search cache polls this as its `on_mutation` signal: a changed value
    /// since the last check means the result cache must be cleared.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(std::sync::atomic::Ordering::Acquire)
    }

    fn bump_generation(&self) {
        self.generation.fetch_add(1, std::sync::atomic::Ordering::AcqRel);
    }

    fn open_one(path: &PathBuf) -> Result<Connection> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Unavailable(e.to_string()))?;
        }
        let conn = Connection::open(path).map_err(StorageError::from)?;
        conn.execute("PRAGMA foreign_keys = ON;", [])
            .map_err(StorageError::from)?;
        let _: String = conn
            .query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))
            .map_err(StorageError::from)?;
        Self::init(&conn)?;
        Ok(conn)
    }

    fn init(conn: &Connection) -> Result<()> {
        let is_init: i64 = conn
            .query_row(CHECK_SCHEMA_SQL, [], |row| row.get(0))
            .map_err(StorageError::from)?;
        if is_init == 0 {
            conn.execute_batch(SCHEMA_SQL).map_err(StorageError::from)?;
            conn.execute(SET_VERSION_SQL, params![CURRENT_SCHEMA_VERSION.to_string()])
                .map_err(StorageError::from)?;
        }
        Ok(())
    }

    fn conn_for(&self, partition: Partition) -> &Mutex<Connection> {
        match partition {
            Partition::Active => &self.active,
            Partition::Archive => &self.archive,
        }
    }

    /// Replaces all chunks in `chunks` within a single transaction per
    /// partition-connection lock acquisition: existing rows sharing a
    /// `chunk_id` are replaced, embeddings upserted alongside. Chunks for
    /// more than one session may be passed; each is applied atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if any row fails to write, in which case the whole
    /// transaction rolls back and no chunk in `chunks` is left partially
    /// written.
    pub fn upsert_chunks(&self, chunks: &[Chunk], partition: Partition) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let guard = self.conn_for(partition).lock().map_err(|_| {
            StorageError::Unavailable("vector store connection lock poisoned".to_string())
        })?;
        let conn = &*guard;
        let tx = conn.unchecked_transaction().map_err(StorageError::from)?;

        for chunk in chunks {
            tx.execute(
                r"
                INSERT OR REPLACE INTO chunks (
                    chunk_id, session_id, chunk_index, content, token_count,
                    project, timestamp, message_indices, memory_types, tags, archived
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ",
                params![
                    chunk.chunk_id,
                    chunk.metadata.session_id,
                    chunk.chunk_index as i64,
                    chunk.text,
                    chunk.token_count as i64,
                    chunk.metadata.project,
                    chunk.metadata.timestamp,
                    encode_range(&chunk.metadata.message_indices),
                    encode_memory_types(&chunk.metadata.memory_types),
                    encode_tags(&chunk.metadata.tags),
                    i64::from(chunk.metadata.archived),
                ],
            )
            .map_err(StorageError::from)?;

            if let Some(embedding) = &chunk.embedding {
                let bytes: Vec<u8> = embedding.iter().flat_map(|f| f.to_le_bytes()).collect();
                tx.execute(
                    r"
                    INSERT OR REPLACE INTO chunk_embeddings (chunk_id, embedding, dimensions)
                    VALUES (?, ?, ?)
                    ",
                    params![chunk.chunk_id, bytes, embedding.len() as i64],
                )
                .map_err(StorageError::from)?;
            }
        }

        tx.commit().map_err(StorageError::from)?;
        self.bump_generation();
        Ok(())
    }

    /// Deletes every chunk (and its embedding, via `ON DELETE CASCADE`)
    /// belonging to `session_id` in the given partition.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn delete_by_session(&self, session_id: &str, partition: Partition) -> Result<()> {
        let guard = self.conn_for(partition).lock().map_err(|_| {
            StorageError::Unavailable("vector store connection lock poisoned".to_string())
        })?;
        guard
            .execute("DELETE FROM chunks WHERE session_id = ?", params![session_id])
            .map_err(StorageError::from)?;
        drop(guard);
        self.bump_generation();
        Ok(())
    }

    /// Replaces `session_id`'s entire chunk set with `chunks` in one
    /// transaction: new rows are inserted (or replaced, by `chunk_id`)
    /// first, then any now-superseded row is deleted. Because both halves
    /// share a single connection-lock acquisition and a single SQLite
    /// transaction, a concurrent `search()` call (which takes the same
    /// partition lock) can never observe a state where this session has
    /// zero chunks mid-reindex, unlike calling [`Self::delete_by_session`]
    /// then [`Self::upsert_chunks`] separately.
    ///
    /// Relies on chunk indices being dense and 0-based per session: any
    /// stored row whose `chunk_index` is `>= chunks.len()` belonged to a
    /// prior, longer version of this session and is safe to drop.
    ///
    /// # Errors
    ///
    /// Returns an error if any row fails to write or the delete fails, in
    /// which case the whole transaction rolls back and the store is left
    /// exactly as it was before the call.
    pub fn reindex_session(&self, session_id: &str, chunks: &[Chunk], partition: Partition) -> Result<()> {
        let guard = self.conn_for(partition).lock().map_err(|_| {
            StorageError::Unavailable("vector store connection lock poisoned".to_string())
        })?;
        let conn = &*guard;
        let tx = conn.unchecked_transaction().map_err(StorageError::from)?;

        for chunk in chunks {
            tx.execute(
                r"
                INSERT OR REPLACE INTO chunks (
                    chunk_id, session_id, chunk_index, content, token_count,
                    project, timestamp, message_indices, memory_types, tags, archived
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ",
                params![
                    chunk.chunk_id,
                    chunk.metadata.session_id,
                    chunk.chunk_index as i64,
                    chunk.text,
                    chunk.token_count as i64,
                    chunk.metadata.project,
                    chunk.metadata.timestamp,
                    encode_range(&chunk.metadata.message_indices),
                    encode_memory_types(&chunk.metadata.memory_types),
                    encode_tags(&chunk.metadata.tags),
                    i64::from(chunk.metadata.archived),
                ],
            )
            .map_err(StorageError::from)?;

            if let Some(embedding) = &chunk.embedding {
                let bytes: Vec<u8> = embedding.iter().flat_map(|f| f.to_le_bytes()).collect();
                tx.execute(
                    r"
                    INSERT OR REPLACE INTO chunk_embeddings (chunk_id, embedding, dimensions)
                    VALUES (?, ?, ?)
                    ",
                    params![chunk.chunk_id, bytes, embedding.len() as i64],
                )
                .map_err(StorageError::from)?;
            }
        }

        tx.execute(
            "DELETE FROM chunks WHERE session_id = ? AND chunk_index >= ?",
            params![session_id, chunks.len() as i64],
        )
        .map_err(StorageError::from)?;

        tx.commit().map_err(StorageError::from)?;
        self.bump_generation();
        Ok(())
    }

    /// Moves every chunk belonging to `session_id` from one partition to
    /// the other, flipping the stored `archived` flag to match.
    ///
    /// # Errors
    ///
    /// Returns an error if either side of the move fails; the source rows
    /// are only deleted after the destination insert succeeds.
    pub fn move_to_partition(&self, session_id: &str, target: Partition) -> Result<()> {
        let source = match target {
            Partition::Active => Partition::Archive,
            Partition::Archive => Partition::Active,
        };

        let mut chunks = self.list_by_session(session_id, source)?;
        for chunk in &mut chunks {
            chunk.metadata.archived = matches!(target, Partition::Archive);
        }

        self.upsert_chunks(&chunks, target)?;
        self.delete_by_session(session_id, source)?;
        Ok(())
    }

    /// Returns every chunk for `session_id` in `partition`, embeddings
    /// included.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying query fails.
    pub fn list_by_session(&self, session_id: &str, partition: Partition) -> Result<Vec<Chunk>> {
        let guard = self.conn_for(partition).lock().map_err(|_| {
            StorageError::Unavailable("vector store connection lock poisoned".to_string())
        })?;
        let mut stmt = guard
            .prepare(
                r"
                SELECT c.chunk_id, c.session_id, c.chunk_index, c.content, c.token_count,
                       c.project, c.timestamp, c.message_indices, c.memory_types, c.tags,
                       c.archived, e.embedding
                FROM chunks c
                LEFT JOIN chunk_embeddings e ON e.chunk_id = c.chunk_id
                WHERE c.session_id = ?
                ",
            )
            .map_err(StorageError::from)?;

        let rows = stmt
            .query_map(params![session_id], row_to_chunk)
            .map_err(StorageError::from)?;

        let mut chunks = Vec::new();
        for row in rows {
            chunks.push(row.map_err(StorageError::from)?);
        }
        Ok(chunks)
    }

    /// Brute-force cosine-similarity scan over `partitions`, applying
    /// `filter` before scoring. Results are sorted by similarity descending
    /// and truncated to `k`.
    ///
    /// # Errors
    ///
    /// Returns an error if any partition's query fails.
    pub fn search(
        &self,
        query_vec: &[f32],
        k: usize,
        filter: &SearchFilter,
        partitions: &[Partition],
    ) -> Result<Vec<(Chunk, f32)>> {
        let mut scored = Vec::new();

        for &partition in partitions {
            let guard = self.conn_for(partition).lock().map_err(|_| {
                StorageError::Unavailable("vector store connection lock poisoned".to_string())
            })?;
            let mut stmt = guard
                .prepare(
                    r"
                    SELECT c.chunk_id, c.session_id, c.chunk_index, c.content, c.token_count,
                           c.project, c.timestamp, c.message_indices, c.memory_types, c.tags,
                           c.archived, e.embedding
                    FROM chunks c
                    JOIN chunk_embeddings e ON e.chunk_id = c.chunk_id
                    ",
                )
                .map_err(StorageError::from)?;

            let rows = stmt.query_map([], row_to_chunk).map_err(StorageError::from)?;
            for row in rows {
                let chunk = row.map_err(StorageError::from)?;
                if !filter.matches(&chunk.metadata) {
                    continue;
                }
                let Some(embedding) = &chunk.embedding else {
                    continue;
                };
                let sim = cosine_similarity(query_vec, embedding);
                scored.push((chunk, sim));
            }
        }

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    /// Chunk counts across both partitions.
    ///
    /// # Errors
    ///
    /// Returns an error if either partition's count query fails.
    pub fn get_stats(&self) -> Result<StoreStats> {
        let active_chunks = self.count_chunks(Partition::Active)?;
        let archive_chunks = self.count_chunks(Partition::Archive)?;
        Ok(StoreStats {
            active_chunks,
            archive_chunks,
        })
    }

    fn count_chunks(&self, partition: Partition) -> Result<usize> {
        let guard = self.conn_for(partition).lock().map_err(|_| {
            StorageError::Unavailable("vector store connection lock poisoned".to_string())
        })?;
        let count: i64 = guard
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
            .optional()
            .map_err(StorageError::from)?
            .unwrap_or(0);
        Ok(count as usize)
    }
}

fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chunk> {
    let chunk_id: String = row.get(0)?;
    let session_id: String = row.get(1)?;
    let chunk_index: i64 = row.get(2)?;
    let content: String = row.get(3)?;
    let token_count: i64 = row.get(4)?;
    let project: String = row.get(5)?;
    let timestamp: Option<String> = row.get(6)?;
    let message_indices: String = row.get(7)?;
    let memory_types: String = row.get(8)?;
    let tags: String = row.get(9)?;
    let archived: i64 = row.get(10)?;
    let embedding_bytes: Option<Vec<u8>> = row.get(11)?;

    let embedding = embedding_bytes.map(|bytes| {
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    });

    Ok(Chunk {
        chunk_id,
        chunk_index: chunk_index as usize,
        text: content,
        token_count: token_count as usize,
        embedding,
        metadata: ChunkMetadata {
            session_id,
            project,
            timestamp,
            message_indices: decode_range(&message_indices),
            memory_types: decode_memory_types(&memory_types),
            tags: decode_tags(&tags),
            archived: archived != 0,
        },
    })
}

fn encode_range(range: &std::ops::Range<usize>) -> String {
    serde_json::to_string(&[range.start, range.end]).unwrap_or_else(|_| "[0,0]".to_string())
}

fn decode_range(s: &str) -> std::ops::Range<usize> {
    serde_json::from_str::<[usize; 2]>(s).map_or(0..0, |[start, end]| start..end)
}

fn encode_tags(tags: &[String]) -> String {
    serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string())
}

fn decode_tags(s: &str) -> Vec<String> {
    serde_json::from_str(s).unwrap_or_default()
}

fn encode_memory_types(types: &[MemoryType]) -> String {
    serde_json::to_string(types).unwrap_or_else(|_| "[]".to_string())
}

fn decode_memory_types(s: &str) -> Vec<MemoryType> {
    serde_json::from_str(s).unwrap_or_default()
}
