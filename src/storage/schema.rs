//! SQL schema for the chunk/embedding database.

/// Current schema version.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// SQL schema for a fresh vector-store database.
///
/// A chunk's scalar fields live directly on the `chunks` row; list-valued
/// metadata (tags, memory types) is encoded as a JSON string, since SQLite
/// only round-trips scalar columns. Embeddings live in a sibling table keyed
/// by `chunk_id` so a re-index can delete/insert chunks without touching
/// embedding rows it doesn't need to replace.
pub const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_info (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chunks (
    chunk_id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    content TEXT NOT NULL,
    token_count INTEGER NOT NULL,
    project TEXT NOT NULL,
    timestamp TEXT,
    message_indices TEXT NOT NULL,
    memory_types TEXT NOT NULL,
    tags TEXT NOT NULL,
    archived INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_chunks_session ON chunks(session_id);
CREATE INDEX IF NOT EXISTS idx_chunks_project ON chunks(project);
CREATE INDEX IF NOT EXISTS idx_chunks_archived ON chunks(archived);

CREATE TABLE IF NOT EXISTS chunk_embeddings (
    chunk_id TEXT PRIMARY KEY,
    embedding BLOB NOT NULL,
    dimensions INTEGER NOT NULL,
    FOREIGN KEY (chunk_id) REFERENCES chunks(chunk_id) ON DELETE CASCADE
);

";

/// SQL to check whether the schema has already been created.
pub const CHECK_SCHEMA_SQL: &str = r"
SELECT COUNT(*) FROM sqlite_master
WHERE type='table' AND name='schema_info';
";

/// SQL to read the stored schema version.
pub const GET_VERSION_SQL: &str = r"
SELECT value FROM schema_info WHERE key = 'version';
";

/// SQL to persist the schema version.
pub const SET_VERSION_SQL: &str = r"
INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?);
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_sql_creates_expected_tables() {
        assert!(SCHEMA_SQL.contains("CREATE TABLE IF NOT EXISTS chunks"));
        assert!(SCHEMA_SQL.contains("CREATE TABLE IF NOT EXISTS chunk_embeddings"));
    }

    #[test]
    fn test_schema_version_is_positive() {
        const _: () = assert!(CURRENT_SCHEMA_VERSION >= 1);
    }
}
