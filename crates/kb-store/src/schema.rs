//! Database schema definitions.

/// Main schema SQL for initializing the database.
pub const SCHEMA: &str = r#"
-- Chunk metadata table
CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_type TEXT NOT NULL,
    source_id TEXT NOT NULL,
    content TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chunks_source_id ON chunks(source_id);

-- FTS5 table for BM25 keyword search, rowid = chunks.id.
-- Written explicitly by the store in the same transaction as chunks.
CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
    content,
    source_type UNINDEXED,
    source_id UNINDEXED
);

-- Store-level settings such as the embedding dimension
CREATE TABLE IF NOT EXISTS kb_info (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Schema for the sqlite-vec virtual table, rowid = chunks.id.
/// This must be created after the extension is registered.
pub fn vec_schema(dimension: usize) -> String {
    format!(
        r#"
CREATE VIRTUAL TABLE IF NOT EXISTS vec_chunks USING vec0(
    embedding float[{}] distance_metric=cosine
);
"#,
        dimension
    )
}

/// Schema version for migrations.
pub const SCHEMA_VERSION: u32 = 1;
