//! SQLite-based storage implementation.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, Once};

use async_trait::async_trait;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::{debug, info};

use kb_core::{
    now_millis, Chunk, ChunkRecord, DatabaseConfig, IndexCounts, RagError, Result, SearchResult,
    SourceSummary, SourceType, Stats, Store,
};

use crate::schema::{vec_schema, SCHEMA, SCHEMA_VERSION};

const CHUNK_COLUMNS: &str = "c.id, c.source_type, c.source_id, c.content, c.metadata, c.created_at";

/// Largest `k` sqlite-vec accepts in a KNN query.
const VEC_KNN_MAX: u32 = 4096;

static VEC_EXTENSION: Once = Once::new();

/// Register sqlite-vec for every connection opened afterwards.
fn register_vec_extension() -> Result<()> {
    let mut rc = rusqlite::ffi::SQLITE_OK;
    VEC_EXTENSION.call_once(|| unsafe {
        rc = rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite_vec::sqlite3_vec_init as *const (),
        )));
    });

    if rc != rusqlite::ffi::SQLITE_OK {
        return Err(RagError::database(format!(
            "Failed to register sqlite-vec extension (code {})",
            rc
        )));
    }
    Ok(())
}

/// SQLite-based store implementation.
///
/// Owns the chunk table, the FTS5 index and the vec0 index. The connection is
/// a scoped resource: call [`SqliteStore::close`] when done to release file
/// handles and surface close errors.
pub struct SqliteStore {
    /// Connection wrapped in blocking Mutex.
    conn: Mutex<Connection>,

    /// Embedding dimension of the vector index.
    dimension: usize,

    /// Database location, `:memory:` for in-memory stores.
    path: PathBuf,
}

impl SqliteStore {
    /// Open or create a database at the given path with default settings.
    pub fn open(path: impl AsRef<Path>, dimension: usize) -> Result<Self> {
        let config = DatabaseConfig {
            path: path.as_ref().to_path_buf(),
            ..DatabaseConfig::default()
        };
        Self::open_with_config(&config, dimension)
    }

    /// Open or create the database described by `config`.
    pub fn open_with_config(config: &DatabaseConfig, dimension: usize) -> Result<Self> {
        let path = config.path.as_path();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        register_vec_extension()?;

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| RagError::database(format!("Failed to open database: {}", e)))?;

        Self::init(conn, dimension, path, config)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory(dimension: usize) -> Result<Self> {
        register_vec_extension()?;

        let conn = Connection::open_in_memory()
            .map_err(|e| RagError::database(format!("Failed to open in-memory database: {}", e)))?;

        Self::init(conn, dimension, Path::new(":memory:"), &DatabaseConfig::default())
    }

    /// Create tables and indices if absent. Safe to run against an existing store.
    fn init(conn: Connection, dimension: usize, path: &Path, config: &DatabaseConfig) -> Result<Self> {
        if dimension == 0 {
            return Err(RagError::config("embedding dimension must be positive"));
        }

        Self::configure_connection(&conn, config)?;

        conn.execute_batch(SCHEMA)
            .map_err(|e| RagError::database(format!("Failed to initialize schema: {}", e)))?;
        conn.execute(
            "INSERT OR IGNORE INTO kb_info (key, value) VALUES ('schema_version', ?1)",
            params![SCHEMA_VERSION.to_string()],
        )
        .map_err(|e| RagError::database(e.to_string()))?;

        let vec_version: String = conn
            .query_row("SELECT vec_version()", [], |row| row.get(0))
            .map_err(|e| RagError::database(format!("sqlite-vec extension not loaded: {}", e)))?;

        Self::check_dimension(&conn, dimension)?;

        conn.execute_batch(&vec_schema(dimension))
            .map_err(|e| RagError::database(format!("Failed to create vec table: {}", e)))?;

        info!(
            "Database opened at {:?} (sqlite-vec {}, dim={})",
            path, vec_version, dimension
        );

        Ok(Self {
            conn: Mutex::new(conn),
            dimension,
            path: path.to_path_buf(),
        })
    }

    /// Configure SQLite connection for optimal performance.
    fn configure_connection(conn: &Connection, config: &DatabaseConfig) -> Result<()> {
        let journal_mode = if config.wal_mode { "WAL" } else { "DELETE" };
        conn.execute_batch(&format!(
            r#"
            PRAGMA journal_mode = {};
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = {};
            PRAGMA busy_timeout = {};
            PRAGMA temp_store = MEMORY;
            "#,
            journal_mode, config.cache_size, config.busy_timeout_ms
        ))
        .map_err(|e| RagError::database(format!("Failed to configure connection: {}", e)))?;

        Ok(())
    }

    /// Record the dimension on first open, reject a different one afterwards.
    fn check_dimension(conn: &Connection, dimension: usize) -> Result<()> {
        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM kb_info WHERE key = 'embedding_dim'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| RagError::database(e.to_string()))?;

        match stored {
            Some(value) => {
                let expected: usize = value.parse().map_err(|_| {
                    RagError::database(format!("Corrupt embedding_dim value: {}", value))
                })?;
                if expected != dimension {
                    return Err(RagError::DimensionMismatch {
                        expected,
                        actual: dimension,
                    });
                }
            }
            None => {
                conn.execute(
                    "INSERT INTO kb_info (key, value) VALUES ('embedding_dim', ?1)",
                    params![dimension.to_string()],
                )
                .map_err(|e| RagError::database(e.to_string()))?;
            }
        }
        Ok(())
    }

    /// Database location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the connection, surfacing any error SQLite reports.
    pub fn close(self) -> Result<()> {
        let conn = self
            .conn
            .into_inner()
            .map_err(|e| RagError::database(format!("Connection lock poisoned: {}", e)))?;

        conn.close()
            .map_err(|(_, e)| RagError::database(format!("Failed to close database: {}", e)))?;

        info!("Database closed at {:?}", self.path);
        Ok(())
    }

    /// Count how many of `ids` each of the three representations holds.
    pub fn index_presence(&self, ids: &[i64]) -> Result<IndexCounts> {
        self.with_conn(|conn| {
            let mut counts = IndexCounts::default();
            for id in ids {
                counts.chunks += Self::count(conn, "SELECT COUNT(*) FROM chunks WHERE id = ?1", *id)?;
                counts.embeddings +=
                    Self::count(conn, "SELECT COUNT(*) FROM vec_chunks WHERE rowid = ?1", *id)?;
                counts.fts_entries +=
                    Self::count(conn, "SELECT COUNT(*) FROM chunks_fts WHERE rowid = ?1", *id)?;
            }
            Ok(counts)
        })
    }

    fn count(conn: &Connection, sql: &str, id: i64) -> Result<u64> {
        conn.query_row(sql, params![id], |row| row.get::<_, i64>(0))
            .map(|n| n as u64)
            .map_err(|e| RagError::database(e.to_string()))
    }

    /// Execute a blocking operation on the connection.
    fn with_conn<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let conn = self.conn.lock().map_err(|e| RagError::database(e.to_string()))?;
        f(&conn)
    }
}

#[async_trait]
impl Store for SqliteStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    // Chunk operations

    async fn insert_chunks(
        &self,
        chunks: &[ChunkRecord],
        embeddings: &[Vec<f32>],
    ) -> Result<Vec<i64>> {
        if chunks.len() != embeddings.len() {
            return Err(RagError::invalid_argument(
                "chunks and embeddings must have same length",
            ));
        }
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        for embedding in embeddings {
            if embedding.len() != self.dimension {
                return Err(RagError::DimensionMismatch {
                    expected: self.dimension,
                    actual: embedding.len(),
                });
            }
        }

        let mut rows = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            if chunk.content.trim().is_empty() {
                return Err(RagError::invalid_argument("chunk content must not be empty"));
            }
            rows.push(serde_json::to_string(&chunk.metadata)?);
        }

        let created_at = now_millis() as i64;

        self.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| RagError::database(e.to_string()))?;

            let mut ids = Vec::with_capacity(chunks.len());
            {
                let mut meta_stmt = tx
                    .prepare(
                        r#"
                        INSERT INTO chunks (source_type, source_id, content, metadata, created_at)
                        VALUES (?1, ?2, ?3, ?4, ?5)
                        "#,
                    )
                    .map_err(|e| RagError::database(e.to_string()))?;
                let mut vec_stmt = tx
                    .prepare("INSERT INTO vec_chunks (rowid, embedding) VALUES (?1, ?2)")
                    .map_err(|e| RagError::database(e.to_string()))?;
                let mut fts_stmt = tx
                    .prepare(
                        "INSERT INTO chunks_fts (rowid, content, source_type, source_id) VALUES (?1, ?2, ?3, ?4)",
                    )
                    .map_err(|e| RagError::database(e.to_string()))?;

                for ((chunk, metadata), embedding) in chunks.iter().zip(&rows).zip(embeddings) {
                    let source_type = chunk.source_type.as_str();

                    meta_stmt
                        .execute(params![
                            source_type,
                            chunk.source_id,
                            chunk.content,
                            metadata,
                            created_at,
                        ])
                        .map_err(|e| RagError::database(format!("Failed to insert chunk: {}", e)))?;
                    let id = tx.last_insert_rowid();

                    vec_stmt
                        .execute(params![id, Self::vec_to_bytes(embedding)])
                        .map_err(|e| {
                            RagError::database(format!("Failed to insert embedding: {}", e))
                        })?;

                    fts_stmt
                        .execute(params![id, chunk.content, source_type, chunk.source_id])
                        .map_err(|e| {
                            RagError::database(format!("Failed to index chunk text: {}", e))
                        })?;

                    ids.push(id);
                }
            }

            tx.commit()
                .map_err(|e| RagError::database(e.to_string()))?;

            debug!("Inserted {} chunks", ids.len());
            Ok(ids)
        })
    }

    async fn clear_source(&self, source_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| RagError::database(e.to_string()))?;

            let ids: Vec<i64> = {
                let mut stmt = tx
                    .prepare("SELECT id FROM chunks WHERE source_id = ?1")
                    .map_err(|e| RagError::database(e.to_string()))?;
                let ids = stmt
                    .query_map(params![source_id], |row| row.get(0))
                    .map_err(|e| RagError::database(e.to_string()))?
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| RagError::database(e.to_string()))?;
                ids
            };

            if ids.is_empty() {
                debug!("No chunks to clear for source {}", source_id);
                return Ok(0);
            }

            for id in &ids {
                tx.execute("DELETE FROM vec_chunks WHERE rowid = ?1", params![id])
                    .map_err(|e| RagError::database(format!("Failed to delete embedding: {}", e)))?;
                tx.execute("DELETE FROM chunks_fts WHERE rowid = ?1", params![id])
                    .map_err(|e| RagError::database(format!("Failed to delete fts entry: {}", e)))?;
                tx.execute("DELETE FROM chunks WHERE id = ?1", params![id])
                    .map_err(|e| RagError::database(format!("Failed to delete chunk: {}", e)))?;
            }

            tx.commit()
                .map_err(|e| RagError::database(e.to_string()))?;

            debug!("Cleared {} chunks for source {}", ids.len(), source_id);
            Ok(ids.len())
        })
    }

    async fn chunks_for_source(&self, source_id: &str) -> Result<Vec<Chunk>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM chunks c WHERE c.source_id = ?1 ORDER BY c.id",
                    CHUNK_COLUMNS
                ))
                .map_err(|e| RagError::database(e.to_string()))?;

            let chunks = stmt
                .query_map(params![source_id], |row| Self::row_to_chunk(row))
                .map_err(|e| RagError::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| RagError::database(e.to_string()))?;

            Ok(chunks)
        })
    }

    async fn list_sources(&self) -> Result<Vec<SourceSummary>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT source_id, source_type, COUNT(*), MAX(created_at)
                    FROM chunks
                    GROUP BY source_id, source_type
                    ORDER BY source_id
                    "#,
                )
                .map_err(|e| RagError::database(e.to_string()))?;

            let sources = stmt
                .query_map([], |row| {
                    let source_type: String = row.get(1)?;
                    Ok(SourceSummary {
                        source_id: row.get(0)?,
                        source_type: SourceType::from_tag(&source_type),
                        chunks: row.get::<_, i64>(2)? as u64,
                        last_indexed_at: row.get::<_, i64>(3)? as u64,
                    })
                })
                .map_err(|e| RagError::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| RagError::database(e.to_string()))?;

            Ok(sources)
        })
    }

    // Search operations

    async fn bm25_search(&self, query: &str, k: u32) -> Result<Vec<SearchResult>> {
        let Some(match_query) = Self::fts5_query(query) else {
            return Ok(Vec::new());
        };
        if k == 0 {
            return Ok(Vec::new());
        }

        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    r#"
                    SELECT {}, -bm25(chunks_fts) AS score
                    FROM chunks_fts
                    JOIN chunks c ON c.id = chunks_fts.rowid
                    WHERE chunks_fts MATCH ?1
                    ORDER BY score DESC, c.id ASC
                    LIMIT ?2
                    "#,
                    CHUNK_COLUMNS
                ))
                .map_err(|e| RagError::database(e.to_string()))?;

            let results = stmt
                .query_map(params![match_query, k], |row| {
                    let score: f64 = row.get(6)?;
                    Ok(SearchResult::lexical(Self::row_to_chunk(row)?, score as f32))
                })
                .map_err(|e| RagError::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| RagError::database(e.to_string()))?;

            debug!("BM25 search {:?} returned {} results", match_query, results.len());
            Ok(results)
        })
    }

    async fn semantic_search(&self, embedding: &[f32], k: u32) -> Result<Vec<SearchResult>> {
        if embedding.len() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let embedding_bytes = Self::vec_to_bytes(embedding);
        let k = k.min(VEC_KNN_MAX);

        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    r#"
                    WITH knn AS (
                        SELECT rowid, distance
                        FROM vec_chunks
                        WHERE embedding MATCH ?1
                        AND k = ?2
                    )
                    SELECT {}, knn.distance
                    FROM knn
                    JOIN chunks c ON c.id = knn.rowid
                    ORDER BY knn.distance ASC, c.id ASC
                    "#,
                    CHUNK_COLUMNS
                ))
                .map_err(|e| RagError::database(e.to_string()))?;

            let results = stmt
                .query_map(params![embedding_bytes, k], |row| {
                    let distance: f64 = row.get(6)?;
                    Ok(SearchResult::semantic(Self::row_to_chunk(row)?, distance as f32))
                })
                .map_err(|e| RagError::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| RagError::database(e.to_string()))?;

            debug!("Semantic search returned {} results", results.len());
            Ok(results)
        })
    }

    // Stats

    async fn get_stats(&self) -> Result<Stats> {
        let dimension = self.dimension;

        self.with_conn(move |conn| {
            let count = |sql: &str| -> Result<u64> {
                conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                    .map(|n| n as u64)
                    .map_err(|e| RagError::database(e.to_string()))
            };

            let counts = IndexCounts {
                chunks: count("SELECT COUNT(*) FROM chunks")?,
                embeddings: count("SELECT COUNT(*) FROM vec_chunks")?,
                fts_entries: count("SELECT COUNT(*) FROM chunks_fts")?,
            };
            let sources = count("SELECT COUNT(DISTINCT source_id) FROM chunks")?;

            // Get page count and page size to estimate storage
            let page_count: u64 = conn
                .query_row("PRAGMA page_count", [], |row| row.get(0))
                .unwrap_or(0);
            let page_size: u64 = conn
                .query_row("PRAGMA page_size", [], |row| row.get(0))
                .unwrap_or(4096);

            Ok(Stats {
                sources,
                counts,
                dimension,
                storage_bytes: page_count * page_size,
            })
        })
    }
}

// Helper methods
impl SqliteStore {
    /// Convert a row starting with `CHUNK_COLUMNS` to a Chunk.
    fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chunk> {
        let source_type: String = row.get(1)?;
        let metadata: String = row.get(4)?;

        Ok(Chunk {
            id: row.get(0)?,
            source_type: SourceType::from_tag(&source_type),
            source_id: row.get(2)?,
            content: row.get(3)?,
            metadata: serde_json::from_str(&metadata).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
            })?,
            created_at: row.get::<_, i64>(5)? as u64,
        })
    }

    /// Convert f32 vector to bytes (little-endian).
    fn vec_to_bytes(v: &[f32]) -> Vec<u8> {
        v.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    /// Build an FTS5 MATCH expression from free text.
    ///
    /// Every term is quoted so operators and punctuation in user input are
    /// matched literally; terms are ANDed. Returns None when no term carries
    /// an alphanumeric character.
    fn fts5_query(query: &str) -> Option<String> {
        let terms: Vec<String> = query
            .split_whitespace()
            .filter(|term| term.chars().any(char::is_alphanumeric))
            .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
            .collect();

        if terms.is_empty() {
            None
        } else {
            Some(terms.join(" "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIM: usize = 4;

    fn record(source_id: &str, content: &str) -> ChunkRecord {
        let mut record = ChunkRecord::new(SourceType::Notion, source_id, content);
        record.metadata.char_count = Some(content.chars().count());
        record
    }

    fn unit(values: [f32; DIM]) -> Vec<f32> {
        let norm: f32 = values.iter().map(|x| x * x).sum::<f32>().sqrt();
        values.iter().map(|x| x / norm).collect()
    }

    async fn seeded_store() -> (SqliteStore, Vec<i64>) {
        let store = SqliteStore::open_memory(DIM).unwrap();
        let chunks = vec![
            record("page-a", "Rust ownership and the borrow checker"),
            record("page-a", "Async runtimes schedule futures"),
            record("page-b", "Sourdough bread needs a starter"),
        ];
        let embeddings = vec![
            unit([1.0, 0.0, 0.0, 0.0]),
            unit([0.8, 0.6, 0.0, 0.0]),
            unit([0.0, 0.0, 1.0, 0.0]),
        ];
        let ids = store.insert_chunks(&chunks, &embeddings).await.unwrap();
        (store, ids)
    }

    #[tokio::test]
    async fn test_open_memory() {
        let store = SqliteStore::open_memory(DIM).unwrap();
        assert_eq!(store.dimension(), DIM);

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.sources, 0);
        assert_eq!(stats.counts, IndexCounts::default());
    }

    #[tokio::test]
    async fn test_insert_keeps_indices_consistent() {
        let (store, ids) = seeded_store().await;

        assert_eq!(ids.len(), 3);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));

        let counts = store.index_presence(&ids).unwrap();
        assert_eq!(
            counts,
            IndexCounts {
                chunks: 3,
                embeddings: 3,
                fts_entries: 3
            }
        );

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.sources, 2);
        assert!(stats.counts.is_consistent());
    }

    #[tokio::test]
    async fn test_chunks_for_source_roundtrip() {
        let (store, ids) = seeded_store().await;

        let chunks = store.chunks_for_source("page-a").await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].id, ids[0]);
        assert_eq!(chunks[0].content, "Rust ownership and the borrow checker");
        assert_eq!(chunks[0].source_type, SourceType::Notion);
        assert_eq!(chunks[0].metadata.char_count, Some(37));
        assert!(chunks[0].created_at > 0);
    }

    #[tokio::test]
    async fn test_clear_source_removes_every_trace() {
        let (store, ids) = seeded_store().await;

        let removed = store.clear_source("page-a").await.unwrap();
        assert_eq!(removed, 2);

        assert_eq!(store.index_presence(&ids[..2]).unwrap(), IndexCounts::default());
        assert_eq!(
            store.index_presence(&ids[2..]).unwrap(),
            IndexCounts {
                chunks: 1,
                embeddings: 1,
                fts_entries: 1
            }
        );

        assert!(store.bm25_search("borrow", 10).await.unwrap().is_empty());
        let sources = store.list_sources().await.unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].source_id, "page-b");
    }

    #[tokio::test]
    async fn test_clear_unknown_source_is_noop() {
        let (store, _) = seeded_store().await;

        assert_eq!(store.clear_source("missing").await.unwrap(), 0);
        assert_eq!(store.get_stats().await.unwrap().counts.chunks, 3);
    }

    #[tokio::test]
    async fn test_bm25_search() {
        let (store, ids) = seeded_store().await;

        let results = store.bm25_search("borrow checker", 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.id, ids[0]);
        assert!(results[0].bm25_score.unwrap() > 0.0);

        assert!(store.bm25_search("quantum", 10).await.unwrap().is_empty());
        assert!(store.bm25_search("", 10).await.unwrap().is_empty());
        assert!(store.bm25_search("?! ...", 10).await.unwrap().is_empty());
        assert!(store.bm25_search("borrow", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bm25_search_tolerates_fts_syntax() {
        let (store, _) = seeded_store().await;

        for query in ["AND (", "\"unbalanced", "NEAR(borrow", "rust*", "-bread"] {
            assert!(store.bm25_search(query, 10).await.is_ok(), "query {:?}", query);
        }
    }

    #[tokio::test]
    async fn test_bm25_ties_keep_insertion_order() {
        let store = SqliteStore::open_memory(DIM).unwrap();
        let chunks = vec![
            record("page-a", "alpha beta"),
            record("page-b", "alpha beta"),
            record("page-c", "alpha beta"),
        ];
        let embeddings = vec![unit([1.0, 0.0, 0.0, 0.0]); 3];
        let ids = store.insert_chunks(&chunks, &embeddings).await.unwrap();

        let results = store.bm25_search("alpha", 10).await.unwrap();
        let found: Vec<i64> = results.iter().map(|r| r.chunk.id).collect();
        assert_eq!(found, ids);
    }

    #[tokio::test]
    async fn test_semantic_search_orders_by_distance() {
        let (store, ids) = seeded_store().await;

        let results = store
            .semantic_search(&unit([1.0, 0.0, 0.0, 0.0]), 10)
            .await
            .unwrap();

        let found: Vec<i64> = results.iter().map(|r| r.chunk.id).collect();
        assert_eq!(found, ids);

        let distances: Vec<f32> = results.iter().map(|r| r.distance.unwrap()).collect();
        assert!(distances[0].abs() < 1e-4);
        assert!((distances[1] - 0.2).abs() < 1e-4);
        assert!((distances[2] - 1.0).abs() < 1e-4);

        let top = store
            .semantic_search(&unit([1.0, 0.0, 0.0, 0.0]), 1)
            .await
            .unwrap();
        assert_eq!(top.len(), 1);
    }

    #[tokio::test]
    async fn test_semantic_search_dimension_mismatch() {
        let (store, _) = seeded_store().await;

        let err = store.semantic_search(&[1.0, 0.0], 5).await.unwrap_err();
        assert!(matches!(
            err,
            RagError::DimensionMismatch {
                expected: 4,
                actual: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_semantic_search_empty_store() {
        let store = SqliteStore::open_memory(DIM).unwrap();
        let results = store
            .semantic_search(&unit([1.0, 0.0, 0.0, 0.0]), 5)
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_semantic_search_k_above_vec_limit() {
        let (store, ids) = seeded_store().await;

        let results = store
            .semantic_search(&unit([1.0, 0.0, 0.0, 0.0]), VEC_KNN_MAX + 1)
            .await
            .unwrap();
        assert_eq!(results.len(), ids.len());

        let results = store
            .semantic_search(&unit([1.0, 0.0, 0.0, 0.0]), u32::MAX)
            .await
            .unwrap();
        assert_eq!(results.len(), ids.len());
    }

    #[tokio::test]
    async fn test_corrupt_metadata_surfaces() {
        let (store, _) = seeded_store().await;

        store
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE chunks SET metadata = 'not json' WHERE source_id = 'page-b'",
                    [],
                )
                .map_err(|e| RagError::database(e.to_string()))
            })
            .unwrap();

        let err = store.chunks_for_source("page-b").await.unwrap_err();
        assert!(matches!(err, RagError::Database { .. }));

        // Other sources still read fine.
        assert_eq!(store.chunks_for_source("page-a").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_insert_rejects_bad_embeddings_without_writing() {
        let store = SqliteStore::open_memory(DIM).unwrap();
        let chunks = vec![record("page-a", "one"), record("page-a", "two")];

        let err = store
            .insert_chunks(&chunks, &[unit([1.0, 0.0, 0.0, 0.0]), vec![1.0; 3]])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { .. }));

        let err = store
            .insert_chunks(&chunks, &[unit([1.0, 0.0, 0.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::InvalidArgument { .. }));

        assert_eq!(store.get_stats().await.unwrap().counts, IndexCounts::default());
    }

    #[tokio::test]
    async fn test_insert_empty_batch() {
        let store = SqliteStore::open_memory(DIM).unwrap();
        assert!(store.insert_chunks(&[], &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reopen_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kb").join("knowledge_base.db");

        let store = SqliteStore::open(&path, DIM).unwrap();
        store
            .insert_chunks(&[record("page-a", "persisted text")], &[unit([0.0, 1.0, 0.0, 0.0])])
            .await
            .unwrap();
        store.close().unwrap();

        // Re-running init against an existing store keeps its contents.
        let store = SqliteStore::open(&path, DIM).unwrap();
        let results = store.bm25_search("persisted", 5).await.unwrap();
        assert_eq!(results.len(), 1);
        store.close().unwrap();

        let err = SqliteStore::open(&path, 8).err().unwrap();
        assert!(matches!(
            err,
            RagError::DimensionMismatch {
                expected: 4,
                actual: 8
            }
        ));
    }

    #[test]
    fn test_fts5_query_quoting() {
        assert_eq!(SqliteStore::fts5_query("hello world").unwrap(), "\"hello\" \"world\"");
        assert_eq!(SqliteStore::fts5_query("say \"hi\"").unwrap(), "\"say\" \"\"\"hi\"\"\"");
        assert!(SqliteStore::fts5_query("  ").is_none());
        assert!(SqliteStore::fts5_query("-- ?").is_none());
    }
}
