//! kb-store - SQLite storage layer with FTS5 and sqlite-vec
//!
//! One SQLite file holds the chunk table, an FTS5 full-text index and a
//! sqlite-vec `vec0` vector index, all keyed by the chunk id. The store writes
//! and deletes all three inside one transaction.

mod schema;
mod sqlite;

pub use sqlite::SqliteStore;

// Re-export schema for testing/migrations
pub use schema::{vec_schema, SCHEMA, SCHEMA_VERSION};
