//! Core domain types for the knowledge base.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Category of the origin a chunk was imported from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Notion,
    File,
    Text,
    Unknown,
}

impl SourceType {
    /// The tag stored alongside each chunk.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Notion => "notion",
            Self::File => "file",
            Self::Text => "text",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a stored tag, mapping anything unrecognised to `Unknown`.
    pub fn from_tag(tag: &str) -> Self {
        match tag.to_lowercase().as_str() {
            "notion" => Self::Notion,
            "file" => Self::File,
            "text" => Self::Text,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Auxiliary fields carried with a chunk.
///
/// Opaque to search; the paragraph strategy fills `char_count`, the header
/// strategy fills `doc_title` and `section_title`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Character count of the chunk content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub char_count: Option<usize>,

    /// Time the chunk was produced by the chunker (Unix millis).
    #[serde(default)]
    pub created_at: u64,

    /// Top-level document title (header strategy).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_title: Option<String>,

    /// Section heading the chunk was cut from (header strategy).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_title: Option<String>,

    /// Caller-specific extras.
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A chunk produced by a chunker, not yet stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Origin category.
    pub source_type: SourceType,

    /// Identifier of the originating document.
    pub source_id: String,

    /// Plain-text content, never empty.
    pub content: String,

    /// Auxiliary fields.
    pub metadata: ChunkMetadata,
}

impl ChunkRecord {
    /// Create a new chunk record stamped with the current time.
    pub fn new(source_type: SourceType, source_id: &str, content: impl Into<String>) -> Self {
        Self {
            source_type,
            source_id: source_id.to_string(),
            content: content.into(),
            metadata: ChunkMetadata {
                created_at: now_millis(),
                ..ChunkMetadata::default()
            },
        }
    }
}

/// A stored chunk, the atomic retrievable unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Store-assigned identifier, shared by all three indices.
    pub id: i64,

    /// Origin category.
    pub source_type: SourceType,

    /// Identifier of the originating document.
    pub source_id: String,

    /// Plain-text content.
    pub content: String,

    /// Auxiliary fields.
    pub metadata: ChunkMetadata,

    /// Insert timestamp (Unix millis).
    pub created_at: u64,
}

/// A ranked chunk. Derived per query, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// The matched chunk.
    pub chunk: Chunk,

    /// Raw BM25 score for lexical results, normalized score after fusion.
    pub bm25_score: Option<f32>,

    /// Cosine distance to the query embedding (lower is closer).
    pub distance: Option<f32>,

    /// `1 - distance` for semantic results, normalized score after fusion.
    pub semantic_score: Option<f32>,

    /// Score used for ranking (higher is better).
    pub final_score: f32,
}

impl SearchResult {
    /// Build a lexical result from a positive BM25 score.
    pub fn lexical(chunk: Chunk, bm25_score: f32) -> Self {
        Self {
            chunk,
            bm25_score: Some(bm25_score),
            distance: None,
            semantic_score: None,
            final_score: bm25_score,
        }
    }

    /// Build a semantic result from a cosine distance.
    pub fn semantic(chunk: Chunk, distance: f32) -> Self {
        let similarity = 1.0 - distance;
        Self {
            chunk,
            bm25_score: None,
            distance: Some(distance),
            semantic_score: Some(similarity),
            final_score: similarity,
        }
    }
}

/// Formatted context plus the ranked records it was built from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedContext {
    /// The original query.
    pub query: String,

    /// Context string for a downstream generator.
    pub context: String,

    /// Ranked records, for diagnostics.
    pub results: Vec<SearchResult>,

    /// Retrieval latency in milliseconds.
    pub latency_ms: u64,
}

/// Per-source summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSummary {
    /// Source identifier.
    pub source_id: String,

    /// Origin category.
    pub source_type: SourceType,

    /// Number of stored chunks.
    pub chunks: u64,

    /// Most recent insert (Unix millis).
    pub last_indexed_at: u64,
}

/// How many of a set of chunk ids each index holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexCounts {
    /// Rows in the chunk metadata table.
    pub chunks: u64,

    /// Rows in the vector index.
    pub embeddings: u64,

    /// Rows in the full-text index.
    pub fts_entries: u64,
}

impl IndexCounts {
    /// All three representations agree.
    pub fn is_consistent(&self) -> bool {
        self.chunks == self.embeddings && self.chunks == self.fts_entries
    }
}

/// Statistics about the knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stats {
    /// Number of distinct sources.
    pub sources: u64,

    /// Index row counts across the whole store.
    pub counts: IndexCounts,

    /// Embedding dimension of the vector index.
    pub dimension: usize,

    /// Database size in bytes.
    pub storage_bytes: u64,
}

/// Current time in Unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
