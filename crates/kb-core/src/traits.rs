//! Core traits defining the interfaces between components.

use async_trait::async_trait;

use crate::error::{RagError, Result};
use crate::types::{Chunk, ChunkRecord, SearchResult, SourceSummary, SourceType, Stats};

/// Storage layer trait.
///
/// The store is the only owner of the chunk table, the vector index and the
/// full-text index. Each mutating call is atomic across all three.
#[async_trait]
pub trait Store: Send + Sync {
    /// Embedding dimension of the vector index.
    fn dimension(&self) -> usize;

    // Chunk operations

    /// Insert chunks with their embeddings (same order, same length).
    /// Returns the assigned ids.
    async fn insert_chunks(&self, chunks: &[ChunkRecord], embeddings: &[Vec<f32>])
        -> Result<Vec<i64>>;

    /// Delete every chunk of a source from all indices. Returns the count removed.
    async fn clear_source(&self, source_id: &str) -> Result<usize>;

    /// All chunks of a source in insertion order.
    async fn chunks_for_source(&self, source_id: &str) -> Result<Vec<Chunk>>;

    /// One summary row per stored source.
    async fn list_sources(&self) -> Result<Vec<SourceSummary>>;

    // Search operations

    /// Lexical search, best BM25 match first.
    async fn bm25_search(&self, query: &str, k: u32) -> Result<Vec<SearchResult>>;

    /// Vector search, smallest cosine distance first.
    async fn semantic_search(&self, embedding: &[f32], k: u32) -> Result<Vec<SearchResult>>;

    // Stats
    async fn get_stats(&self) -> Result<Stats>;
}

/// Embedding model trait.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one vector per input in the same order.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::embedding("No embedding returned"))
    }

    /// Get the embedding dimension.
    fn dimension(&self) -> usize;

    /// Human-readable model identifier for logs.
    fn model_name(&self) -> &str;
}

/// Chunking configuration.
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// Target maximum characters per chunk.
    pub target_chunk_size: usize,

    /// Tag attached to every produced chunk.
    pub source_type: SourceType,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            target_chunk_size: 800,
            source_type: SourceType::Notion,
        }
    }
}

/// Chunking strategy trait.
pub trait Chunker: Send + Sync {
    /// Split a document into chunk records tagged with `source_id`.
    fn chunk(&self, content: &str, source_id: &str, config: &ChunkConfig)
        -> Result<Vec<ChunkRecord>>;

    /// Strategy name for logs.
    fn name(&self) -> &'static str;
}

/// A place documents are fetched from before they are chunked.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Tag attached to chunks of documents from this source.
    fn source_type(&self) -> SourceType;

    /// Fetch the full plain text of a document.
    async fn fetch_document(&self, id: &str) -> Result<String>;
}
