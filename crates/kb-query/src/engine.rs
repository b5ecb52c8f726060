//! Knowledge base facade tying the store and the embedder together.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use kb_core::{
    ChunkRecord, Embedder, RagError, Result, RetrievedContext, SearchResult, Store,
};

use crate::context::format_context;
use crate::fusion::{weighted_fusion, HybridWeights};

/// Settings for writes and retrieval.
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Texts per embedding call when storing chunks.
    pub batch_size: usize,

    /// Default number of results.
    pub top_k: u32,

    /// Default fusion weights.
    pub weights: HybridWeights,

    /// Default context budget in characters.
    pub max_context_chars: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            top_k: 5,
            weights: HybridWeights::default(),
            max_context_chars: 4000,
        }
    }
}

impl QueryConfig {
    /// Build from the loaded configuration file.
    pub fn from_config(config: &kb_core::KbConfig) -> Self {
        Self {
            batch_size: config.embedding.batch_size,
            top_k: config.search.top_k,
            weights: HybridWeights {
                bm25: config.search.bm25_weight,
                semantic: config.search.semantic_weight,
            },
            max_context_chars: config.search.max_context_chars,
        }
    }
}

/// A store plus the embedding provider that feeds it.
///
/// The embedder is injected once and shared; its dimension must match the
/// store's vector index.
pub struct KnowledgeBase<S: ?Sized, E: ?Sized> {
    /// Storage backend.
    store: Arc<S>,

    /// Embedding model.
    embedder: Arc<E>,

    config: QueryConfig,
}

impl<S, E> KnowledgeBase<S, E>
where
    S: Store + ?Sized,
    E: Embedder + ?Sized,
{
    /// Create a knowledge base, failing if the dimensions disagree.
    pub fn new(store: Arc<S>, embedder: Arc<E>, config: QueryConfig) -> Result<Self> {
        if embedder.dimension() != store.dimension() {
            return Err(RagError::DimensionMismatch {
                expected: store.dimension(),
                actual: embedder.dimension(),
            });
        }
        if config.batch_size == 0 {
            return Err(RagError::config("batch size must be positive"));
        }

        info!(
            "Knowledge base ready: model={}, dim={}",
            embedder.model_name(),
            store.dimension()
        );

        Ok(Self {
            store,
            embedder,
            config,
        })
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The embedding provider.
    pub fn embedder(&self) -> &Arc<E> {
        &self.embedder
    }

    /// Active settings.
    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Give back the store and the embedder, e.g. to close the store.
    pub fn into_parts(self) -> (Arc<S>, Arc<E>) {
        (self.store, self.embedder)
    }

    /// Embed and persist chunks. Returns the assigned ids.
    ///
    /// All embeddings are computed before anything is written, so a provider
    /// failure leaves the store untouched.
    pub async fn store_chunks(&self, chunks: &[ChunkRecord]) -> Result<Vec<i64>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let mut embeddings = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.config.batch_size) {
            let texts: Vec<&str> = batch.iter().map(|c| c.content.as_str()).collect();
            let vectors = self.embedder.embed_batch(&texts).await?;

            if vectors.len() != texts.len() {
                return Err(RagError::embedding(format!(
                    "Provider returned {} embeddings for {} texts",
                    vectors.len(),
                    texts.len()
                )));
            }
            for vector in &vectors {
                self.check_dimension(vector)?;
            }

            debug!("Embedded batch of {} chunks", vectors.len());
            embeddings.extend(vectors);
        }

        let ids = self.store.insert_chunks(chunks, &embeddings).await?;
        info!("Stored {} chunks", ids.len());
        Ok(ids)
    }

    /// Remove every chunk of a source. Returns the number removed.
    pub async fn clear_source(&self, source_id: &str) -> Result<usize> {
        let removed = self.store.clear_source(source_id).await?;
        info!("Cleared {} chunks for source {}", removed, source_id);
        Ok(removed)
    }

    /// Lexical search, best match first.
    pub async fn bm25_search(&self, query: &str, top_k: u32) -> Result<Vec<SearchResult>> {
        self.store.bm25_search(query, top_k).await
    }

    /// Vector search with a precomputed query embedding, closest first.
    pub async fn semantic_search(
        &self,
        query_embedding: &[f32],
        top_k: u32,
    ) -> Result<Vec<SearchResult>> {
        self.store.semantic_search(query_embedding, top_k).await
    }

    /// Embed `query` and run a vector search.
    pub async fn semantic_search_text(&self, query: &str, top_k: u32) -> Result<Vec<SearchResult>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let embedding = self.embed_query(query).await?;
        self.store.semantic_search(&embedding, top_k).await
    }

    /// Weighted fusion of lexical and vector results.
    ///
    /// Each side over-fetches `2 * top_k` candidates before merging.
    pub async fn hybrid_search(
        &self,
        query: &str,
        query_embedding: &[f32],
        top_k: u32,
        weights: HybridWeights,
    ) -> Result<Vec<SearchResult>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let fetch_k = top_k.saturating_mul(2);

        let (lexical, semantic) = tokio::join!(
            self.store.bm25_search(query, fetch_k),
            self.store.semantic_search(query_embedding, fetch_k)
        );
        let lexical = lexical?;
        let semantic = semantic?;

        debug!(
            "Hybrid candidates: {} lexical, {} semantic",
            lexical.len(),
            semantic.len()
        );

        Ok(weighted_fusion(lexical, semantic, weights, top_k as usize))
    }

    /// Embed the query, run hybrid search and format the context.
    pub async fn retrieve_context(
        &self,
        query: &str,
        top_k: u32,
        max_chars: usize,
    ) -> Result<RetrievedContext> {
        let start = Instant::now();

        info!("Retrieving context for: {:?}", query);

        let embedding = self.embed_query(query).await?;
        let results = self
            .hybrid_search(query, &embedding, top_k, self.config.weights)
            .await?;
        let context = format_context(&results, max_chars);

        let latency_ms = start.elapsed().as_millis() as u64;

        info!(
            "Retrieved {} results ({} chars) in {}ms",
            results.len(),
            context.chars().count(),
            latency_ms
        );

        Ok(RetrievedContext {
            query: query.to_string(),
            context,
            results,
            latency_ms,
        })
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let embedding = self.embedder.embed(query).await?;
        self.check_dimension(&embedding)?;
        Ok(embedding)
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.store.dimension() {
            return Err(RagError::DimensionMismatch {
                expected: self.store.dimension(),
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kb_core::SourceType;
    use kb_embed::HashingEmbedder;
    use kb_store::SqliteStore;

    const DIM: usize = 384;

    fn knowledge_base() -> KnowledgeBase<SqliteStore, HashingEmbedder> {
        let store = Arc::new(SqliteStore::open_memory(DIM).unwrap());
        let embedder = Arc::new(HashingEmbedder::with_dimension(DIM));
        let config = QueryConfig {
            batch_size: 2,
            ..QueryConfig::default()
        };
        KnowledgeBase::new(store, embedder, config).unwrap()
    }

    fn records(source_id: &str, texts: &[&str]) -> Vec<ChunkRecord> {
        texts
            .iter()
            .map(|t| ChunkRecord::new(SourceType::Notion, source_id, *t))
            .collect()
    }

    async fn seeded() -> KnowledgeBase<SqliteStore, HashingEmbedder> {
        let kb = knowledge_base();
        kb.store_chunks(&records(
            "guide",
            &[
                "Rust ownership rules and the borrow checker",
                "Tokio runs async tasks on a work stealing scheduler",
                "SQLite full text search uses the FTS5 extension",
            ],
        ))
        .await
        .unwrap();
        kb.store_chunks(&records(
            "recipes",
            &["Sourdough bread needs an active starter and patience"],
        ))
        .await
        .unwrap();
        kb
    }

    /// Embedder that reports one dimension and returns another.
    struct LyingEmbedder;

    #[async_trait]
    impl Embedder for LyingEmbedder {
        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.5; 3]).collect())
        }

        fn dimension(&self) -> usize {
            DIM
        }

        fn model_name(&self) -> &str {
            "lying"
        }
    }

    #[test]
    fn test_dimension_checked_on_construction() {
        let store = Arc::new(SqliteStore::open_memory(DIM).unwrap());
        let embedder = Arc::new(HashingEmbedder::with_dimension(DIM * 2));

        let err = KnowledgeBase::new(store, embedder, QueryConfig::default())
            .err()
            .unwrap();
        assert!(err.is_config_error());
    }

    #[tokio::test]
    async fn test_store_chunks_batches_and_indexes() {
        let kb = seeded().await;

        let stats = kb.store().get_stats().await.unwrap();
        assert_eq!(stats.counts.chunks, 4);
        assert!(stats.counts.is_consistent());
        assert_eq!(stats.sources, 2);

        assert!(kb.store_chunks(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_provider_dimension_rejected_before_write() {
        let store = Arc::new(SqliteStore::open_memory(DIM).unwrap());
        let kb = KnowledgeBase::new(store, Arc::new(LyingEmbedder), QueryConfig::default()).unwrap();

        let err = kb
            .store_chunks(&records("guide", &["some text"]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RagError::DimensionMismatch {
                expected: DIM,
                actual: 3
            }
        ));
        assert_eq!(kb.store().get_stats().await.unwrap().counts.chunks, 0);
    }

    #[tokio::test]
    async fn test_bm25_and_semantic_search() {
        let kb = seeded().await;

        let lexical = kb.bm25_search("borrow checker", 5).await.unwrap();
        assert_eq!(lexical.len(), 1);
        assert!(lexical[0].chunk.content.contains("borrow checker"));

        let semantic = kb
            .semantic_search_text("sourdough bread starter", 2)
            .await
            .unwrap();
        assert_eq!(semantic.len(), 2);
        assert_eq!(semantic[0].chunk.source_id, "recipes");
        assert!(semantic[0].distance.unwrap() <= semantic[1].distance.unwrap());
    }

    #[tokio::test]
    async fn test_hybrid_search_is_deterministic() {
        let kb = seeded().await;
        let embedding = kb.embedder().embed("async tasks scheduler").await.unwrap();

        let first = kb
            .hybrid_search("async tasks", &embedding, 3, HybridWeights::default())
            .await
            .unwrap();
        let second = kb
            .hybrid_search("async tasks", &embedding, 3, HybridWeights::default())
            .await
            .unwrap();

        assert_eq!(first.len(), 3);
        assert!(first[0].chunk.content.contains("Tokio"));
        assert!(first
            .windows(2)
            .all(|w| w[0].final_score >= w[1].final_score));

        let ids = |r: &[SearchResult]| r.iter().map(|x| x.chunk.id).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));
    }

    #[tokio::test]
    async fn test_hybrid_search_zero_top_k() {
        let kb = seeded().await;
        let embedding = kb.embedder().embed("anything").await.unwrap();
        let results = kb
            .hybrid_search("anything", &embedding, 0, HybridWeights::default())
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    fn direction(cos: f32, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; DIM];
        v[0] = cos;
        v[axis] = (1.0 - cos * cos).sqrt();
        v
    }

    #[tokio::test]
    async fn test_hybrid_search_overfetch_promotes_lower_ranked() {
        let kb = knowledge_base();
        let chunks = records(
            "birds",
            &[
                "kestrel sightings and other notes from the field trip",
                "first unrelated entry",
                "second unrelated entry",
                "kestrel kestrel kestrel",
            ],
        );
        // Distances to the query: 1.0, 0.0, 0.05, 0.1.
        let embeddings = vec![
            direction(0.0, 2),
            direction(1.0, 1),
            direction(0.95, 1),
            direction(0.9, 3),
        ];
        let ids = kb.store().insert_chunks(&chunks, &embeddings).await.unwrap();

        let query = direction(1.0, 1);
        let results = kb
            .hybrid_search("kestrel", &query, 2, HybridWeights::default())
            .await
            .unwrap();

        // Third closest, yet ranked first once both sides are fused.
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.id, ids[3]);
        assert!(results[0].semantic_score.unwrap() > 0.8);
        assert_eq!(results[0].bm25_score, Some(1.0));
        assert_eq!(results[1].chunk.id, ids[1]);
    }

    #[tokio::test]
    async fn test_hybrid_search_large_top_k() {
        let kb = seeded().await;
        let embedding = kb.embedder().embed("bread").await.unwrap();

        let results = kb
            .hybrid_search("bread", &embedding, 3000, HybridWeights::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 4);
    }

    #[tokio::test]
    async fn test_retrieve_context() {
        let kb = seeded().await;

        let retrieved = kb
            .retrieve_context("borrow checker ownership", 2, 4000)
            .await
            .unwrap();

        assert_eq!(retrieved.query, "borrow checker ownership");
        assert_eq!(retrieved.results.len(), 2);
        assert!(retrieved.context.starts_with("[1. notion] (score: "));
        assert!(retrieved.context.contains("borrow checker"));
    }

    #[tokio::test]
    async fn test_retrieve_context_empty_store() {
        let kb = knowledge_base();

        let retrieved = kb.retrieve_context("anything at all", 5, 4000).await.unwrap();
        assert!(retrieved.results.is_empty());
        assert_eq!(retrieved.context, crate::NO_CONTEXT);
    }

    #[tokio::test]
    async fn test_clear_source() {
        let kb = seeded().await;

        assert_eq!(kb.clear_source("guide").await.unwrap(), 3);
        assert_eq!(kb.clear_source("guide").await.unwrap(), 0);
        assert!(kb.bm25_search("borrow", 5).await.unwrap().is_empty());
    }
}
