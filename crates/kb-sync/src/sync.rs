//! Refreshing the stored chunks of a source document.

use tracing::{info, warn};

use kb_core::{ChunkConfig, Chunker, DocumentSource, Embedder, RagError, Result, Store};
use kb_query::KnowledgeBase;

/// Outcome of syncing several sources.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Sources that synced, with their new chunk counts.
    pub synced: Vec<(String, usize)>,

    /// Sources that failed, with the error that stopped them.
    pub failed: Vec<(String, RagError)>,
}

impl SyncReport {
    /// Chunks stored across all successful sources.
    pub fn total_chunks(&self) -> usize {
        self.synced.iter().map(|(_, n)| n).sum()
    }

    /// True when no source failed.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Replace the chunks of one source with a fresh copy. Returns the new count.
///
/// Steps run in order and the first failure aborts the rest: fetch, clear,
/// chunk, store. A failure after the clear leaves the source without chunks
/// until the next successful sync.
pub async fn sync_source<S, E>(
    kb: &KnowledgeBase<S, E>,
    source: &dyn DocumentSource,
    chunker: &dyn Chunker,
    target_chunk_size: usize,
    source_id: &str,
) -> Result<usize>
where
    S: Store + ?Sized,
    E: Embedder + ?Sized,
{
    if source_id.trim().is_empty() {
        return Err(RagError::invalid_argument("source id is required"));
    }
    if target_chunk_size == 0 {
        return Err(RagError::config("target chunk size must be positive"));
    }

    info!("Syncing {} source {}", source.source_type(), source_id);

    let content = source.fetch_document(source_id).await?;
    if content.trim().is_empty() {
        warn!("Source {} has no content", source_id);
    }

    let removed = kb.clear_source(source_id).await?;

    let config = ChunkConfig {
        target_chunk_size,
        source_type: source.source_type(),
    };
    let chunks = chunker.chunk(&content, source_id, &config)?;

    kb.store_chunks(&chunks).await?;

    info!(
        "Synced {}: {} chunks replaced {} ({} strategy)",
        source_id,
        chunks.len(),
        removed,
        chunker.name()
    );

    Ok(chunks.len())
}

/// Sync each source in turn, logging and skipping the ones that fail.
pub async fn sync_sources<S, E>(
    kb: &KnowledgeBase<S, E>,
    source: &dyn DocumentSource,
    chunker: &dyn Chunker,
    target_chunk_size: usize,
    source_ids: &[String],
) -> SyncReport
where
    S: Store + ?Sized,
    E: Embedder + ?Sized,
{
    let mut report = SyncReport::default();

    for source_id in source_ids {
        match sync_source(kb, source, chunker, target_chunk_size, source_id).await {
            Ok(count) => report.synced.push((source_id.clone(), count)),
            Err(e) => {
                warn!("Failed to sync {}: {}", source_id, e);
                report.failed.push((source_id.clone(), e));
            }
        }
    }

    info!(
        "Sync finished: {} succeeded, {} failed, {} chunks",
        report.synced.len(),
        report.failed.len(),
        report.total_chunks()
    );

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use kb_chunk::{HeaderChunker, ParagraphChunker};
    use kb_core::SourceType;
    use kb_embed::HashingEmbedder;
    use kb_query::QueryConfig;
    use kb_store::SqliteStore;

    const DIM: usize = 384;

    /// In-memory documents keyed by id; missing ids are not found.
    #[derive(Default)]
    struct StubSource {
        documents: Mutex<HashMap<String, String>>,
    }

    impl StubSource {
        fn with(id: &str, text: &str) -> Self {
            let source = Self::default();
            source.set(id, text);
            source
        }

        fn set(&self, id: &str, text: &str) {
            self.documents
                .lock()
                .unwrap()
                .insert(id.to_string(), text.to_string());
        }

        fn remove(&self, id: &str) {
            self.documents.lock().unwrap().remove(id);
        }
    }

    #[async_trait]
    impl DocumentSource for StubSource {
        fn source_type(&self) -> SourceType {
            SourceType::Notion
        }

        async fn fetch_document(&self, id: &str) -> Result<String> {
            self.documents
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or_else(|| RagError::SourceNotFound { id: id.to_string() })
        }
    }

    /// Embedder whose model is unreachable.
    struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        async fn embed_batch(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            Err(RagError::embedding("model unavailable"))
        }

        fn dimension(&self) -> usize {
            DIM
        }

        fn model_name(&self) -> &str {
            "broken"
        }
    }

    const PAGE: &str = "Consulting overview.\n\nWe run AI workshops for small teams.\n\nPricing is a fixed monthly fee.";

    fn knowledge_base() -> KnowledgeBase<SqliteStore, HashingEmbedder> {
        KnowledgeBase::new(
            Arc::new(SqliteStore::open_memory(DIM).unwrap()),
            Arc::new(HashingEmbedder::with_dimension(DIM)),
            QueryConfig::default(),
        )
        .unwrap()
    }

    async fn contents(kb: &KnowledgeBase<SqliteStore, HashingEmbedder>, id: &str) -> Vec<String> {
        kb.store()
            .chunks_for_source(id)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.content)
            .collect()
    }

    #[tokio::test]
    async fn test_resync_is_idempotent() {
        let kb = knowledge_base();
        let source = StubSource::with("page-1", PAGE);
        let chunker = ParagraphChunker::new();

        let first = sync_source(&kb, &source, &chunker, 40, "page-1").await.unwrap();
        let first_contents = contents(&kb, "page-1").await;

        let second = sync_source(&kb, &source, &chunker, 40, "page-1").await.unwrap();
        let second_contents = contents(&kb, "page-1").await;

        assert_eq!(first, 3);
        assert_eq!(first, second);
        assert_eq!(first_contents, second_contents);

        let stats = kb.store().get_stats().await.unwrap();
        assert_eq!(stats.counts.chunks, 3);
        assert!(stats.counts.is_consistent());
    }

    #[tokio::test]
    async fn test_resync_replaces_old_chunks() {
        let kb = knowledge_base();
        let source = StubSource::with("page-1", PAGE);
        let chunker = ParagraphChunker::new();

        sync_source(&kb, &source, &chunker, 800, "page-1").await.unwrap();
        source.set("page-1", "Completely new text about gardening.");
        let count = sync_source(&kb, &source, &chunker, 800, "page-1").await.unwrap();

        assert_eq!(count, 1);
        assert_eq!(
            contents(&kb, "page-1").await,
            ["Completely new text about gardening."]
        );
        assert!(kb.bm25_search("workshops", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_existing_chunks() {
        let kb = knowledge_base();
        let source = StubSource::with("page-1", PAGE);
        let chunker = ParagraphChunker::new();

        sync_source(&kb, &source, &chunker, 800, "page-1").await.unwrap();
        source.remove("page-1");

        let err = sync_source(&kb, &source, &chunker, 800, "page-1")
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::SourceNotFound { .. }));
        assert_eq!(contents(&kb, "page-1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_embedding_failure_leaves_source_empty() {
        let kb = KnowledgeBase::new(
            Arc::new(SqliteStore::open_memory(DIM).unwrap()),
            Arc::new(BrokenEmbedder),
            QueryConfig::default(),
        )
        .unwrap();
        let source = StubSource::with("page-1", PAGE);

        let err = sync_source(&kb, &source, &ParagraphChunker::new(), 800, "page-1")
            .await
            .unwrap_err();

        assert!(err.is_upstream_error());
        assert_eq!(kb.store().get_stats().await.unwrap().counts.chunks, 0);
    }

    #[tokio::test]
    async fn test_empty_document_clears_source() {
        let kb = knowledge_base();
        let source = StubSource::with("page-1", PAGE);
        let chunker = ParagraphChunker::new();

        sync_source(&kb, &source, &chunker, 800, "page-1").await.unwrap();
        source.set("page-1", "  \n\n ");

        let count = sync_source(&kb, &source, &chunker, 800, "page-1").await.unwrap();
        assert_eq!(count, 0);
        assert!(contents(&kb, "page-1").await.is_empty());
    }

    #[tokio::test]
    async fn test_configuration_errors_fail_fast() {
        let kb = knowledge_base();
        let source = StubSource::with("page-1", PAGE);
        let chunker = ParagraphChunker::new();

        let err = sync_source(&kb, &source, &chunker, 800, "").await.unwrap_err();
        assert!(err.is_config_error());

        let err = sync_source(&kb, &source, &chunker, 0, "page-1").await.unwrap_err();
        assert!(err.is_config_error());
    }

    #[tokio::test]
    async fn test_header_strategy_sync() {
        let kb = knowledge_base();
        let source = StubSource::with(
            "page-1",
            "# Playbook\n\nIntro text.\n\n## Services\n\nAudits.\n\n## Contact\n\nEmail us.",
        );

        let count = sync_source(&kb, &source, &HeaderChunker::new(), 800, "page-1")
            .await
            .unwrap();
        assert_eq!(count, 3);

        let chunks = kb.store().chunks_for_source("page-1").await.unwrap();
        assert_eq!(chunks[1].metadata.section_title.as_deref(), Some("Services"));
        assert_eq!(chunks[1].source_type, SourceType::Notion);
    }

    #[tokio::test]
    async fn test_sync_sources_continues_after_failure() {
        let kb = knowledge_base();
        let source = StubSource::with("page-1", PAGE);
        source.set("page-3", "Another page.");

        let ids: Vec<String> = ["page-1", "page-2", "page-3"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let report = sync_sources(&kb, &source, &ParagraphChunker::new(), 800, &ids).await;

        assert!(!report.is_success());
        assert_eq!(report.synced.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "page-2");
        assert_eq!(report.total_chunks(), 2);
    }
}
