//! Paragraph-based chunker.
//!
//! Splits text on blank lines and packs whole paragraphs into chunks of at
//! most `target_chunk_size` characters.

use tracing::debug;

use kb_core::{ChunkConfig, ChunkRecord, Chunker, RagError, Result};

use crate::require_source_id;

/// Separator placed between paragraphs of one chunk.
const PARAGRAPH_SEPARATOR: &str = "\n\n";

/// Paragraph-packing chunker.
///
/// Sizes are measured in characters of the joined chunk, separators
/// included, so every chunk made of more than one paragraph stays within the
/// target. A lone paragraph longer than the target is emitted whole.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParagraphChunker;

impl ParagraphChunker {
    /// Create a new paragraph chunker.
    pub fn new() -> Self {
        Self
    }

    /// Non-empty, trimmed paragraphs in document order.
    fn paragraphs(content: &str) -> Vec<&str> {
        content
            .split(PARAGRAPH_SEPARATOR)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect()
    }

    fn flush(buffer: &[&str], source_id: &str, config: &ChunkConfig) -> ChunkRecord {
        let content = buffer.join(PARAGRAPH_SEPARATOR);
        let char_count = content.chars().count();
        let mut record = ChunkRecord::new(config.source_type, source_id, content);
        record.metadata.char_count = Some(char_count);
        record
    }
}

impl Chunker for ParagraphChunker {
    fn chunk(
        &self,
        content: &str,
        source_id: &str,
        config: &ChunkConfig,
    ) -> Result<Vec<ChunkRecord>> {
        require_source_id(source_id)?;
        if config.target_chunk_size == 0 {
            return Err(RagError::invalid_argument("target chunk size must be positive"));
        }

        let normalized = content.replace("\r\n", "\n");
        let separator_len = PARAGRAPH_SEPARATOR.chars().count();

        let mut chunks = Vec::new();
        let mut buffer: Vec<&str> = Vec::new();
        let mut buffer_len = 0usize;

        for paragraph in Self::paragraphs(&normalized) {
            let paragraph_len = paragraph.chars().count();
            let joined_len = if buffer.is_empty() {
                paragraph_len
            } else {
                buffer_len + separator_len + paragraph_len
            };

            if joined_len > config.target_chunk_size && !buffer.is_empty() {
                chunks.push(Self::flush(&buffer, source_id, config));
                buffer.clear();
                buffer_len = paragraph_len;
            } else {
                buffer_len = joined_len;
            }

            buffer.push(paragraph);
        }

        if !buffer.is_empty() {
            chunks.push(Self::flush(&buffer, source_id, config));
        }

        debug!(
            "Paragraph chunker produced {} chunks for {} (target {} chars)",
            chunks.len(),
            source_id,
            config.target_chunk_size
        );

        Ok(chunks)
    }

    fn name(&self) -> &'static str {
        "paragraph"
    }
}
