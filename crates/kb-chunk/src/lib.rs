//! kb-chunk - Chunking strategies
//!
//! This crate splits fetched documents into bounded pieces ready for
//! embedding and indexing.
//!
//! # Chunkers
//!
//! - [`ParagraphChunker`]: accumulates blank-line separated paragraphs until
//!   the next one would push the chunk past the target size. Paragraphs are
//!   never split, so a single oversized paragraph becomes its own chunk.
//!
//! - [`HeaderChunker`]: one chunk per `##` section, each prefixed with the
//!   document's `#` title.
//!
//! # Example
//!
//! ```rust
//! use kb_chunk::{ChunkConfig, Chunker, ParagraphChunker};
//!
//! let chunker = ParagraphChunker::new();
//! let config = ChunkConfig::default();
//! let chunks = chunker.chunk("Hello world", "page-1", &config).unwrap();
//! assert_eq!(chunks.len(), 1);
//! ```

mod headers;
mod paragraph;

pub use headers::HeaderChunker;
pub use paragraph::ParagraphChunker;

// Re-export types for convenience
pub use kb_core::{ChunkConfig, ChunkRecord, ChunkStrategy, Chunker};

use kb_core::{RagError, Result};

/// Get the chunker implementing a strategy.
pub fn chunker_for(strategy: ChunkStrategy) -> Box<dyn Chunker> {
    match strategy {
        ChunkStrategy::Paragraph => Box::new(ParagraphChunker::new()),
        ChunkStrategy::Headers => Box::new(HeaderChunker::new()),
    }
}

/// Reject a blank source id before any chunk is produced.
fn require_source_id(source_id: &str) -> Result<()> {
    if source_id.trim().is_empty() {
        return Err(RagError::invalid_argument("source id is required"));
    }
    Ok(())
}
