//! kb-sync - Document sources and re-synchronisation
//!
//! A sync replaces everything stored for one source id with a fresh copy:
//! fetch the document, clear the old chunks, chunk the new text, embed and
//! store it.
//!
//! # Sources
//!
//! - [`NotionSource`]: page text through the Notion REST API
//! - [`FileSource`]: local UTF-8 text files

mod file;
mod notion;
mod sync;

pub use file::FileSource;
pub use notion::{block_text, NotionSource};
pub use sync::{sync_source, sync_sources, SyncReport};

// Re-export the DocumentSource trait for convenience
pub use kb_core::DocumentSource;
