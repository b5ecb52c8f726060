//! kb-query - Search and ranking
//!
//! This crate combines lexical (BM25) and vector search into one ranking and
//! renders the top results into a context string for a downstream generator.
//!
//! # Features
//!
//! - Hybrid search with per-side min-max normalization and weighted fusion
//! - Bounded context formatting with a fixed "no context" sentinel
//! - [`KnowledgeBase`], the entry point that embeds, stores and retrieves
//!
//! # Example
//!
//! ```rust,ignore
//! use kb_query::{KnowledgeBase, QueryConfig};
//! use std::sync::Arc;
//!
//! let kb = KnowledgeBase::new(Arc::new(store), Arc::new(embedder), QueryConfig::default())?;
//! let retrieved = kb.retrieve_context("consulting services", 5, 4000).await?;
//! println!("{}", retrieved.context);
//! ```

mod context;
mod engine;
mod fusion;

pub use context::{format_context, NO_CONTEXT};
pub use engine::{KnowledgeBase, QueryConfig};
pub use fusion::{normalize_bm25, normalize_distances, weighted_fusion, HybridWeights};

// Re-export for convenience
pub use kb_core::{RetrievedContext, SearchResult};
