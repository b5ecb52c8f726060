//! kb-core - Core types and traits for the knowledge base
//!
//! This crate provides the foundational types, traits, and error handling
//! shared by the chunker, embedder, store, query and sync crates.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::{RagError, Result};
pub use traits::*;
pub use types::*;
