//! kb-embed - Embedding providers
//!
//! This crate turns text into fixed-size vectors for semantic search.
//!
//! # Providers
//!
//! - [`OnnxEmbedder`]: ONNX Runtime inference for BAAI/bge-small-en-v1.5 or a
//!   compatible BERT-style model (CLS pooling, L2 normalization, 384 dims).
//! - [`HashingEmbedder`]: deterministic feature-hashing embedder with no model
//!   files. Used in tests and as an offline fallback.

mod hashing;
mod onnx;

pub use hashing::HashingEmbedder;
pub use onnx::OnnxEmbedder;

// Re-export the Embedder trait for convenience
pub use kb_core::Embedder;

/// L2 normalize a vector in place. Zero vectors are left untouched.
pub(crate) fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}
