//! Feature-hashing embedder.

use async_trait::async_trait;

use kb_core::{Embedder, Result};

use crate::l2_normalize;

const MODEL_NAME: &str = "feature-hashing";

/// Deterministic embedder that needs no model files.
///
/// Every lowercase word is hashed with blake3 into one of `dimension` buckets
/// with a hash-derived sign, then the vector is L2 normalized. Texts sharing
/// vocabulary end up close in cosine distance, which is enough for tests and
/// for running the knowledge base without a downloaded model.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    /// Create a hashing embedder with the default 384 dimensions.
    pub fn new() -> Self {
        Self { dimension: 384 }
    }

    /// Create a hashing embedder with a custom dimension.
    pub fn with_dimension(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimension];
        if self.dimension == 0 {
            return embedding;
        }

        let mut tokens = 0usize;
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let hash = blake3::hash(word.to_lowercase().as_bytes());
            let bytes = hash.as_bytes();
            let bucket = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
                % self.dimension;
            let sign = if bytes[4] & 1 == 0 { 1.0 } else { -1.0 };
            embedding[bucket] += sign;
            tokens += 1;
        }

        // Texts without words still need a unit vector for cosine distance.
        if tokens == 0 {
            embedding[0] = 1.0;
        }

        l2_normalize(&mut embedding);
        embedding
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        MODEL_NAME
    }
}
