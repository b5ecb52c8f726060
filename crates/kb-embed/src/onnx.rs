//! ONNX-based embedding model implementation.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ndarray::ArrayViewD;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use kb_core::{Embedder, EmbeddingConfig, RagError, Result};

use crate::l2_normalize;

/// bge-small-en-v1.5 configuration.
const EMBEDDING_DIM: usize = 384;
const MAX_TOKENS: usize = 512;
const MODEL_NAME: &str = "BAAI/bge-small-en-v1.5";

/// ONNX-based embedder for bge-small-en-v1.5 or a compatible BERT encoder.
///
/// The model must accept `input_ids`, `attention_mask` and `token_type_ids`
/// and return either token states `(batch, seq, hidden)` or pooled vectors
/// `(batch, hidden)`. Token states are pooled from the `[CLS]` position.
pub struct OnnxEmbedder {
    /// ONNX inference session (wrapped in Mutex for interior mutability).
    session: Mutex<Session>,

    /// Tokenizer for the model.
    tokenizer: Arc<Tokenizer>,

    /// Embedding dimension.
    dimension: usize,

    /// Maximum token count.
    max_tokens: usize,
}

impl OnnxEmbedder {
    /// Create a new embedder from model and tokenizer paths.
    ///
    /// # Arguments
    /// * `model_path` - Path to the ONNX model file
    /// * `tokenizer_path` - Path to the tokenizer.json file
    pub fn new(model_path: impl AsRef<Path>, tokenizer_path: impl AsRef<Path>) -> Result<Self> {
        Self::load(
            model_path.as_ref(),
            tokenizer_path.as_ref(),
            4,
            EMBEDDING_DIM,
            MAX_TOKENS,
        )
    }

    /// Create an embedder from the embedding section of the configuration.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        Self::load(
            &config.model_file(),
            &config.tokenizer_file(),
            config.num_threads,
            config.dimension,
            config.max_tokens,
        )
    }

    fn load(
        model_path: &Path,
        tokenizer_path: &Path,
        num_threads: usize,
        dimension: usize,
        max_tokens: usize,
    ) -> Result<Self> {
        for path in [model_path, tokenizer_path] {
            if !path.is_file() {
                return Err(RagError::embedding(format!("Model file not found: {:?}", path)));
            }
        }

        info!("Loading ONNX model from {:?}", model_path);

        let session = Session::builder()
            .map_err(|e| RagError::embedding(format!("Failed to create session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| RagError::embedding(format!("Failed to set optimization level: {}", e)))?
            .with_intra_threads(num_threads)
            .map_err(|e| RagError::embedding(format!("Failed to set thread count: {}", e)))?
            .commit_from_file(model_path)
            .map_err(|e| RagError::embedding(format!("Failed to load model: {}", e)))?;

        info!("Loading tokenizer from {:?}", tokenizer_path);

        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| RagError::embedding(format!("Failed to load tokenizer: {}", e)))?;

        info!(
            "Embedder initialized: model={}, dim={}, max_tokens={}",
            MODEL_NAME, dimension, max_tokens
        );

        Ok(Self {
            session: Mutex::new(session),
            tokenizer: Arc::new(tokenizer),
            dimension,
            max_tokens,
        })
    }

    /// Run the model over a batch of texts.
    fn run_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| RagError::embedding(format!("Tokenization failed: {}", e)))?;

        // Pad to the longest sequence, capped at the model's context.
        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0)
            .min(self.max_tokens);

        let batch_size = encodings.len();

        debug!("Embedding batch: size={}, max_len={}", batch_size, max_len);

        let mut input_ids = vec![0i64; batch_size * max_len];
        let mut attention_mask = vec![0i64; batch_size * max_len];
        let token_type_ids = vec![0i64; batch_size * max_len];

        for (i, encoding) in encodings.iter().enumerate() {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            let len = ids.len().min(max_len);

            for j in 0..len {
                input_ids[i * max_len + j] = ids[j] as i64;
                attention_mask[i * max_len + j] = mask[j] as i64;
            }
        }

        let shape = vec![batch_size, max_len];
        let input_ids_tensor = Tensor::from_array((shape.clone(), input_ids))
            .map_err(|e| RagError::embedding(format!("Failed to create input tensor: {}", e)))?;
        let attention_mask_tensor = Tensor::from_array((shape.clone(), attention_mask))
            .map_err(|e| RagError::embedding(format!("Failed to create mask tensor: {}", e)))?;
        let token_type_tensor = Tensor::from_array((shape, token_type_ids))
            .map_err(|e| RagError::embedding(format!("Failed to create type tensor: {}", e)))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| RagError::embedding(format!("Failed to lock session: {}", e)))?;

        let outputs = session
            .run(ort::inputs![
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_mask_tensor,
                "token_type_ids" => token_type_tensor
            ])
            .map_err(|e| RagError::embedding(format!("Inference failed: {}", e)))?;

        // The first output is the last hidden state for BERT exports.
        let (_, output) = outputs
            .iter()
            .next()
            .ok_or_else(|| RagError::embedding("No output tensor found"))?;

        let view = output
            .try_extract_array::<f32>()
            .map_err(|e| RagError::embedding(format!("Failed to extract tensor: {}", e)))?;

        let shape_dims: Vec<usize> = view.shape().to_vec();
        debug!("Output shape: {:?}", shape_dims);

        let hidden_dim = *shape_dims.last().unwrap_or(&0);
        if hidden_dim != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: hidden_dim,
            });
        }

        match shape_dims.len() {
            3 => Ok(Self::cls_pool(&view, batch_size)),
            2 => Ok((0..batch_size)
                .map(|i| {
                    let mut embedding: Vec<f32> = (0..hidden_dim).map(|j| view[[i, j]]).collect();
                    l2_normalize(&mut embedding);
                    embedding
                })
                .collect()),
            _ => Err(RagError::embedding(format!(
                "Unexpected output shape: {:?}",
                shape_dims
            ))),
        }
    }

    /// Take the `[CLS]` token state of every sequence.
    ///
    /// Works with ndarray view of shape [batch, seq, hidden]
    fn cls_pool(tensor: &ArrayViewD<'_, f32>, batch_size: usize) -> Vec<Vec<f32>> {
        let hidden_dim = tensor.shape()[2];

        (0..batch_size)
            .map(|i| {
                let mut embedding: Vec<f32> = (0..hidden_dim).map(|k| tensor[[i, 0, k]]).collect();
                l2_normalize(&mut embedding);
                embedding
            })
            .collect()
    }
}

#[async_trait]
impl Embedder for OnnxEmbedder {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        // Inference blocks the calling thread; callers batch to amortize it.
        self.run_batch(texts)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        MODEL_NAME
    }
}
