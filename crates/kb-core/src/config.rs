//! Configuration types for the knowledge base.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{RagError, Result};

/// Main configuration for the knowledge base.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KbConfig {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Embedding configuration.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Chunking configuration.
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Search configuration.
    #[serde(default)]
    pub search: SearchConfig,

    /// Notion source configuration.
    #[serde(default)]
    pub notion: NotionConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    /// Enable WAL mode (recommended).
    #[serde(default = "default_true")]
    pub wal_mode: bool,

    /// SQLite cache size in KB (negative = KB, positive = pages).
    #[serde(default = "default_cache_size")]
    pub cache_size: i32,

    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            wal_mode: true,
            cache_size: -64000, // 64MB
            busy_timeout_ms: 30000,
        }
    }
}

/// Embedding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Directory holding `model.onnx` and `tokenizer.json`.
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,

    /// Embedding dimension shared by the model and the vector index.
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Batch size for embedding.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Number of threads for CPU inference.
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,

    /// Maximum tokens fed to the model per text.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            dimension: 384,
            batch_size: 32,
            num_threads: 4,
            max_tokens: 512,
        }
    }
}

impl EmbeddingConfig {
    /// Path of the ONNX model file.
    pub fn model_file(&self) -> PathBuf {
        self.model_path.join("model.onnx")
    }

    /// Path of the tokenizer file.
    pub fn tokenizer_file(&self) -> PathBuf {
        self.model_path.join("tokenizer.json")
    }
}

/// Chunking strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    /// Accumulate blank-line separated paragraphs up to the target size.
    #[default]
    Paragraph,
    /// One chunk per `##` section, prefixed with the document title.
    Headers,
}

impl std::str::FromStr for ChunkStrategy {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "paragraph" | "paragraphs" => Ok(Self::Paragraph),
            "headers" | "header" => Ok(Self::Headers),
            other => Err(RagError::config(format!("Unknown chunk strategy: {}", other))),
        }
    }
}

/// Chunking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Target maximum characters per chunk.
    #[serde(default = "default_target_chunk_size")]
    pub target_chunk_size: usize,

    /// Strategy used by sync.
    #[serde(default)]
    pub strategy: ChunkStrategy,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_chunk_size: 800,
            strategy: ChunkStrategy::Paragraph,
        }
    }
}

/// Search configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Default number of results.
    #[serde(default = "default_top_k")]
    pub top_k: u32,

    /// Weight of the normalized BM25 score.
    #[serde(default = "default_bm25_weight")]
    pub bm25_weight: f32,

    /// Weight of the normalized semantic score.
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f32,

    /// Character budget of the formatted context.
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            bm25_weight: 0.3,
            semantic_weight: 0.7,
            max_context_chars: 4000,
        }
    }
}

/// Notion API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotionConfig {
    /// Integration token.
    #[serde(default)]
    pub api_key: Option<String>,

    /// API base URL.
    #[serde(default = "default_notion_api_base")]
    pub api_base: String,

    /// Value of the `Notion-Version` header.
    #[serde(default = "default_notion_version")]
    pub api_version: String,

    /// Page synced when no id is given.
    #[serde(default)]
    pub default_page_id: Option<String>,

    /// Upper bound on paginated block requests per page.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for NotionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: default_notion_api_base(),
            api_version: default_notion_version(),
            default_page_id: None,
            max_pages: 100,
            timeout_secs: 30,
        }
    }
}

// Default value functions

fn default_true() -> bool {
    true
}

fn default_cache_size() -> i32 {
    -64000
}

fn default_busy_timeout() -> u32 {
    30000
}

fn default_dimension() -> usize {
    384
}

fn default_batch_size() -> usize {
    32
}

fn default_num_threads() -> usize {
    4
}

fn default_max_tokens() -> usize {
    512
}

fn default_target_chunk_size() -> usize {
    800
}

fn default_top_k() -> u32 {
    5
}

fn default_bm25_weight() -> f32 {
    0.3
}

fn default_semantic_weight() -> f32 {
    0.7
}

fn default_max_context_chars() -> usize {
    4000
}

fn default_notion_api_base() -> String {
    "https://api.notion.com/v1".to_string()
}

fn default_notion_version() -> String {
    "2022-06-28".to_string()
}

fn default_max_pages() -> u32 {
    100
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("kb")
        .join("knowledge_base.db")
}

fn default_model_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("kb")
        .join("models")
        .join("bge-small-en-v1.5")
}

impl KbConfig {
    /// Load configuration from file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| RagError::config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load configuration from default paths.
    pub fn load_default() -> Result<Self> {
        // Try user config first
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("kb").join("config.toml");
            if user_config.exists() {
                return Self::load(&user_config);
            }
        }

        // Try local config
        let local_config = PathBuf::from("kb.toml");
        if local_config.exists() {
            return Self::load(&local_config);
        }

        Ok(Self::default())
    }

    /// Apply `NOTION_API_KEY`, `NOTION_PAGE_ID` and `KB_DATABASE_PATH`.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty("NOTION_API_KEY") {
            self.notion.api_key = Some(key);
        }
        if let Some(page_id) = non_empty("NOTION_PAGE_ID") {
            self.notion.default_page_id = Some(page_id);
        }
        if let Some(path) = non_empty("KB_DATABASE_PATH") {
            self.database.path = PathBuf::from(path);
        }
    }

    /// Reject settings that can never work.
    pub fn validate(&self) -> Result<()> {
        if self.embedding.dimension == 0 {
            return Err(RagError::config("embedding.dimension must be positive"));
        }
        if self.embedding.batch_size == 0 {
            return Err(RagError::config("embedding.batch_size must be positive"));
        }
        if self.chunking.target_chunk_size == 0 {
            return Err(RagError::config("chunking.target_chunk_size must be positive"));
        }
        let (bm25, semantic) = (self.search.bm25_weight, self.search.semantic_weight);
        if bm25 < 0.0 || semantic < 0.0 {
            return Err(RagError::config("search weights must not be negative"));
        }
        if bm25 + semantic == 0.0 {
            return Err(RagError::config("search weights must not both be zero"));
        }
        Ok(())
    }
}
