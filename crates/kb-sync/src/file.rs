//! Local text files as a document source.

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use kb_core::{DocumentSource, RagError, Result, SourceType};

/// Reads UTF-8 text files. The document id is the file path, resolved
/// against `root` when relative.
#[derive(Debug, Clone, Default)]
pub struct FileSource {
    root: Option<PathBuf>,
}

impl FileSource {
    /// Resolve ids against the working directory.
    pub fn new() -> Self {
        Self { root: None }
    }

    /// Resolve relative ids against `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, id: &str) -> PathBuf {
        match &self.root {
            Some(root) => root.join(id),
            None => PathBuf::from(id),
        }
    }
}

#[async_trait]
impl DocumentSource for FileSource {
    fn source_type(&self) -> SourceType {
        SourceType::File
    }

    async fn fetch_document(&self, id: &str) -> Result<String> {
        if id.trim().is_empty() {
            return Err(RagError::invalid_argument("file path is required"));
        }

        let path = self.resolve(id);
        debug!("Reading document from {:?}", path);

        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => RagError::SourceNotFound { id: id.to_string() },
                ErrorKind::PermissionDenied => RagError::AccessDenied { id: id.to_string() },
                ErrorKind::InvalidData => {
                    RagError::fetch(format!("{} is not valid UTF-8 text", id))
                }
                _ => RagError::Io(e),
            })
    }
}
