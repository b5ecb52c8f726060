//! Notion pages as a document source.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use kb_core::{DocumentSource, NotionConfig, RagError, Result, SourceType};

/// One page of `GET /blocks/{id}/children`.
#[derive(Debug, Deserialize)]
struct BlockChildren {
    #[serde(default)]
    results: Vec<Value>,

    #[serde(default)]
    has_more: bool,

    #[serde(default)]
    next_cursor: Option<String>,
}

/// Fetches the plain text of a Notion page through the public REST API.
///
/// Only the page's direct child blocks are read. Every block whose payload
/// carries `rich_text` contributes the concatenated `plain_text` of its text
/// spans; blocks are joined with newlines.
pub struct NotionSource {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
    api_version: String,
    max_pages: u32,
}

impl NotionSource {
    /// Build a source from configuration. The API key is required.
    pub fn from_config(config: &NotionConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| RagError::config("NOTION_API_KEY is not set"))?;

        let client = reqwest::Client::builder()
            .user_agent(concat!("kb/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RagError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
            max_pages: config.max_pages.max(1),
        })
    }

    /// Children endpoint for a page id given with or without dashes.
    fn children_url(&self, page_id: &str) -> String {
        format!("{}/blocks/{}/children", self.api_base, page_id.replace('-', ""))
    }

    async fn fetch_children(&self, url: &str, cursor: Option<&str>) -> Result<BlockChildren> {
        let mut request = self
            .client
            .get(url)
            .bearer_auth(&self.api_key)
            .header("Notion-Version", &self.api_version);
        if let Some(cursor) = cursor {
            request = request.query(&[("start_cursor", cursor)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RagError::fetch(format!("Network error while fetching Notion page: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, url));
        }

        response
            .json::<BlockChildren>()
            .await
            .map_err(|e| RagError::fetch(format!("Invalid Notion response: {}", e)))
    }
}

#[async_trait]
impl DocumentSource for NotionSource {
    fn source_type(&self) -> SourceType {
        SourceType::Notion
    }

    async fn fetch_document(&self, id: &str) -> Result<String> {
        if id.trim().is_empty() {
            return Err(RagError::invalid_argument("Notion page id is required"));
        }

        info!("Fetching content from Notion page: {}", id);

        let url = self.children_url(id);
        let mut texts: Vec<String> = Vec::new();
        let mut cursor: Option<String> = None;
        let mut exhausted = false;

        for page in 0..self.max_pages {
            let children = self
                .fetch_children(&url, cursor.as_deref())
                .await
                .map_err(|e| with_page_id(e, id))?;

            debug!("Notion page {}: {} blocks in batch {}", id, children.results.len(), page);
            texts.extend(children.results.iter().filter_map(block_text));

            match (children.has_more, children.next_cursor) {
                (true, Some(next)) => cursor = Some(next),
                _ => {
                    exhausted = true;
                    break;
                }
            }
        }

        if !exhausted {
            warn!(
                "Stopped reading Notion page {} after {} batches",
                id, self.max_pages
            );
        }

        let content = texts.join("\n");
        info!("Fetched {} characters from Notion", content.chars().count());
        if content.trim().is_empty() {
            warn!("Notion page {} appears to be empty", id);
        }

        Ok(content)
    }
}

/// Plain text of one block, or None when it carries no text.
pub fn block_text(block: &Value) -> Option<String> {
    let block_type = block.get("type")?.as_str()?;
    let rich_text = block.get(block_type)?.get("rich_text")?.as_array()?;

    let text: String = rich_text
        .iter()
        .filter(|span| span.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|span| span.get("plain_text").and_then(Value::as_str))
        .collect();

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Map an HTTP failure to the error taxonomy.
fn status_error(status: StatusCode, url: &str) -> RagError {
    match status {
        StatusCode::NOT_FOUND => RagError::SourceNotFound {
            id: url.to_string(),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RagError::AccessDenied {
            id: url.to_string(),
        },
        other => RagError::fetch(format!("Notion API error: {}", other)),
    }
}

/// Report not-found and access errors against the page id instead of the URL.
fn with_page_id(err: RagError, page_id: &str) -> RagError {
    match err {
        RagError::SourceNotFound { .. } => RagError::SourceNotFound {
            id: page_id.to_string(),
        },
        RagError::AccessDenied { .. } => RagError::AccessDenied {
            id: page_id.to_string(),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(api_key: Option<&str>) -> NotionConfig {
        NotionConfig {
            api_key: api_key.map(String::from),
            ..NotionConfig::default()
        }
    }

    #[test]
    fn test_paragraph_block_text() {
        let block = json!({
            "type": "paragraph",
            "paragraph": {
                "rich_text": [
                    {"type": "text", "plain_text": "We help "},
                    {"type": "text", "plain_text": "teams ship."}
                ]
            }
        });
        assert_eq!(block_text(&block).as_deref(), Some("We help teams ship."));
    }

    #[test]
    fn test_non_text_spans_skipped() {
        let block = json!({
            "type": "heading_2",
            "heading_2": {
                "rich_text": [
                    {"type": "mention", "plain_text": "@someone"},
                    {"type": "text", "plain_text": "Services"},
                    {"type": "equation", "plain_text": "x^2"}
                ]
            }
        });
        assert_eq!(block_text(&block).as_deref(), Some("Services"));
    }

    #[test]
    fn test_blocks_without_text() {
        let image = json!({"type": "image", "image": {"file": {"url": "https://example.com/a.png"}}});
        assert_eq!(block_text(&image), None);

        let empty = json!({"type": "paragraph", "paragraph": {"rich_text": []}});
        assert_eq!(block_text(&empty), None);

        let untyped = json!({"paragraph": {"rich_text": [{"type": "text", "plain_text": "x"}]}});
        assert_eq!(block_text(&untyped), None);

        let malformed = json!({"type": "paragraph", "paragraph": {"rich_text": "oops"}});
        assert_eq!(block_text(&malformed), None);
    }

    #[test]
    fn test_block_children_page_parsing() {
        let body = json!({
            "object": "list",
            "results": [
                {"type": "paragraph", "paragraph": {"rich_text": [{"type": "text", "plain_text": "One"}]}},
                {"type": "divider", "divider": {}},
                {"type": "to_do", "to_do": {"rich_text": [{"type": "text", "plain_text": "Two"}]}}
            ],
            "has_more": true,
            "next_cursor": "cursor-2"
        });

        let page: BlockChildren = serde_json::from_value(body).unwrap();
        let texts: Vec<String> = page.results.iter().filter_map(block_text).collect();

        assert_eq!(texts, ["One", "Two"]);
        assert!(page.has_more);
        assert_eq!(page.next_cursor.as_deref(), Some("cursor-2"));

        let last: BlockChildren =
            serde_json::from_value(json!({"results": [], "has_more": false, "next_cursor": null}))
                .unwrap();
        assert!(!last.has_more);
        assert!(last.next_cursor.is_none());
    }

    #[test]
    fn test_status_mapping() {
        let page = "1234";
        assert!(matches!(
            with_page_id(status_error(StatusCode::NOT_FOUND, "url"), page),
            RagError::SourceNotFound { id } if id == "1234"
        ));
        assert!(matches!(
            with_page_id(status_error(StatusCode::UNAUTHORIZED, "url"), page),
            RagError::AccessDenied { .. }
        ));
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, "url"),
            RagError::AccessDenied { .. }
        ));

        let err = status_error(StatusCode::TOO_MANY_REQUESTS, "url");
        assert!(err.is_upstream_error());
        assert_eq!(err.error_code(), "FETCH_ERROR");
    }

    #[test]
    fn test_missing_api_key() {
        let err = NotionSource::from_config(&config(None)).err().unwrap();
        assert!(err.is_config_error());

        let err = NotionSource::from_config(&config(Some("  "))).err().unwrap();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_children_url_strips_dashes() {
        let source = NotionSource::from_config(&config(Some("secret"))).unwrap();
        assert_eq!(
            source.children_url("1a2b-3c4d-5e6f"),
            "https://api.notion.com/v1/blocks/1a2b3c4d5e6f/children"
        );
        assert_eq!(source.source_type(), SourceType::Notion);
    }

    #[tokio::test]
    async fn test_blank_page_id_rejected() {
        let source = NotionSource::from_config(&config(Some("secret"))).unwrap();
        let err = source.fetch_document(" ").await.unwrap_err();
        assert!(err.is_config_error());
    }
}
