//! Header-based chunker for markdown-structured documents.

use pulldown_cmark::{Event, HeadingLevel, Parser, Tag, TagEnd};
use tracing::debug;

use kb_core::{ChunkConfig, ChunkRecord, Chunker, Result};

use crate::require_source_id;

const UNTITLED: &str = "Untitled";
const PREAMBLE_TITLE: &str = "Introduction";

/// Splits a document at every level-two heading.
///
/// Each chunk is prefixed with the document's first level-one heading so the
/// section keeps its context once retrieved on its own. Text before the first
/// level-two heading becomes an "Introduction" chunk. Section size is not
/// bounded by `target_chunk_size`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderChunker;

/// Heading positions found in a document.
struct Outline {
    title: Option<String>,
    /// Byte offset and text of each level-two heading.
    sections: Vec<(usize, String)>,
}

impl HeaderChunker {
    /// Create a new header chunker.
    pub fn new() -> Self {
        Self
    }

    fn outline(content: &str) -> Outline {
        let mut title = None;
        let mut sections = Vec::new();
        let mut current: Option<(HeadingLevel, usize, String)> = None;
        // Headings inside quotes, lists and footnotes are section content.
        let mut depth = 0usize;

        for (event, range) in Parser::new(content).into_offset_iter() {
            match event {
                Event::Start(
                    Tag::BlockQuote | Tag::List(_) | Tag::Item | Tag::FootnoteDefinition(_),
                ) => depth += 1,
                Event::End(
                    TagEnd::BlockQuote | TagEnd::List(_) | TagEnd::Item | TagEnd::FootnoteDefinition,
                ) => depth = depth.saturating_sub(1),
                Event::Start(Tag::Heading { level, .. }) if depth == 0 => {
                    current = Some((level, range.start, String::new()));
                }
                Event::Text(text) | Event::Code(text) => {
                    if let Some((_, _, buf)) = current.as_mut() {
                        buf.push_str(&text);
                    }
                }
                Event::End(TagEnd::Heading(_)) => {
                    if let Some((level, start, text)) = current.take() {
                        let text = text.trim().to_string();
                        let line = &content[start..];
                        match level {
                            HeadingLevel::H1 if title.is_none() && line.starts_with("# ") => {
                                title = Some(text)
                            }
                            HeadingLevel::H2 if line.starts_with("##") => {
                                sections.push((start, text))
                            }
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }

        Outline { title, sections }
    }
}

impl Chunker for HeaderChunker {
    fn chunk(
        &self,
        content: &str,
        source_id: &str,
        config: &ChunkConfig,
    ) -> Result<Vec<ChunkRecord>> {
        require_source_id(source_id)?;

        let outline = Self::outline(content);
        let doc_title = outline
            .title
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| UNTITLED.to_string());

        // Section boundaries: document start plus every `##` heading.
        let mut bounds: Vec<(usize, Option<&str>)> = vec![(0, None)];
        bounds.extend(outline.sections.iter().map(|(start, t)| (*start, Some(t.as_str()))));

        let mut chunks = Vec::new();
        for (i, (start, heading)) in bounds.iter().enumerate() {
            let end = bounds.get(i + 1).map_or(content.len(), |(next, _)| *next);
            let section = content[*start..end].trim();
            if section.is_empty() {
                continue;
            }

            let section_title = heading.unwrap_or(PREAMBLE_TITLE).to_string();
            let body = format!("# {}\n\n{}", doc_title, section);

            let mut record = ChunkRecord::new(config.source_type, source_id, body);
            record.metadata.doc_title = Some(doc_title.clone());
            record.metadata.section_title = Some(section_title);
            chunks.push(record);
        }

        debug!(
            "Header chunker produced {} chunks for {} ({:?})",
            chunks.len(),
            source_id,
            doc_title
        );

        Ok(chunks)
    }

    fn name(&self) -> &'static str {
        "headers"
    }
}
