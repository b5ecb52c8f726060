//! Rendering ranked results into a bounded context string.

use kb_core::SearchResult;

/// Returned when there is nothing to render.
pub const NO_CONTEXT: &str = "No relevant context found.";

/// Characters reserved per entry beyond its header.
const ENTRY_MARGIN: i64 = 10;

/// Entries with less room than this are dropped.
const MIN_FRAGMENT: i64 = 100;

const ELLIPSIS: &str = "...";

/// Format results, in rank order, into at most roughly `max_chars` characters.
///
/// Each entry is a `[i. source_type] (score: x.xx)` header line followed by the
/// chunk content. Rendering stops at the first entry with 100 or fewer
/// characters of budget left; a longer chunk is cut to fit and ends in `...`.
pub fn format_context(results: &[SearchResult], max_chars: usize) -> String {
    if results.is_empty() {
        return NO_CONTEXT.to_string();
    }

    let max_chars = max_chars as i64;
    let mut entries: Vec<String> = Vec::with_capacity(results.len());
    let mut used: i64 = 0;

    for (i, result) in results.iter().enumerate() {
        let header = format!(
            "[{}. {}] (score: {:.2})",
            i + 1,
            result.chunk.source_type,
            result.final_score
        );

        let available = max_chars - used - header.chars().count() as i64 - ENTRY_MARGIN;
        if available <= MIN_FRAGMENT {
            break;
        }

        let content = &result.chunk.content;
        let entry = if content.chars().count() as i64 > available {
            let keep = (available as usize).saturating_sub(ELLIPSIS.len());
            let truncated: String = content.chars().take(keep).collect();
            format!("{}\n{}{}\n", header, truncated, ELLIPSIS)
        } else {
            format!("{}\n{}\n", header, content)
        };

        used += entry.chars().count() as i64;
        entries.push(entry);
    }

    entries.join("\n")
}
