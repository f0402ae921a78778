//! Markdown analysis for the import pipeline.
//!
//! Pure, allocation-light helpers shared by the planner and the writer:
//! - [`split_semantic_blocks`] classifies a document into typed segments
//! - [`split_markdown_by_lines`] / [`chunk_text_by_bytes`] enforce byte limits
//! - [`parse_inline_runs`] turns inline markup into styled runs

mod chunker;
mod inline;
mod splitter;

use std::sync::LazyLock;

use regex::Regex;

pub use chunker::{chunk_text_by_bytes, split_markdown_by_lines, truncate_utf8};
pub use inline::{RunStyle, TextRun, parse_inline_runs};
pub use splitter::{MarkdownBlockSegment, SegmentKind, is_table_align_row, split_semantic_blocks};

/// Extract the text of the first level-1 heading outside code fences.
pub fn extract_title(md: &str) -> Option<String> {
    static H1_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^\s{0,3}# +(.+?)\s*#*\s*$").expect("valid regex"));

    split_semantic_blocks(md)
        .into_iter()
        .filter(|segment| segment.kind == SegmentKind::Heading)
        .find_map(|segment| {
            H1_RE
                .captures(&segment.content)
                .map(|c| c[1].trim().to_string())
                .filter(|t| !t.is_empty())
        })
}
