//! Semantic block splitter.
//!
//! One forward pass over the lines of a markdown document, with a single
//! line of lookahead for table detection. Each non-blank run is classified
//! so the write pipeline can pick a strategy per segment.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub(crate) static TABLE_ALIGN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\|?\s*:?-{3,}:?\s*(\|\s*:?-{3,}:?\s*)+\|?\s*$").expect("valid regex")
});
static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s{0,3}#{1,6}\s+.+$").expect("valid regex"));
static LIST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s{0,3}([-*+]|\d+\.)\s+.+$").expect("valid regex"));
static BLOCKQUOTE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s{0,3}>\s*.+$").expect("valid regex"));
static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s{0,3}(```|~~~)").expect("valid regex"));

/// Kind of a semantic markdown segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    Heading,
    Paragraph,
    ListOrQuote,
    Table,
    CodeFence,
}

impl SegmentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Heading => "heading",
            Self::Paragraph => "paragraph",
            Self::ListOrQuote => "list_or_quote",
            Self::Table => "table",
            Self::CodeFence => "code_fence",
        }
    }
}

impl std::fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One contiguous, classified span of markdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkdownBlockSegment {
    pub kind: SegmentKind,
    /// Original lines of the span joined with `\n`.
    pub content: String,
}

impl MarkdownBlockSegment {
    fn new(kind: SegmentKind, lines: &[&str]) -> Self {
        Self {
            kind,
            content: lines.join("\n"),
        }
    }
}

/// Split markdown into semantic segments. Blank lines are dropped.
pub fn split_semantic_blocks(content: &str) -> Vec<MarkdownBlockSegment> {
    if content.trim().is_empty() {
        return Vec::new();
    }

    let lines: Vec<&str> = content.lines().collect();
    let mut segments = Vec::new();
    let mut idx = 0;

    while idx < lines.len() {
        let line = lines[idx];
        if line.trim().is_empty() {
            idx += 1;
            continue;
        }

        let (kind, end) = if is_fence_start(line) {
            (SegmentKind::CodeFence, collect_fence(&lines, idx))
        } else if is_heading(line) {
            (SegmentKind::Heading, idx + 1)
        } else if is_table_start(&lines, idx) {
            (SegmentKind::Table, collect_table(&lines, idx))
        } else if is_list_or_quote(line) {
            (SegmentKind::ListOrQuote, collect_list_or_quote(&lines, idx))
        } else {
            (SegmentKind::Paragraph, collect_paragraph(&lines, idx))
        };

        segments.push(MarkdownBlockSegment::new(kind, &lines[idx..end]));
        idx = end;
    }

    segments
}

// ---------------------------------------------------------------------------
// Collectors: each returns the exclusive end index of its segment
// ---------------------------------------------------------------------------

fn collect_fence(lines: &[&str], start: usize) -> usize {
    let marker = FENCE_RE
        .captures(lines[start])
        .and_then(|c| c.get(1))
        .map_or("```", |m| m.as_str());

    for (offset, line) in lines[start + 1..].iter().enumerate() {
        if line.trim().starts_with(marker) {
            return start + offset + 2;
        }
    }
    lines.len()
}

fn collect_table(lines: &[&str], start: usize) -> usize {
    lines[start..]
        .iter()
        .position(|line| line.trim().is_empty() || !line.contains('|'))
        .map_or(lines.len(), |offset| start + offset)
}

fn collect_list_or_quote(lines: &[&str], start: usize) -> usize {
    lines[start..]
        .iter()
        .position(|line| {
            let continues = is_list_or_quote(line) || line.starts_with("    ") || line.starts_with('\t');
            line.trim().is_empty() || !continues
        })
        .map_or(lines.len(), |offset| start + offset)
}

fn collect_paragraph(lines: &[&str], start: usize) -> usize {
    let mut idx = start;
    while idx < lines.len() {
        let line = lines[idx];
        if line.trim().is_empty() {
            break;
        }
        if idx > start
            && (is_heading(line)
                || is_fence_start(line)
                || is_table_start(lines, idx)
                || is_list_or_quote(line))
        {
            break;
        }
        idx += 1;
    }
    idx
}

// ---------------------------------------------------------------------------
// Line predicates
// ---------------------------------------------------------------------------

fn is_heading(line: &str) -> bool {
    HEADING_RE.is_match(line)
}

fn is_list_or_quote(line: &str) -> bool {
    LIST_RE.is_match(line) || BLOCKQUOTE_RE.is_match(line)
}

fn is_fence_start(line: &str) -> bool {
    FENCE_RE.is_match(line)
}

fn is_table_start(lines: &[&str], idx: usize) -> bool {
    match lines.get(idx + 1) {
        Some(next) => lines[idx].contains('|') && TABLE_ALIGN_RE.is_match(next),
        None => false,
    }
}

/// Whether a line is a table alignment row such as `|---|:--:|`.
pub fn is_table_align_row(line: &str) -> bool {
    TABLE_ALIGN_RE.is_match(line)
}
