//! Native docx block payloads built locally from markdown segments.
//!
//! Used when the convert endpoint rejects a chunk. The output is plainer than
//! a real conversion (tables become pipe-joined text, nested lists flatten)
//! but it never depends on the remote markdown parser.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value, json};

use docimport_markdown::{
    SegmentKind, TextRun, chunk_text_by_bytes, is_table_align_row, parse_inline_runs,
    split_markdown_by_lines,
};

pub const BLOCK_TYPE_TEXT: u32 = 2;
/// Heading level `n` uses block type `BLOCK_TYPE_HEADING_BASE + n`.
pub const BLOCK_TYPE_HEADING_BASE: u32 = 2;
pub const BLOCK_TYPE_BULLET: u32 = 12;
pub const BLOCK_TYPE_ORDERED: u32 = 13;
pub const BLOCK_TYPE_CODE: u32 = 14;
pub const BLOCK_TYPE_QUOTE: u32 = 15;

/// Byte cap for the text of one native block.
pub const NATIVE_TEXT_MAX_BYTES: usize = 3000;

static HEADING_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s{0,3}(#{1,6})\s+(.+?)\s*$").expect("valid regex"));
static BULLET_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s{0,3}[-*+]\s+(.+?)\s*$").expect("valid regex"));
static ORDERED_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s{0,3}\d+[.)]\s+(.+?)\s*$").expect("valid regex"));
static QUOTE_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s{0,3}>\s?(.+?)\s*$").expect("valid regex"));

/// Block payloads for one semantic segment, in document order.
pub fn blocks_for_segment(kind: SegmentKind, content: &str) -> Vec<Value> {
    let stripped = content.trim_matches('\n');
    if stripped.is_empty() {
        return Vec::new();
    }

    match kind {
        SegmentKind::Heading => heading_block(stripped).into_iter().collect(),
        SegmentKind::ListOrQuote => list_or_quote_blocks(stripped),
        SegmentKind::CodeFence => textual_blocks(BLOCK_TYPE_CODE, "code", &strip_code_fence(stripped), false),
        SegmentKind::Table => table_blocks(stripped),
        SegmentKind::Paragraph => textual_blocks(BLOCK_TYPE_TEXT, "text", stripped, true),
    }
}

/// One unstyled text block holding `content` verbatim.
pub fn raw_text_block(content: &str) -> Value {
    textual_block(BLOCK_TYPE_TEXT, "text", content, false)
}

// ---------------------------------------------------------------------------
// Per-kind builders
// ---------------------------------------------------------------------------

fn heading_block(line: &str) -> Option<Value> {
    let caps = HEADING_LINE_RE.captures(line.trim())?;
    let level = caps[1].len().clamp(1, 6) as u32;
    Some(textual_block(
        BLOCK_TYPE_HEADING_BASE + level,
        &format!("heading{level}"),
        caps[2].trim(),
        true,
    ))
}

fn list_or_quote_blocks(content: &str) -> Vec<Value> {
    content
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let patterns = [
                (&QUOTE_LINE_RE, BLOCK_TYPE_QUOTE, "quote"),
                (&ORDERED_LINE_RE, BLOCK_TYPE_ORDERED, "ordered"),
                (&BULLET_LINE_RE, BLOCK_TYPE_BULLET, "bullet"),
            ];
            patterns
                .iter()
                .find_map(|(re, block_type, field)| {
                    re.captures(line)
                        .map(|caps| textual_block(*block_type, field, caps[1].trim(), true))
                })
                .unwrap_or_else(|| textual_block(BLOCK_TYPE_TEXT, "text", line.trim(), true))
        })
        .collect()
}

/// Tables degrade to one text block per row; the header row is bolded.
fn table_blocks(content: &str) -> Vec<Value> {
    let rows: Vec<&str> = content
        .lines()
        .map(str::trim_end)
        .filter(|row| !row.trim().is_empty() && !is_table_align_row(row.trim()))
        .collect();

    let mut blocks = Vec::new();
    for (idx, row) in rows.iter().enumerate() {
        let cells: Vec<&str> = row.trim().trim_matches('|').split('|').map(str::trim).collect();
        if cells.iter().all(|cell| cell.is_empty()) {
            continue;
        }

        let text = if idx == 0 {
            cells
                .iter()
                .filter(|cell| !cell.is_empty())
                .map(|cell| {
                    if cell.contains("**") {
                        cell.to_string()
                    } else {
                        format!("**{cell}**")
                    }
                })
                .collect::<Vec<_>>()
                .join(" | ")
        } else {
            cells.join(" | ")
        };
        blocks.push(textual_block(BLOCK_TYPE_TEXT, "text", &text, true));
    }
    blocks
}

/// Drop the opening fence line and a matching closing fence, if present.
fn strip_code_fence(content: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let Some(first) = lines.first().map(|l| l.trim()) else {
        return content.to_string();
    };
    if lines.len() < 2 || !(first.starts_with("```") || first.starts_with("~~~")) {
        return content.to_string();
    }

    let fence = &first[..3];
    let mut body = &lines[1..];
    if body.last().is_some_and(|last| last.trim().starts_with(fence)) {
        body = &body[..body.len() - 1];
    }
    body.join("\n")
}

// ---------------------------------------------------------------------------
// Payload assembly
// ---------------------------------------------------------------------------

/// Text split across as many blocks as the byte cap requires.
fn textual_blocks(block_type: u32, field: &str, text: &str, parse_inline: bool) -> Vec<Value> {
    split_for_native_block(text, NATIVE_TEXT_MAX_BYTES)
        .iter()
        .map(|chunk| textual_block(block_type, field, chunk, parse_inline))
        .collect()
}

fn textual_block(block_type: u32, field: &str, text: &str, parse_inline: bool) -> Value {
    let elements: Vec<Value> = if parse_inline {
        parse_inline_runs(text).iter().map(text_element).collect()
    } else {
        vec![json!({ "text_run": { "content": text } })]
    };

    let mut block = Map::new();
    block.insert("block_type".into(), json!(block_type));
    block.insert(field.into(), json!({ "elements": elements }));
    Value::Object(block)
}

fn text_element(run: &TextRun) -> Value {
    if run.style.is_plain() {
        return json!({ "text_run": { "content": run.content } });
    }

    let mut style = Map::new();
    for (flag, key) in [
        (run.style.bold, "bold"),
        (run.style.italic, "italic"),
        (run.style.strikethrough, "strikethrough"),
        (run.style.inline_code, "inline_code"),
    ] {
        if flag {
            style.insert(key.into(), Value::Bool(true));
        }
    }
    if let Some(url) = &run.style.link {
        style.insert("link".into(), json!({ "url": url }));
    }
    json!({ "text_run": { "content": run.content, "text_element_style": style } })
}

fn split_for_native_block(text: &str, max_bytes: usize) -> Vec<String> {
    if text.len() <= max_bytes {
        return vec![text.to_string()];
    }

    let by_lines = if text.contains('\n') {
        split_markdown_by_lines(text, max_bytes)
    } else {
        vec![text.to_string()]
    };

    by_lines
        .into_iter()
        .flat_map(|piece| {
            if piece.len() <= max_bytes {
                vec![piece]
            } else {
                chunk_text_by_bytes(&piece, max_bytes)
            }
        })
        .collect()
}
