//! Inline markdown to styled text runs.
//!
//! A deliberately small dialect: links, bold, italic, strikethrough and
//! inline code, no nesting. Anything else passes through as plain text.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

static INLINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"\[(?P<link_text>[^\]]+)\]\((?P<link_url>[^)]+)\)",
        r"|\*\*(?P<bold>[^*]+)\*\*",
        r"|__(?P<bold_us>[^_]+)__",
        r"|`(?P<code>[^`]+)`",
        r"|~~(?P<strike>[^~]+)~~",
        r"|\*(?P<italic>[^*\n]+)\*",
        r"|_(?P<italic_us>[^_\n]+)_",
    ))
    .expect("valid regex")
});

/// Style flags of one text run. All off means plain text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStyle {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub bold: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub italic: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub strikethrough: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub inline_code: bool,
    /// Absolute URL; relative and local targets never get a link.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl RunStyle {
    pub fn is_plain(&self) -> bool {
        *self == Self::default()
    }
}

/// A span of text with a single style.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRun {
    pub content: String,
    pub style: RunStyle,
}

impl TextRun {
    pub fn plain(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            style: RunStyle::default(),
        }
    }

    fn styled(content: &str, style: RunStyle) -> Self {
        Self {
            content: content.to_string(),
            style,
        }
    }
}

/// Split inline markdown into styled runs.
///
/// Always returns at least one run (an empty plain run for empty input).
pub fn parse_inline_runs(text: &str) -> Vec<TextRun> {
    if text.is_empty() {
        return vec![TextRun::plain("")];
    }

    let mut runs = Vec::new();
    let mut cursor = 0;

    for caps in INLINE_RE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        if whole.start() > cursor {
            runs.push(TextRun::plain(&text[cursor..whole.start()]));
        }

        let run = if let (Some(label), Some(target)) = (caps.name("link_text"), caps.name("link_url")) {
            let link = absolute_link(target.as_str());
            TextRun::styled(label.as_str(), RunStyle { link, ..Default::default() })
        } else if let Some(m) = caps.name("bold").or_else(|| caps.name("bold_us")) {
            TextRun::styled(m.as_str(), RunStyle { bold: true, ..Default::default() })
        } else if let Some(m) = caps.name("code") {
            TextRun::styled(m.as_str(), RunStyle { inline_code: true, ..Default::default() })
        } else if let Some(m) = caps.name("strike") {
            TextRun::styled(m.as_str(), RunStyle { strikethrough: true, ..Default::default() })
        } else if let Some(m) = caps.name("italic").or_else(|| caps.name("italic_us")) {
            TextRun::styled(m.as_str(), RunStyle { italic: true, ..Default::default() })
        } else {
            TextRun::plain(whole.as_str())
        };
        runs.push(run);
        cursor = whole.end();
    }

    if cursor < text.len() {
        runs.push(TextRun::plain(&text[cursor..]));
    }
    runs
}

/// Keep a link target only when it is an absolute http(s) URL.
fn absolute_link(target: &str) -> Option<String> {
    let target = target.trim();
    match Url::parse(target) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Some(target.to_string()),
        _ => None,
    }
}
