//! Table-of-contents link extraction.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::paths::normalize_link_target;

static MD_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(?P<label>[^\]]+)\]\((?P<target>[^)]+)\)").expect("valid regex")
});

/// Lines on each side of a link included in resolver context.
pub const CONTEXT_WINDOW: usize = 2;

/// One markdown link from the TOC file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocLinkRef {
    /// 1-based line number in the TOC.
    pub line_no: usize,
    pub label: String,
    pub raw_target: String,
}

impl TocLinkRef {
    /// `line N: [label](target)`, the prefix of every diagnostic line.
    pub fn describe(&self) -> String {
        format!("line {}: [{}]({})", self.line_no, self.label, self.raw_target)
    }
}

/// Extract every link whose normalized target is a `.md` file.
pub fn parse_toc_links(toc: &str) -> Vec<TocLinkRef> {
    let mut links = Vec::new();
    for (idx, line) in toc.lines().enumerate() {
        for caps in MD_LINK_RE.captures_iter(line) {
            let label = caps.name("label").map_or("", |m| m.as_str()).trim();
            let target = caps.name("target").map_or("", |m| m.as_str()).trim();
            let is_markdown = normalize_link_target(target, "")
                .is_some_and(|t| t.to_lowercase().ends_with(".md"));
            if !is_markdown {
                continue;
            }
            links.push(TocLinkRef {
                line_no: idx + 1,
                label: label.to_string(),
                raw_target: target.to_string(),
            });
        }
    }
    links
}

/// Surrounding TOC lines, numbered, for the resolver prompt.
pub fn toc_context(toc_lines: &[&str], line_no: usize) -> String {
    if toc_lines.is_empty() || line_no == 0 {
        return String::new();
    }
    let start = line_no.saturating_sub(CONTEXT_WINDOW).max(1);
    let end = (line_no + CONTEXT_WINDOW).min(toc_lines.len());

    (start..=end)
        .map(|n| format!("{n}: {}", toc_lines[n - 1]))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_markdown_links_only() {
        let toc = "\
# Contents
- [Intro](intro.md) and [Setup](guide/setup.MD#install)
- [Site](https://example.com/page.md)
- [Image](diagram.png)
* [Encoded](my%20notes.md)
";
        let links = parse_toc_links(toc);
        let summary: Vec<(usize, &str, &str)> = links
            .iter()
            .map(|l| (l.line_no, l.label.as_str(), l.raw_target.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (2, "Intro", "intro.md"),
                (2, "Setup", "guide/setup.MD#install"),
                (5, "Encoded", "my%20notes.md"),
            ]
        );
        assert_eq!(links[0].describe(), "line 2: [Intro](intro.md)");
    }

    #[test]
    fn context_window_is_clamped() {
        let lines = vec!["a", "b", "c", "d", "e", "f"];
        assert_eq!(toc_context(&lines, 1), "1: a\n2: b\n3: c");
        assert_eq!(toc_context(&lines, 4), "2: b\n3: c\n4: d\n5: e\n6: f");
        assert_eq!(toc_context(&lines, 6), "4: d\n5: e\n6: f");
        assert_eq!(toc_context(&[], 3), "");
    }
}
