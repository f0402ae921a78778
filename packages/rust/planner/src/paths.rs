//! Source-relative path normalization.
//!
//! Every path entering the planner, and every TOC link target, goes through
//! [`normalize_relative_path`] so that lookups compare like with like.

use std::sync::LazyLock;

use regex::Regex;

static SCHEME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*:").expect("valid regex"));

/// Lowercase stems that mark a directory index document.
pub const INDEX_STEMS: [&str; 4] = ["readme", "index", "table_of_contents", "toc"];

/// Lowercase stems removed from the root when root filtering is enabled.
pub const ROOT_FILTER_STEMS: [&str; 2] = ["readme", "index"];

/// Normalize a raw path or link target into a clean relative path.
///
/// Returns `None` for empty input, URLs, the root itself, and anything that
/// escapes the root after collapsing `.` and `..`.
pub fn normalize_relative_path(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let decoded = String::from_utf8_lossy(&urlencoding::decode_binary(trimmed.as_bytes())).into_owned();
    if decoded.is_empty() || SCHEME_RE.is_match(&decoded) {
        return None;
    }

    let value = decoded.replace('\\', "/");
    let value = value.split('#').next().unwrap_or_default();
    let value = value.split('?').next().unwrap_or_default();
    if value.is_empty() {
        return None;
    }

    let normalized = normpath(value);
    if normalized.is_empty() || normalized == "." {
        return None;
    }

    let normalized = normalized.trim_start_matches('/');
    if normalized.is_empty() || normalized == ".." || normalized.starts_with("../") {
        return None;
    }
    Some(normalized.to_string())
}

/// Resolve a TOC link target relative to the TOC's own directory.
pub fn normalize_link_target(target: &str, toc_dir: &str) -> Option<String> {
    let normalized = normalize_relative_path(target)?;
    if toc_dir.is_empty() {
        return Some(normalized);
    }
    let joined = normpath(&format!("{toc_dir}/{normalized}"));
    let joined = joined.trim_start_matches('/');
    if joined.is_empty() || joined == "." || joined == ".." || joined.starts_with("../") {
        return None;
    }
    Some(joined.to_string())
}

/// Lexically collapse `.`, `..` and repeated slashes.
fn normpath(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if absolute => {}
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Parent directory of a normalized path, empty at the root.
pub fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(dir, _)| dir)
}

/// Final path segment.
pub fn basename(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, name)| name)
}

/// Lowercase file stem (basename without its last extension).
pub fn stem_lower(path: &str) -> String {
    let name = basename(path);
    let stem = match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    };
    stem.to_lowercase()
}

pub fn is_index_path(path: &str) -> bool {
    INDEX_STEMS.contains(&stem_lower(path).as_str())
}

/// Whether a normalized path is a root-level readme/index file.
pub fn is_root_filtered(path: &str) -> bool {
    !path.trim_matches('/').contains('/') && ROOT_FILTER_STEMS.contains(&stem_lower(path).as_str())
}
