//! Document titles: candidate selection and creation with fallback.

use tracing::{debug, warn};

use docimport_planner::paths::{ROOT_FILTER_STEMS, basename, stem_lower};
use docimport_shared::{ImportError, Result};
use docimport_writer::{CreatedDocument, DocApi, normalize_name};

/// Byte cap for a document title.
pub const TITLE_MAX_BYTES: usize = 180;

pub const UNTITLED: &str = "Untitled";

/// Title cleaned of characters the platform rejects and capped at
/// [`TITLE_MAX_BYTES`]. May be empty.
pub fn normalize_title(raw: &str) -> String {
    normalize_name(raw, TITLE_MAX_BYTES)
}

/// Ordered, deduplicated title candidates for one document.
///
/// Directory index files try their directory name first, then every document
/// tries its own title and a title built from its path.
pub fn title_candidates(path: &str, title: &str, relative_dir: &str) -> Vec<String> {
    let mut raw = Vec::with_capacity(3);
    if ROOT_FILTER_STEMS.contains(&stem_lower(path).as_str()) {
        if let Some(dir_name) = relative_dir.trim_matches('/').rsplit('/').next() {
            raw.push(dir_name.to_string());
        }
    }
    raw.push(title.to_string());
    raw.push(path_title(path));

    let mut candidates: Vec<String> = Vec::new();
    for title in raw.iter().map(|t| normalize_title(t)) {
        if !title.is_empty() && !candidates.contains(&title) {
            candidates.push(title);
        }
    }
    if candidates.is_empty() {
        candidates.push(UNTITLED.to_string());
    }
    candidates
}

/// `guide/setup/install.md` becomes `guide - setup - install`; a trailing
/// readme or index segment is dropped when it has a parent.
pub fn path_title(path: &str) -> String {
    let normalized = path.trim().replace('\\', "/");
    let without_ext = if normalized.to_ascii_lowercase().ends_with(".md") {
        &normalized[..normalized.len() - 3]
    } else {
        normalized.as_str()
    };

    let mut segments: Vec<&str> = without_ext.split('/').filter(|s| !s.is_empty()).collect();
    if segments
        .last()
        .is_some_and(|last| ROOT_FILTER_STEMS.contains(&last.to_ascii_lowercase().as_str()))
    {
        segments.pop();
    }

    if segments.is_empty() {
        return file_stem(path);
    }
    segments.join(" - ")
}

fn file_stem(path: &str) -> String {
    let name = basename(path);
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => name.to_string(),
    }
}

/// Create a document, walking the title candidates.
///
/// Moves to the next candidate only when the platform rejects the title as
/// an invalid parameter; any other error is returned at once.
pub async fn create_with_title_strategy(
    api: &dyn DocApi,
    candidates: &[String],
    folder_token: Option<&str>,
) -> Result<(CreatedDocument, String)> {
    let mut last_err = None;
    for (idx, title) in candidates.iter().enumerate() {
        match api.create_document(title, folder_token).await {
            Ok(created) => {
                debug!(title = %title, document_id = %created.document_id, "document created");
                return Ok((created, title.clone()));
            }
            Err(e) if e.is_invalid_param() && idx + 1 < candidates.len() => {
                warn!(title = %title, error = %e, "title rejected, trying next candidate");
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| ImportError::validation("no title candidates")))
}
