//! Navigation document listing every imported document in manifest order.

use std::collections::HashMap;

use tracing::{info, instrument, warn};

use docimport_shared::{CreatedDocRecord, ImportManifest, Result};
use docimport_writer::{DocApi, LogImageBlocks, WritePipeline};

use crate::title::{create_with_title_strategy, normalize_title};

/// Title used when the configured one normalizes to nothing.
pub const DEFAULT_NAV_TITLE: &str = "00-Navigation";

/// Markdown body of the navigation document; empty when nothing was created.
pub fn build_nav_markdown(manifest: &ImportManifest, created: &[CreatedDocRecord]) -> String {
    let by_path: HashMap<&str, &CreatedDocRecord> =
        created.iter().map(|record| (record.path.as_str(), record)).collect();

    let mut entries = Vec::new();
    for item in &manifest.items {
        let Some(record) = by_path.get(item.path.as_str()) else {
            continue;
        };
        let depth = item.relative_dir.split('/').filter(|s| !s.is_empty()).count();
        let indent = "  ".repeat(depth);
        let label = if item.toc_label.is_empty() { &record.title } else { &item.toc_label };

        entries.push(if record.doc_url.is_empty() {
            format!(
                "{indent}- {label} · `{}` (document_id: `{}`)",
                item.path, record.document_id
            )
        } else {
            format!("{indent}- [{label}]({}) · `{}`", record.doc_url, item.path)
        });
    }
    if entries.is_empty() {
        return String::new();
    }

    let mut lines = vec![
        "# Navigation".to_string(),
        String::new(),
        "> Generated by docimport. Lists every imported document in import order.".to_string(),
        String::new(),
    ];
    lines.extend(entries);
    lines.push(String::new());
    lines.join("\n")
}

/// Create and fill the navigation document in the root folder.
///
/// Returns the new document id, or `None` when there was nothing to list.
#[instrument(skip_all, fields(title = %title, documents = created.len()))]
pub async fn write_nav_doc(
    pipeline: &WritePipeline,
    api: &dyn DocApi,
    title: &str,
    folder_token: &str,
    manifest: &ImportManifest,
    created: &[CreatedDocRecord],
) -> Result<Option<String>> {
    let markdown = build_nav_markdown(manifest, created);
    if markdown.trim().is_empty() {
        warn!("no created documents, navigation doc skipped");
        return Ok(None);
    }

    let mut title = normalize_title(title);
    if title.is_empty() {
        title = DEFAULT_NAV_TITLE.to_string();
    }
    let folder = Some(folder_token).filter(|t| !t.is_empty());
    let (created_doc, title) = create_with_title_strategy(api, &[title], folder).await?;
    pipeline
        .write_markdown(&created_doc.document_id, &markdown, &LogImageBlocks)
        .await?;

    info!(document_id = %created_doc.document_id, title = %title, "navigation doc created");
    Ok(Some(created_doc.document_id))
}
