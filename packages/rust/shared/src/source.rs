//! The seam between the importer and wherever markdown files come from.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One markdown file read from a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDocument {
    /// Source-relative path, `/`-separated.
    pub path: String,
    /// Title derived from the content or the file name.
    pub title: String,
    pub markdown: String,
    /// Parent directory of `path`, empty at the root.
    pub relative_dir: String,
    /// Base used to resolve relative asset references (a directory or URL).
    pub base_ref: String,
}

/// A tree of markdown files.
///
/// Implementations must return stable relative paths and tolerate repeated
/// calls; the planner reads the TOC through the same adapter the workers'
/// snapshots are built from.
pub trait SourceAdapter: Send + Sync {
    /// All markdown paths, relative to the source root.
    fn list_markdown(&self) -> Result<Vec<String>>;

    /// Read one markdown file by its relative path.
    fn read_markdown(&self, relative_path: &str) -> Result<SourceDocument>;
}
