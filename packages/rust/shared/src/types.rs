//! Core domain types for docimport runs: plan items, manifests, and results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ImportError;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one import run (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Run options
// ---------------------------------------------------------------------------

/// Where imported documents end up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Drive folder only.
    #[default]
    Folder,
    /// Moved into a wiki space.
    Wiki,
    /// Created in a folder, then moved into the wiki.
    Both,
}

impl WriteMode {
    pub fn uses_folder(self) -> bool {
        matches!(self, Self::Folder | Self::Both)
    }

    pub fn uses_wiki(self) -> bool {
        matches!(self, Self::Wiki | Self::Both)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Folder => "folder",
            Self::Wiki => "wiki",
            Self::Both => "both",
        }
    }
}

/// How the manifest orders documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureOrder {
    /// Follow the table-of-contents file, then append the rest by path.
    #[default]
    TocFirst,
    /// Plain lexicographic path order.
    Path,
}

impl StructureOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TocFirst => "toc_first",
            Self::Path => "path",
        }
    }
}

/// Whether ambiguous TOC links may be escalated to the external resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmFallbackMode {
    Off,
    #[default]
    TocAmbiguity,
}

impl LlmFallbackMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::TocAmbiguity => "toc_ambiguity",
        }
    }
}

macro_rules! str_enum {
    ($ty:ty, $what:literal, [$($name:literal => $variant:expr),+ $(,)?]) => {
        impl std::str::FromStr for $ty {
            type Err = ImportError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($name => Ok($variant),)+
                    other => Err(ImportError::config(format!(
                        concat!("invalid ", $what, " '{}': expected one of {}"),
                        other,
                        [$($name),+].join(", ")
                    ))),
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(WriteMode, "write mode", [
    "folder" => WriteMode::Folder,
    "wiki" => WriteMode::Wiki,
    "both" => WriteMode::Both,
]);
str_enum!(StructureOrder, "structure order", [
    "toc_first" => StructureOrder::TocFirst,
    "path" => StructureOrder::Path,
]);
str_enum!(LlmFallbackMode, "llm fallback mode", [
    "off" => LlmFallbackMode::Off,
    "toc_ambiguity" => LlmFallbackMode::TocAmbiguity,
]);

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// One document selected for import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentPlanItem {
    /// Normalized source-relative path (`/`-separated).
    pub path: String,
    /// Position in the global import order. Unique per manifest.
    pub order: usize,
    /// Whether the file is a directory index (`readme`, `index`, `toc`, ...).
    pub is_index: bool,
    /// Parent directory, empty for root-level files.
    pub relative_dir: String,
    /// Label of the TOC link that placed this item, empty otherwise.
    pub toc_label: String,
}

/// A path excluded from import, with the reason it was excluded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedItem {
    pub path: String,
    pub reason: String,
}

impl SkippedItem {
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Ordered import plan plus planning diagnostics. Read-only once built.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportManifest {
    pub items: Vec<DocumentPlanItem>,
    /// Human-readable lines for TOC links that did not resolve to one file.
    pub unresolved_links: Vec<String>,
    /// Markdown links found in the TOC.
    pub toc_links: usize,
    /// Links resolved to exactly one file (directly or via the resolver).
    pub matched_links: usize,
    /// Links that had more than one candidate.
    pub ambiguous_links: usize,
    pub llm_used: bool,
    pub llm_calls: usize,
    /// Number of unresolved lines.
    pub fallback_count: usize,
    pub skipped_items: Vec<SkippedItem>,
    /// TOC links that pointed at a root-filtered file.
    pub filtered_toc_links: Vec<String>,
}

impl ImportManifest {
    /// Paths in import order.
    pub fn paths(&self) -> Vec<&str> {
        self.items.iter().map(|item| item.path.as_str()).collect()
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// A document (or group) that failed to import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportFailure {
    /// Source path, or `group:<key>` for a whole-group failure.
    pub path: String,
    pub reason: String,
}

impl ImportFailure {
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// A document successfully created on the remote platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedDocRecord {
    pub path: String,
    pub title: String,
    pub document_id: String,
    #[serde(default)]
    pub doc_url: String,
    #[serde(default)]
    pub wiki_node_token: String,
}

/// Outcome of one directory group, produced by a worker process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerResult {
    pub success_count: usize,
    pub failures: Vec<ImportFailure>,
    pub created_docs: Vec<CreatedDocRecord>,
}

impl WorkerResult {
    /// Fold another group's result into this one.
    pub fn merge(&mut self, other: WorkerResult) {
        self.success_count += other.success_count;
        self.failures.extend(other.failures);
        self.created_docs.extend(other.created_docs);
    }
}

/// Final summary of an import run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportResult {
    pub run_id: RunId,
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub failures: Vec<ImportFailure>,
    pub skipped_items: Vec<SkippedItem>,
    pub created_docs: Vec<CreatedDocRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ImportResult {
    /// Start a result for a manifest; counts are filled in as groups finish.
    pub fn start(manifest: &ImportManifest) -> Self {
        let now = Utc::now();
        Self {
            run_id: RunId::new(),
            total: manifest.items.len(),
            success: 0,
            failed: 0,
            skipped: manifest.skipped_items.len(),
            failures: Vec::new(),
            skipped_items: manifest.skipped_items.clone(),
            created_docs: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    /// Absorb aggregated worker output and stamp the finish time.
    pub fn finish(mut self, outcome: WorkerResult) -> Self {
        self.success += outcome.success_count;
        self.failures.extend(outcome.failures);
        self.failed = self.failures.len();
        self.created_docs.extend(outcome.created_docs);
        self.finished_at = Utc::now();
        self
    }
}
