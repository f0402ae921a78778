//! The import run: plan, resolve destinations, dispatch groups, summarize.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, instrument, warn};

use docimport_planner::{AmbiguityResolver, ManifestOptions, build_manifest};
use docimport_shared::{
    ImportError, ImportFailure, ImportManifest, ImportResult, Result, SourceAdapter, WorkerResult, WriteMode,
};
use docimport_writer::{DEFAULT_CONVERT_MAX_BYTES, DestinationResolver, DocApi, WritePipeline};

use crate::executor::{GroupDispatcher, group_payloads, run_grouped};
use crate::nav::{DEFAULT_NAV_TITLE, write_nav_doc};
use crate::protocol::{DocumentSnapshot, WorkerDestination, WorkerSettings};

/// How many unresolved links and failures the run summary prints.
const SUMMARY_LIMIT: usize = 20;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencySettings {
    /// Worker processes running at once.
    pub max_workers: usize,
    /// Accepted for compatibility; chunk writes stay sequential.
    pub chunk_workers: usize,
}

impl Default for ConcurrencySettings {
    fn default() -> Self {
        Self {
            max_workers: 4,
            chunk_workers: 1,
        }
    }
}

/// One import run.
#[derive(Debug, Clone)]
pub struct ImportRequest {
    /// Wiki space to find or create (wiki / both modes).
    pub space_name: String,
    /// Existing wiki space; takes precedence over `space_name`.
    pub space_id: String,
    pub write_mode: WriteMode,
    /// Mirror source directories as drive folders (folder / both modes).
    pub folder_subdirs: bool,
    /// Plan and count only; no remote calls.
    pub dry_run: bool,
    pub concurrency: ConcurrencySettings,
    pub ordering: ManifestOptions,
    pub folder_nav_doc: bool,
    pub folder_nav_title: String,
}

impl Default for ImportRequest {
    fn default() -> Self {
        Self {
            space_name: String::new(),
            space_id: String::new(),
            write_mode: WriteMode::Folder,
            folder_subdirs: false,
            dry_run: false,
            concurrency: ConcurrencySettings::default(),
            ordering: ManifestOptions::default(),
            folder_nav_doc: true,
            folder_nav_title: DEFAULT_NAV_TITLE.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for the CLI (or any other frontend).
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called once the manifest is built.
    fn planned(&self, manifest: &ImportManifest);
    /// Called when the run completes.
    fn done(&self, result: &ImportResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn planned(&self, _manifest: &ImportManifest) {}
    fn done(&self, _result: &ImportResult) {}
}

// ---------------------------------------------------------------------------
// Importer
// ---------------------------------------------------------------------------

/// Wires a source, the remote API, and a group dispatcher into import runs.
pub struct Importer {
    source: Arc<dyn SourceAdapter>,
    dispatcher: Arc<dyn GroupDispatcher>,
    api: Option<Arc<dyn DocApi>>,
    resolver: Option<Arc<dyn AmbiguityResolver>>,
    root_folder_token: String,
    convert_max_bytes: usize,
}

impl Importer {
    /// An importer that can plan and dry-run. Call [`Importer::with_api`]
    /// before real runs.
    pub fn new(source: Arc<dyn SourceAdapter>, dispatcher: Arc<dyn GroupDispatcher>) -> Self {
        Self {
            source,
            dispatcher,
            api: None,
            resolver: None,
            root_folder_token: String::new(),
            convert_max_bytes: DEFAULT_CONVERT_MAX_BYTES,
        }
    }

    pub fn with_api(mut self, api: Arc<dyn DocApi>, root_folder_token: impl Into<String>) -> Self {
        self.api = Some(api);
        self.root_folder_token = root_folder_token.into();
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn AmbiguityResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_convert_max_bytes(mut self, max_bytes: usize) -> Self {
        self.convert_max_bytes = max_bytes.max(1);
        self
    }

    /// List the source and build the manifest.
    pub async fn plan(&self, ordering: &ManifestOptions) -> Result<ImportManifest> {
        let paths = self.source.list_markdown()?;
        info!(discovered = paths.len(), "markdown files discovered");
        let manifest = build_manifest(&paths, ordering, self.source.as_ref(), self.resolver.as_deref()).await;
        log_plan(ordering, &manifest);
        Ok(manifest)
    }

    /// Run one import.
    ///
    /// Configuration problems fail before any remote write. Per-document and
    /// per-group failures are collected in the result. Returns
    /// [`ImportError::Interrupted`] when `cancel` flips during the run.
    #[instrument(skip_all, fields(write_mode = %request.write_mode, dry_run = request.dry_run))]
    pub async fn run(
        &self,
        request: &ImportRequest,
        progress: &dyn ProgressReporter,
        cancel: watch::Receiver<bool>,
    ) -> Result<ImportResult> {
        let api = if request.dry_run { None } else { Some(self.check_ready(request)?) };

        progress.phase("Planning");
        let manifest = self.plan(&request.ordering).await?;
        progress.planned(&manifest);
        let result = ImportResult::start(&manifest);

        let Some(api) = api else {
            let result = result.finish(WorkerResult {
                success_count: manifest.items.len(),
                ..Default::default()
            });
            info!(total = result.total, skipped = result.skipped, "dry run finished");
            progress.done(&result);
            return Ok(result);
        };

        progress.phase("Resolving destinations");
        let mut destinations = DestinationResolver::new(api.clone(), self.root_folder_token.clone());
        let space_id = if !request.write_mode.uses_wiki() {
            String::new()
        } else if !request.space_id.is_empty() {
            info!(space_id = %request.space_id, "reusing wiki space");
            request.space_id.clone()
        } else {
            destinations.get_or_create_space(&request.space_name).await?
        };
        let (snapshots, mut precompute_failures) =
            self.snapshot_documents(&manifest, request, &mut destinations, &space_id).await;

        progress.phase("Importing");
        let payloads = group_payloads(
            snapshots,
            &WorkerDestination {
                write_mode: request.write_mode,
                space_id,
            },
            &WorkerSettings {
                convert_max_bytes: self.convert_max_bytes,
                chunk_workers: request.concurrency.chunk_workers,
            },
        );
        let mut outcome = run_grouped(
            payloads,
            self.dispatcher.clone(),
            request.concurrency.max_workers,
            cancel,
        )
        .await?;
        precompute_failures.append(&mut outcome.failures);
        outcome.failures = precompute_failures;
        sort_by_manifest_order(&manifest, &mut outcome);

        if request.folder_nav_doc && request.write_mode.uses_folder() && !outcome.created_docs.is_empty() {
            progress.phase("Writing navigation");
            let pipeline = WritePipeline::new(api.clone(), self.convert_max_bytes);
            if let Err(e) = write_nav_doc(
                &pipeline,
                api.as_ref(),
                &request.folder_nav_title,
                &self.root_folder_token,
                &manifest,
                &outcome.created_docs,
            )
            .await
            {
                warn!(error = %e, "failed to create navigation doc");
            }
        }

        let result = result.finish(outcome);
        log_summary(&manifest, &result);
        progress.done(&result);
        Ok(result)
    }

    /// Fatal checks that must pass before anything is written.
    fn check_ready(&self, request: &ImportRequest) -> Result<Arc<dyn DocApi>> {
        let api = self.api.clone().ok_or_else(|| {
            ImportError::config("app credentials are required unless --dry-run: set FEISHU_APP_ID and FEISHU_APP_SECRET")
        })?;
        if request.write_mode.uses_wiki() && request.space_name.trim().is_empty() && request.space_id.trim().is_empty()
        {
            return Err(ImportError::config(
                "a space name or space id is required when the write mode is wiki or both",
            ));
        }
        if request.folder_subdirs && request.write_mode.uses_folder() && self.root_folder_token.is_empty() {
            return Err(ImportError::config(
                "FEISHU_FOLDER_TOKEN is required when using folder hierarchy mode",
            ));
        }
        if request.folder_subdirs && !request.write_mode.uses_folder() {
            warn!("folder_subdirs only applies when the write mode is folder or both");
        }
        Ok(api)
    }

    /// Read every planned document and resolve its folder and wiki parent.
    ///
    /// Documents that cannot be read or placed become failures here and are
    /// never dispatched.
    async fn snapshot_documents(
        &self,
        manifest: &ImportManifest,
        request: &ImportRequest,
        destinations: &mut DestinationResolver,
        space_id: &str,
    ) -> (Vec<DocumentSnapshot>, Vec<ImportFailure>) {
        let mut snapshots = Vec::with_capacity(manifest.items.len());
        let mut failures = Vec::new();

        for item in &manifest.items {
            let snapshot = async {
                let doc = self.source.read_markdown(&item.path)?;
                let folder_token = if request.folder_subdirs && request.write_mode.uses_folder() {
                    destinations.ensure_folder_path(&item.relative_dir).await?
                } else {
                    self.root_folder_token.clone()
                };
                let wiki_parent_token = if request.write_mode.uses_wiki() {
                    destinations.ensure_wiki_path(space_id, &item.relative_dir).await?
                } else {
                    String::new()
                };
                Ok::<_, ImportError>(DocumentSnapshot {
                    path: item.path.clone(),
                    order: item.order,
                    title: doc.title,
                    markdown: doc.markdown,
                    relative_dir: item.relative_dir.clone(),
                    is_index: item.is_index,
                    toc_label: item.toc_label.clone(),
                    folder_token,
                    wiki_parent_token,
                })
            }
            .await;

            match snapshot {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => {
                    warn!(path = %item.path, error = %e, "document could not be prepared");
                    failures.push(ImportFailure::new(&item.path, e.to_string()));
                }
            }
        }
        (snapshots, failures)
    }
}

/// Groups finish in any order; report created docs in import order.
fn sort_by_manifest_order(manifest: &ImportManifest, outcome: &mut WorkerResult) {
    let order: HashMap<&str, usize> = manifest
        .items
        .iter()
        .map(|item| (item.path.as_str(), item.order))
        .collect();
    outcome
        .created_docs
        .sort_by_key(|record| order.get(record.path.as_str()).copied().unwrap_or(usize::MAX));
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

fn log_plan(ordering: &ManifestOptions, manifest: &ImportManifest) {
    info!(
        strategy = %ordering.strategy,
        items = manifest.items.len(),
        skipped = manifest.skipped_items.len(),
        toc_links = manifest.toc_links,
        matched = manifest.matched_links,
        ambiguous = manifest.ambiguous_links,
        llm_used = manifest.llm_used,
        llm_calls = manifest.llm_calls,
        fallback = manifest.fallback_count,
        "manifest built"
    );
    if !manifest.unresolved_links.is_empty() {
        warn!(count = manifest.unresolved_links.len(), "unresolved toc links");
        for line in manifest.unresolved_links.iter().take(SUMMARY_LIMIT) {
            warn!("toc unresolved: {line}");
        }
    }
}

fn log_summary(manifest: &ImportManifest, result: &ImportResult) {
    info!(
        run_id = %result.run_id,
        total = result.total,
        success = result.success,
        failed = result.failed,
        skipped = result.skipped,
        toc_links = manifest.toc_links,
        matched = manifest.matched_links,
        ambiguous = manifest.ambiguous_links,
        llm_calls = manifest.llm_calls,
        fallback = manifest.fallback_count,
        "import finished"
    );
    for failure in result.failures.iter().take(SUMMARY_LIMIT) {
        let reason: String = failure.reason.chars().take(120).collect();
        warn!(path = %failure.path, "failed: {reason}");
    }
}
