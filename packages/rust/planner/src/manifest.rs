//! Manifest construction: normalize, filter, order by TOC, resolve ambiguity.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use tracing::{debug, info, instrument, warn};

use docimport_shared::{
    DocumentPlanItem, ImportManifest, LlmFallbackMode, SkippedItem, SourceAdapter, StructureOrder,
};

use crate::paths::{
    basename, is_index_path, is_root_filtered, normalize_link_target, normalize_relative_path,
    parent_dir,
};
use crate::resolver::{AmbiguityResolver, MAX_CANDIDATES};
use crate::toc::{TocLinkRef, parse_toc_links, toc_context};

/// Reason recorded for root readme/index files removed by the filter.
pub const ROOT_README_FILTERED: &str = "root_readme_filtered";

/// Ordering and fallback knobs for [`build_manifest`].
#[derive(Debug, Clone)]
pub struct ManifestOptions {
    pub strategy: StructureOrder,
    /// TOC path relative to the source root.
    pub toc_file: String,
    pub llm_fallback: LlmFallbackMode,
    /// Resolver call budget for the whole run.
    pub llm_max_calls: usize,
    /// Minimum resolver confidence to accept a pick.
    pub confidence_threshold: f64,
    /// Move root-level readme/index files into `skipped_items`.
    pub skip_root_readme: bool,
}

impl Default for ManifestOptions {
    fn default() -> Self {
        Self {
            strategy: StructureOrder::TocFirst,
            toc_file: "TABLE_OF_CONTENTS.md".into(),
            llm_fallback: LlmFallbackMode::TocAmbiguity,
            llm_max_calls: 3,
            confidence_threshold: 0.6,
            skip_root_readme: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Build the ordered import manifest for a set of source paths.
///
/// Never fails: an unreadable or link-free TOC downgrades to path order and
/// unresolvable links become diagnostics.
#[instrument(skip_all, fields(paths = paths.len(), strategy = %options.strategy))]
pub async fn build_manifest(
    paths: &[String],
    options: &ManifestOptions,
    source: &dyn SourceAdapter,
    resolver: Option<&dyn AmbiguityResolver>,
) -> ImportManifest {
    let normalized: BTreeSet<String> = paths
        .iter()
        .filter_map(|p| normalize_relative_path(p))
        .collect();

    let mut skipped_items = Vec::new();
    let mut filtered_root = Vec::new();
    let mut effective = Vec::new();
    for path in normalized {
        if options.skip_root_readme && is_root_filtered(&path) {
            skipped_items.push(SkippedItem::new(&path, ROOT_README_FILTERED));
            filtered_root.push(path);
        } else {
            effective.push(path);
        }
    }

    if effective.is_empty() || options.strategy == StructureOrder::Path {
        return build_path_manifest(effective, skipped_items);
    }

    let Some((toc_path, toc_content)) = load_toc(&effective, &options.toc_file, source) else {
        return build_path_manifest(effective, skipped_items);
    };

    let links = parse_toc_links(&toc_content);
    if links.is_empty() {
        info!(toc = %toc_path, "TOC has no markdown links, using path order");
        return build_path_manifest(effective, skipped_items);
    }

    let planner = TocPlanner {
        lookup: PathLookup::new(&effective),
        filtered_root: filtered_root.iter().map(|p| (p.to_lowercase(), p.clone())).collect(),
        toc_dir: parent_dir(&toc_path).to_string(),
        toc_lines: toc_content.lines().collect(),
        options,
    };
    let mut manifest = planner.plan(&links, &effective, resolver).await;
    manifest.skipped_items = skipped_items;

    info!(
        toc_links = manifest.toc_links,
        matched = manifest.matched_links,
        ambiguous = manifest.ambiguous_links,
        llm_calls = manifest.llm_calls,
        fallback = manifest.fallback_count,
        "manifest built from TOC"
    );
    manifest
}

/// Plain lexicographic manifest, no TOC involved.
pub fn build_path_manifest(mut paths: Vec<String>, skipped_items: Vec<SkippedItem>) -> ImportManifest {
    paths.sort();
    paths.dedup();
    let labels = HashMap::new();
    ImportManifest {
        items: plan_items(paths, &labels),
        skipped_items,
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// TOC-driven planning
// ---------------------------------------------------------------------------

/// Case-insensitive exact and basename indexes over the effective paths.
struct PathLookup {
    exact: HashMap<String, Vec<String>>,
    by_basename: HashMap<String, Vec<String>>,
}

impl PathLookup {
    fn new(paths: &[String]) -> Self {
        let mut exact: HashMap<String, Vec<String>> = HashMap::new();
        let mut by_basename: HashMap<String, Vec<String>> = HashMap::new();
        for path in paths {
            exact.entry(path.to_lowercase()).or_default().push(path.clone());
            by_basename
                .entry(basename(path).to_lowercase())
                .or_default()
                .push(path.clone());
        }
        Self { exact, by_basename }
    }

    /// Sorted, deduplicated candidates for a normalized target.
    fn candidates(&self, target: &str) -> Vec<String> {
        let key = target.to_lowercase();
        if let Some(hits) = self.exact.get(&key) {
            return sorted_unique(hits.iter());
        }

        let Some(hits) = self.by_basename.get(basename(&key)) else {
            return Vec::new();
        };
        if key.contains('/') {
            let narrowed: Vec<&String> = hits.iter().filter(|p| p.to_lowercase().ends_with(&key)).collect();
            if !narrowed.is_empty() {
                return sorted_unique(narrowed.into_iter());
            }
        }
        sorted_unique(hits.iter())
    }
}

fn sorted_unique<'a>(paths: impl Iterator<Item = &'a String>) -> Vec<String> {
    paths.cloned().collect::<BTreeSet<_>>().into_iter().collect()
}

struct TocPlanner<'a> {
    lookup: PathLookup,
    /// Lowercase path -> original, for root files the filter removed.
    filtered_root: BTreeMap<String, String>,
    toc_dir: String,
    toc_lines: Vec<&'a str>,
    options: &'a ManifestOptions,
}

/// Ordered result being accumulated while walking the TOC.
#[derive(Default)]
struct Placement {
    ordered: Vec<String>,
    seen: HashSet<String>,
    labels: HashMap<String, String>,
}

impl Placement {
    fn place(&mut self, path: &str, label: &str) {
        if self.seen.insert(path.to_string()) {
            self.ordered.push(path.to_string());
            self.labels.insert(path.to_string(), label.to_string());
        }
    }
}

impl TocPlanner<'_> {
    async fn plan(
        &self,
        links: &[TocLinkRef],
        effective: &[String],
        resolver: Option<&dyn AmbiguityResolver>,
    ) -> ImportManifest {
        let mut manifest = ImportManifest {
            toc_links: links.len(),
            ..Default::default()
        };
        let mut placement = Placement::default();
        let mut ambiguous: Vec<(&TocLinkRef, Vec<String>)> = Vec::new();

        for link in links {
            let target = normalize_link_target(&link.raw_target, &self.toc_dir);
            if let Some(filtered) = target.as_ref().and_then(|t| self.filtered_root.get(&t.to_lowercase())) {
                manifest
                    .filtered_toc_links
                    .push(format!("{} -> {ROOT_README_FILTERED} path = {filtered}", link.describe()));
                continue;
            }

            let candidates = target.map(|t| self.lookup.candidates(&t)).unwrap_or_default();
            match candidates.len() {
                0 => manifest
                    .unresolved_links
                    .push(format!("{} -> no_match", link.describe())),
                1 => {
                    manifest.matched_links += 1;
                    placement.place(&candidates[0], &link.label);
                }
                _ => {
                    manifest.ambiguous_links += 1;
                    ambiguous.push((link, candidates));
                }
            }
        }

        self.resolve_ambiguous(&ambiguous, resolver, &mut manifest, &mut placement)
            .await;

        for path in effective {
            placement.place(path, "");
        }

        manifest.fallback_count = manifest.unresolved_links.len();
        manifest.items = plan_items(placement.ordered, &placement.labels);
        manifest
    }

    async fn resolve_ambiguous(
        &self,
        ambiguous: &[(&TocLinkRef, Vec<String>)],
        resolver: Option<&dyn AmbiguityResolver>,
        manifest: &mut ImportManifest,
        placement: &mut Placement,
    ) {
        let resolver = match resolver {
            Some(r) if self.options.llm_fallback == LlmFallbackMode::TocAmbiguity && self.options.llm_max_calls > 0 => r,
            _ => {
                for (link, candidates) in ambiguous {
                    manifest.unresolved_links.push(format!(
                        "{} -> ambiguous candidates = {}",
                        link.describe(),
                        candidates.join(", ")
                    ));
                }
                return;
            }
        };

        for (link, candidates) in ambiguous {
            if manifest.llm_calls >= self.options.llm_max_calls {
                manifest.unresolved_links.push(format!(
                    "{} -> llm_limit_exceeded candidates = {}",
                    link.describe(),
                    candidates.join(", ")
                ));
                continue;
            }

            manifest.llm_used = true;
            manifest.llm_calls += 1;
            let context = toc_context(&self.toc_lines, link.line_no);
            let shown = &candidates[..candidates.len().min(MAX_CANDIDATES)];

            let accepted = match resolver.resolve(&link.label, &link.raw_target, shown, &context).await {
                Ok(resolution) => {
                    debug!(
                        target = %link.raw_target,
                        selected = %resolution.selected_path,
                        confidence = resolution.confidence,
                        reason = %resolution.reason,
                        "resolver answered"
                    );
                    normalize_relative_path(&resolution.selected_path).filter(|selected| {
                        candidates.contains(selected)
                            && resolution.confidence >= self.options.confidence_threshold
                    })
                }
                Err(e) => {
                    warn!(target = %link.raw_target, error = %e, "resolver call failed");
                    None
                }
            };

            match accepted {
                Some(selected) => {
                    manifest.matched_links += 1;
                    placement.place(&selected, &link.label);
                }
                None => manifest.unresolved_links.push(format!(
                    "{} -> llm_unresolved candidates = {}",
                    link.describe(),
                    candidates.join(", ")
                )),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Find and read the TOC. `None` means "use path order".
fn load_toc(effective: &[String], toc_file: &str, source: &dyn SourceAdapter) -> Option<(String, String)> {
    let wanted = normalize_relative_path(toc_file)?.to_lowercase();
    let toc_path = effective.iter().find(|p| p.to_lowercase() == wanted)?;

    match source.read_markdown(toc_path) {
        Ok(doc) => Some((toc_path.clone(), doc.markdown)),
        Err(e) => {
            warn!(toc = %toc_path, error = %e, "failed to read TOC file, using path order");
            None
        }
    }
}

fn plan_items(paths: Vec<String>, labels: &HashMap<String, String>) -> Vec<DocumentPlanItem> {
    paths
        .into_iter()
        .enumerate()
        .map(|(order, path)| DocumentPlanItem {
            order,
            is_index: is_index_path(&path),
            relative_dir: parent_dir(&path).to_string(),
            toc_label: labels.get(&path).cloned().unwrap_or_default(),
            path,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use docimport_shared::{ImportError, Result, SourceDocument};

    use super::*;
    use crate::resolver::LlmResolution;

    /// In-memory source keyed by relative path.
    struct MemSource(HashMap<String, String>);

    impl MemSource {
        fn new(files: &[(&str, &str)]) -> Self {
            Self(files.iter().map(|(p, c)| (p.to_string(), c.to_string())).collect())
        }
    }

    impl SourceAdapter for MemSource {
        fn list_markdown(&self) -> Result<Vec<String>> {
            Ok(self.0.keys().cloned().collect())
        }

        fn read_markdown(&self, relative_path: &str) -> Result<SourceDocument> {
            let markdown = self
                .0
                .get(relative_path)
                .cloned()
                .ok_or_else(|| ImportError::validation(format!("missing {relative_path}")))?;
            Ok(SourceDocument {
                path: relative_path.into(),
                title: relative_path.into(),
                markdown,
                relative_dir: parent_dir(relative_path).into(),
                base_ref: String::new(),
            })
        }
    }

    /// Resolver that always picks the candidate ending with `prefer`.
    struct PickingResolver {
        prefer: &'static str,
        confidence: f64,
        calls: AtomicUsize,
        contexts: Mutex<Vec<String>>,
    }

    impl PickingResolver {
        fn new(prefer: &'static str, confidence: f64) -> Self {
            Self {
                prefer,
                confidence,
                calls: AtomicUsize::new(0),
                contexts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AmbiguityResolver for PickingResolver {
        async fn resolve(
            &self,
            _link_text: &str,
            _raw_target: &str,
            candidates: &[String],
            context: &str,
        ) -> Result<LlmResolution> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.contexts.lock().unwrap().push(context.to_string());
            let selected_path = candidates
                .iter()
                .find(|c| c.starts_with(self.prefer))
                .cloned()
                .unwrap_or_default();
            Ok(LlmResolution {
                selected_path,
                confidence: self.confidence,
                reason: "test".into(),
            })
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn toc_options() -> ManifestOptions {
        ManifestOptions::default()
    }

    #[tokio::test]
    async fn path_strategy_sorts_lexicographically() {
        let source = MemSource::new(&[]);
        let options = ManifestOptions {
            strategy: StructureOrder::Path,
            ..Default::default()
        };
        let manifest = build_manifest(&strings(&["b/ch2.md", "a/ch1.md"]), &options, &source, None).await;

        assert_eq!(manifest.paths(), vec!["a/ch1.md", "b/ch2.md"]);
        assert_eq!(manifest.items[0].order, 0);
        assert_eq!(manifest.items[1].relative_dir, "b");
    }

    #[tokio::test]
    async fn missing_toc_falls_back_to_path_order() {
        let source = MemSource::new(&[]);
        let input = strings(&["z.md", "./m/b.md", "m/a.md", "m/a.md"]);
        let manifest = build_manifest(&input, &toc_options(), &source, None).await;

        assert_eq!(manifest.paths(), vec!["m/a.md", "m/b.md", "z.md"]);
        assert_eq!(manifest.toc_links, 0);
    }

    #[tokio::test]
    async fn unreadable_toc_falls_back_to_path_order() {
        // Listed but not readable through the source.
        let source = MemSource::new(&[]);
        let input = strings(&["TABLE_OF_CONTENTS.md", "b.md", "a.md"]);
        let manifest = build_manifest(&input, &toc_options(), &source, None).await;
        assert_eq!(manifest.paths(), vec!["TABLE_OF_CONTENTS.md", "a.md", "b.md"]);
    }

    #[tokio::test]
    async fn toc_without_links_falls_back_to_path_order() {
        let source = MemSource::new(&[("TABLE_OF_CONTENTS.md", "# Contents\nnothing linked")]);
        let input = strings(&["TABLE_OF_CONTENTS.md", "b.md", "a.md"]);
        let manifest = build_manifest(&input, &toc_options(), &source, None).await;
        assert_eq!(manifest.paths(), vec!["TABLE_OF_CONTENTS.md", "a.md", "b.md"]);
    }

    #[tokio::test]
    async fn toc_order_wins_over_path_order() {
        let source = MemSource::new(&[(
            "TABLE_OF_CONTENTS.md",
            "- [Second](b/ch2.md)\n- [First](a/ch1.md)\n",
        )]);
        let input = strings(&["a/ch1.md", "b/ch2.md", "TABLE_OF_CONTENTS.md", "c.md"]);
        let manifest = build_manifest(&input, &toc_options(), &source, None).await;

        assert_eq!(
            manifest.paths(),
            vec!["b/ch2.md", "a/ch1.md", "TABLE_OF_CONTENTS.md", "c.md"]
        );
        assert_eq!(manifest.items[0].toc_label, "Second");
        assert_eq!(manifest.items[2].toc_label, "");
        assert!(manifest.items[2].is_index);
        assert_eq!(manifest.matched_links, 2);
        assert_eq!(manifest.fallback_count, 0);
    }

    #[tokio::test]
    async fn toc_links_resolve_relative_to_toc_dir_and_by_basename() {
        let source = MemSource::new(&[(
            "docs/toc.md",
            "[Deep](guide/Setup.md)\n[Loose](faq.md)\n[Gone](missing.md)\n[Dup](intro.md)\n[Again](guide/setup.md)",
        )]);
        let input = strings(&["docs/guide/setup.md", "other/faq.md", "docs/intro.md", "docs/toc.md"]);
        let options = ManifestOptions {
            toc_file: "docs/toc.md".into(),
            ..Default::default()
        };
        let manifest = build_manifest(&input, &options, &source, None).await;

        assert_eq!(
            manifest.paths(),
            vec!["docs/guide/setup.md", "other/faq.md", "docs/intro.md", "docs/toc.md"]
        );
        assert_eq!(manifest.matched_links, 4);
        assert_eq!(
            manifest.unresolved_links,
            vec!["line 3: [Gone](missing.md) -> no_match".to_string()]
        );
        // Repeated links keep the first label.
        assert_eq!(manifest.items[0].toc_label, "Deep");
    }

    #[tokio::test]
    async fn suffix_narrows_basename_matches() {
        let source = MemSource::new(&[("TABLE_OF_CONTENTS.md", "[Api](v2/api.md)")]);
        let input = strings(&["TABLE_OF_CONTENTS.md", "x/v1/api.md", "x/v2/api.md"]);
        let manifest = build_manifest(&input, &toc_options(), &source, None).await;
        assert_eq!(manifest.items[0].path, "x/v2/api.md");
        assert_eq!(manifest.ambiguous_links, 0);
    }

    #[tokio::test]
    async fn ambiguity_without_fallback_is_recorded() {
        let source = MemSource::new(&[("TABLE_OF_CONTENTS.md", "[Setup](setup.md)")]);
        let input = strings(&["TABLE_OF_CONTENTS.md", "ops/setup.md", "guide/setup.md"]);
        let options = ManifestOptions {
            llm_fallback: LlmFallbackMode::Off,
            ..Default::default()
        };
        let resolver = PickingResolver::new("guide", 0.9);
        let manifest = build_manifest(&input, &options, &source, Some(&resolver)).await;

        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
        assert_eq!(manifest.ambiguous_links, 1);
        assert_eq!(
            manifest.unresolved_links,
            vec!["line 1: [Setup](setup.md) -> ambiguous candidates = guide/setup.md, ops/setup.md".to_string()]
        );
        assert!(!manifest.llm_used);
    }

    #[tokio::test]
    async fn resolver_pick_is_placed_with_label_and_context() {
        let toc = "# Contents\n\n- [Intro](intro.md)\n- [Setup](setup.md)\n- [End](end.md)\n";
        let source = MemSource::new(&[("TABLE_OF_CONTENTS.md", toc)]);
        let input = strings(&["TABLE_OF_CONTENTS.md", "intro.md", "end.md", "ops/setup.md", "guide/setup.md"]);
        let resolver = PickingResolver::new("guide", 0.75);
        let manifest = build_manifest(&input, &toc_options(), &source, Some(&resolver)).await;

        assert_eq!(&manifest.paths()[..3], &["intro.md", "guide/setup.md", "end.md"]);
        assert_eq!(manifest.items[1].toc_label, "Setup");
        assert!(manifest.llm_used);
        assert_eq!(manifest.llm_calls, 1);
        assert_eq!(manifest.matched_links, 3);
        assert_eq!(
            resolver.contexts.lock().unwrap()[0],
            "2: \n3: - [Intro](intro.md)\n4: - [Setup](setup.md)\n5: - [End](end.md)"
        );
    }

    #[tokio::test]
    async fn low_confidence_and_foreign_picks_are_rejected() {
        let source = MemSource::new(&[("TABLE_OF_CONTENTS.md", "[A](x.md)\n[B](y.md)")]);
        let input = strings(&["TABLE_OF_CONTENTS.md", "p/x.md", "q/x.md", "p/y.md", "q/y.md"]);

        let timid = PickingResolver::new("p", 0.59);
        let manifest = build_manifest(&input, &toc_options(), &source, Some(&timid)).await;
        assert_eq!(manifest.llm_calls, 2);
        assert!(manifest.unresolved_links.iter().all(|l| l.contains("-> llm_unresolved candidates = p/")));

        let lost = PickingResolver::new("elsewhere", 1.0);
        let manifest = build_manifest(&input, &toc_options(), &source, Some(&lost)).await;
        assert_eq!(manifest.fallback_count, 2);
        assert_eq!(manifest.matched_links, 0);
    }

    #[tokio::test]
    async fn call_cap_limits_resolver_calls() {
        let source = MemSource::new(&[("TABLE_OF_CONTENTS.md", "[A](x.md)\n[B](y.md)")]);
        let input = strings(&["TABLE_OF_CONTENTS.md", "p/x.md", "q/x.md", "p/y.md", "q/y.md"]);
        let options = ManifestOptions {
            llm_max_calls: 1,
            ..Default::default()
        };
        let resolver = PickingResolver::new("p", 0.9);
        let manifest = build_manifest(&input, &options, &source, Some(&resolver)).await;

        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
        assert_eq!(manifest.llm_calls, 1);
        assert_eq!(manifest.items[0].path, "p/x.md");
        assert_eq!(
            manifest.unresolved_links,
            vec!["line 2: [B](y.md) -> llm_limit_exceeded candidates = p/y.md, q/y.md".to_string()]
        );
    }

    #[tokio::test]
    async fn root_readme_filter_skips_only_top_level() {
        let source = MemSource::new(&[("TABLE_OF_CONTENTS.md", "[Home](README.md)\n[Sub](sub/README.md)")]);
        let input = strings(&["README.md", "sub/README.md", "TABLE_OF_CONTENTS.md", "a.md"]);
        let options = ManifestOptions {
            skip_root_readme: true,
            ..Default::default()
        };
        let manifest = build_manifest(&input, &options, &source, None).await;

        assert_eq!(manifest.skipped_items, vec![SkippedItem::new("README.md", ROOT_README_FILTERED)]);
        assert_eq!(manifest.paths(), vec!["sub/README.md", "TABLE_OF_CONTENTS.md", "a.md"]);
        assert_eq!(manifest.filtered_toc_links.len(), 1);
        assert!(manifest.filtered_toc_links[0].starts_with("line 1: [Home](README.md)"));
        assert!(manifest.unresolved_links.is_empty());
    }

    #[tokio::test]
    async fn every_input_path_appears_exactly_once() {
        let toc = "[A](a.md)\n[A again](./a.md)\n[Amb](dup.md)\n[Nope](nope.md)\n[Readme](readme.md)";
        let source = MemSource::new(&[("TABLE_OF_CONTENTS.md", toc)]);
        let input = strings(&[
            "a.md", "readme.md", "x/dup.md", "y/dup.md", "z/deep/file.md", "TABLE_OF_CONTENTS.md",
            "x/../a.md", "../escape.md", "https://example.com/r.md",
        ]);

        for skip_root_readme in [false, true] {
            for strategy in [StructureOrder::TocFirst, StructureOrder::Path] {
                let options = ManifestOptions {
                    strategy,
                    skip_root_readme,
                    llm_max_calls: 1,
                    ..Default::default()
                };
                let resolver = PickingResolver::new("y", 0.9);
                let manifest = build_manifest(&input, &options, &source, Some(&resolver)).await;

                let mut seen: Vec<String> = manifest.items.iter().map(|i| i.path.clone()).collect();
                seen.extend(manifest.skipped_items.iter().map(|s| s.path.clone()));
                seen.sort();
                let expected = strings(&[
                    "TABLE_OF_CONTENTS.md", "a.md", "readme.md", "x/dup.md", "y/dup.md", "z/deep/file.md",
                ]);
                assert_eq!(seen, expected, "strategy {strategy} skip {skip_root_readme}");

                let orders: Vec<usize> = manifest.items.iter().map(|i| i.order).collect();
                assert_eq!(orders, (0..manifest.items.len()).collect::<Vec<_>>());
            }
        }
    }
}
