//! Import planning: decides which markdown files are imported and in what
//! order.
//!
//! The planner reads an optional table-of-contents file, maps its links onto
//! the source tree, and asks an [`AmbiguityResolver`] to break ties when a
//! link matches several files. Everything else falls back to path order.

mod manifest;
pub mod paths;
mod resolver;
mod toc;

pub use manifest::{ManifestOptions, ROOT_README_FILTERED, build_manifest, build_path_manifest};
pub use resolver::{AmbiguityResolver, LlmResolution, MAX_CANDIDATES, OpenAiResolver};
pub use toc::{TocLinkRef, parse_toc_links};
