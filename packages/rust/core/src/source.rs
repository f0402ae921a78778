//! Markdown trees on the local filesystem.

use std::path::{Component, Path, PathBuf};

use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use docimport_markdown::extract_title;
use docimport_planner::paths::{normalize_relative_path, parent_dir};
use docimport_shared::{ImportError, Result, SourceAdapter, SourceDocument};

/// A directory of markdown files.
#[derive(Debug, Clone)]
pub struct LocalSource {
    root: PathBuf,
}

impl LocalSource {
    /// Open `root`, which must be an existing directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(ImportError::config(format!(
                "source root is not a directory: {}",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl SourceAdapter for LocalSource {
    fn list_markdown(&self) -> Result<Vec<String>> {
        let mut paths = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(&self.root).to_path_buf();
                ImportError::io(path, e.into())
            })?;
            if !entry.file_type().is_file() || !is_markdown(entry.path()) {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(&self.root) {
                paths.push(to_slash_path(relative));
            }
        }

        paths.sort();
        debug!(root = %self.root.display(), count = paths.len(), "markdown files listed");
        Ok(paths)
    }

    fn read_markdown(&self, relative_path: &str) -> Result<SourceDocument> {
        let path = normalize_relative_path(relative_path).ok_or_else(|| {
            ImportError::validation(format!("invalid source path: {relative_path}"))
        })?;
        let full = self.root.join(&path);
        let bytes = std::fs::read(&full).map_err(|e| ImportError::io(&full, e))?;
        let markdown = String::from_utf8_lossy(&bytes).into_owned();

        let title = extract_title(&markdown).unwrap_or_else(|| {
            Path::new(&path)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        });
        let base_ref = full
            .parent()
            .unwrap_or(&self.root)
            .display()
            .to_string();

        Ok(SourceDocument {
            relative_dir: parent_dir(&path).to_string(),
            path,
            title,
            markdown,
            base_ref,
        })
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

fn is_markdown(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("md"))
}

fn to_slash_path(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use std::fs;

    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    fn tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("guide/deep")).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join("README.md"), "# Welcome\n\nbody").unwrap();
        fs::write(root.join("guide/intro.MD"), "no heading here").unwrap();
        fs::write(root.join("guide/deep/notes.md"), "text\n# Deep Notes\n").unwrap();
        fs::write(root.join("guide/image.png"), [0u8, 1, 2]).unwrap();
        fs::write(root.join(".git/HEAD.md"), "hidden").unwrap();
        dir
    }

    #[test]
    fn lists_sorted_markdown_and_skips_hidden_dirs() {
        let dir = tree();
        let source = LocalSource::new(dir.path()).unwrap();
        assert_eq!(
            source.list_markdown().unwrap(),
            vec!["README.md", "guide/deep/notes.md", "guide/intro.MD"]
        );
    }

    #[test]
    fn reads_title_from_heading_or_stem() {
        let dir = tree();
        let source = LocalSource::new(dir.path()).unwrap();

        let doc = source.read_markdown("guide/deep/notes.md").unwrap();
        assert_eq!(doc.title, "Deep Notes");
        assert_eq!(doc.relative_dir, "guide/deep");
        assert!(doc.base_ref.ends_with("deep"));

        let doc = source.read_markdown("./guide/intro.MD").unwrap();
        assert_eq!(doc.path, "guide/intro.MD");
        assert_eq!(doc.title, "intro");
        assert_eq!(doc.markdown, "no heading here");
    }

    #[test]
    fn rejects_escaping_and_missing_paths() {
        let dir = tree();
        let source = LocalSource::new(dir.path()).unwrap();
        assert!(matches!(
            source.read_markdown("../outside.md"),
            Err(ImportError::Validation { .. })
        ));
        assert!(matches!(source.read_markdown("missing.md"), Err(ImportError::Io { .. })));
    }

    #[test]
    fn root_must_be_a_directory() {
        let dir = tree();
        let err = LocalSource::new(dir.path().join("README.md")).unwrap_err();
        assert!(matches!(err, ImportError::Config { .. }));
    }
}
