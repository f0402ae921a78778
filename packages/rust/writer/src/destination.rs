//! Drive folder and wiki node resolution with per-run caches.
//!
//! Only the coordinator owns a [`DestinationResolver`]; it resolves every
//! destination up front so worker processes never touch these caches.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, instrument, warn};

use docimport_markdown::truncate_utf8;
use docimport_shared::{ImportError, Result};

use crate::api::DocApi;

/// Business code for a concurrent folder modification under the same parent.
pub const FOLDER_CONFLICT_CODE: i64 = 1_061_045;
pub const FOLDER_CREATE_ATTEMPTS: u32 = 4;
pub const FOLDER_NAME_MAX_BYTES: usize = 256;

static CONTROL_CHARS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x00-\x1f\x7f]+").expect("valid regex"));
static INVALID_CHARS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[\\/:*?"<>|]+"#).expect("valid regex"));
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Make a string safe as a document title or folder name.
///
/// Control and reserved characters become spaces, whitespace collapses, and
/// the result is cut to `max_bytes` on a char boundary.
pub fn normalize_name(raw: &str, max_bytes: usize) -> String {
    let value = CONTROL_CHARS_RE.replace_all(raw, " ");
    let value = INVALID_CHARS_RE.replace_all(&value, " ");
    let value = WHITESPACE_RE.replace_all(&value, " ");
    truncate_utf8(value.trim(), max_bytes).to_string()
}

/// Page token bookkeeping for list endpoints.
///
/// Paging ends when the server returns no token or one it already returned.
#[derive(Debug, Default)]
struct PageCursor {
    token: Option<String>,
    seen: HashSet<String>,
}

impl PageCursor {
    fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Move to `next`; `false` means stop.
    fn advance(&mut self, next: Option<String>) -> bool {
        let Some(next) = next.filter(|t| !t.is_empty()) else {
            return false;
        };
        if !self.seen.insert(next.clone()) {
            warn!(page_token = %next, "page token repeated, stopping pagination");
            return false;
        }
        self.token = Some(next);
        true
    }
}

/// Resolves relative directories to drive folders and wiki nodes.
pub struct DestinationResolver {
    api: Arc<dyn DocApi>,
    root_folder_token: String,
    /// `root:path` -> folder token.
    folder_paths: HashMap<String, String>,
    /// parent token -> child name -> folder token.
    folder_children: HashMap<String, HashMap<String, String>>,
    /// `space:parent:segment` -> node token.
    wiki_nodes: HashMap<String, String>,
    conflict_backoff: Duration,
}

impl DestinationResolver {
    pub fn new(api: Arc<dyn DocApi>, root_folder_token: impl Into<String>) -> Self {
        Self {
            api,
            root_folder_token: root_folder_token.into(),
            folder_paths: HashMap::new(),
            folder_children: HashMap::new(),
            wiki_nodes: HashMap::new(),
            conflict_backoff: Duration::from_millis(50),
        }
    }

    /// Override the folder-conflict backoff unit (tests use zero).
    pub fn with_conflict_backoff(mut self, backoff: Duration) -> Self {
        self.conflict_backoff = backoff;
        self
    }

    pub fn root_folder_token(&self) -> &str {
        &self.root_folder_token
    }

    // -----------------------------------------------------------------------
    // Drive folders
    // -----------------------------------------------------------------------

    /// Folder token for `relative_dir`, creating missing folders under the
    /// root. An empty directory maps to the root itself.
    #[instrument(skip_all, fields(relative_dir = %relative_dir))]
    pub async fn ensure_folder_path(&mut self, relative_dir: &str) -> Result<String> {
        if self.root_folder_token.is_empty() {
            return Err(ImportError::config(
                "FEISHU_FOLDER_TOKEN is required when using folder hierarchy mode",
            ));
        }
        let root = self.root_folder_token.clone();
        let normalized = relative_dir.trim().replace('\\', "/");
        let normalized = normalized.trim_matches('/');
        if normalized.is_empty() {
            return Ok(root);
        }

        let full_key = format!("{root}:{normalized}");
        if let Some(token) = self.folder_paths.get(&full_key) {
            return Ok(token.clone());
        }

        let mut parent = root.clone();
        let mut current_path = String::new();
        for segment in normalized.split('/').filter(|s| !s.is_empty()) {
            let name = normalize_name(segment, FOLDER_NAME_MAX_BYTES);
            if name.is_empty() {
                continue;
            }
            if !current_path.is_empty() {
                current_path.push('/');
            }
            current_path.push_str(&name);

            let key = format!("{root}:{current_path}");
            if let Some(token) = self.folder_paths.get(&key) {
                parent = token.clone();
                continue;
            }

            let existing = self.child_folders(&parent).await?.get(&name).cloned();
            let token = match existing {
                Some(token) => token,
                None => self.create_child_folder(&parent, &name).await?,
            };
            self.folder_paths.insert(key, token.clone());
            parent = token;
        }

        self.folder_paths.insert(full_key, parent.clone());
        Ok(parent)
    }

    async fn child_folders(&mut self, parent: &str) -> Result<&HashMap<String, String>> {
        if !self.folder_children.contains_key(parent) {
            let mut children = HashMap::new();
            let mut cursor = PageCursor::default();
            loop {
                let page = self.api.list_child_folders(parent, cursor.token()).await?;
                for folder in page.items {
                    let name = folder.name.trim().to_string();
                    if !name.is_empty() {
                        children.insert(name, folder.token);
                    }
                }
                if !cursor.advance(page.next_page_token) {
                    break;
                }
            }
            debug!(parent, children = children.len(), "listed child folders");
            self.folder_children.insert(parent.to_string(), children);
        }
        Ok(self.folder_children.entry(parent.to_string()).or_default())
    }

    async fn create_child_folder(&mut self, parent: &str, name: &str) -> Result<String> {
        let mut attempt = 0;
        let token = loop {
            attempt += 1;
            match self.api.create_folder(name, parent).await {
                Ok(token) => break token,
                Err(e) if e.api_code() == Some(FOLDER_CONFLICT_CODE) && attempt < FOLDER_CREATE_ATTEMPTS => {
                    warn!(parent, name, attempt, max = FOLDER_CREATE_ATTEMPTS, "create_folder conflict, retrying");
                    tokio::time::sleep(self.conflict_backoff * attempt).await;
                }
                Err(e) => return Err(e),
            }
        };

        info!(parent, name, token = %token, "folder created");
        self.folder_children
            .entry(parent.to_string())
            .or_default()
            .insert(name.to_string(), token.clone());
        Ok(token)
    }

    // -----------------------------------------------------------------------
    // Wiki
    // -----------------------------------------------------------------------

    /// Space id for `name`, creating the space when no space has that name.
    #[instrument(skip_all, fields(space = %name))]
    pub async fn get_or_create_space(&self, name: &str) -> Result<String> {
        let mut cursor = PageCursor::default();
        loop {
            let page = self.api.list_wiki_spaces(cursor.token()).await?;
            if let Some(space) = page.items.iter().find(|s| s.name == name) {
                return Ok(space.space_id.clone());
            }
            if !cursor.advance(page.next_page_token) {
                break;
            }
        }

        let space_id = self.api.create_wiki_space(name).await?;
        info!(space_id = %space_id, "wiki space created");
        Ok(space_id)
    }

    /// Node token for `relative_dir` inside `space_id`, creating catalog
    /// nodes as needed. An empty directory maps to the space root (`""`).
    #[instrument(skip_all, fields(space_id = %space_id, relative_dir = %relative_dir))]
    pub async fn ensure_wiki_path(&mut self, space_id: &str, relative_dir: &str) -> Result<String> {
        let mut parent = String::new();
        for segment in relative_dir.trim_matches('/').split('/').filter(|s| !s.is_empty()) {
            let key = format!("{space_id}:{parent}:{segment}");
            if let Some(token) = self.wiki_nodes.get(&key) {
                parent = token.clone();
                continue;
            }

            let existing = self.find_wiki_node(space_id, &parent, segment).await?;
            let token = match existing {
                Some(token) => token,
                None => {
                    let parent_ref = Some(parent.as_str()).filter(|p| !p.is_empty());
                    let token = self.api.create_wiki_node(space_id, parent_ref, segment).await?;
                    info!(segment, token = %token, "wiki catalog node created");
                    token
                }
            };
            self.wiki_nodes.insert(key, token.clone());
            parent = token;
        }
        Ok(parent)
    }

    async fn find_wiki_node(&self, space_id: &str, parent: &str, title: &str) -> Result<Option<String>> {
        let parent_ref = Some(parent).filter(|p| !p.is_empty());
        let mut cursor = PageCursor::default();
        loop {
            let page = self.api.list_wiki_nodes(space_id, parent_ref, cursor.token()).await?;
            if let Some(node) = page.items.into_iter().find(|n| n.title == title) {
                return Ok(Some(node.node_token));
            }
            if !cursor.advance(page.next_page_token) {
                return Ok(None);
            }
        }
    }
}
