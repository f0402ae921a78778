//! In-memory fakes shared by this crate's tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::watch;

use docimport_markdown::extract_title;
use docimport_planner::paths::parent_dir;
use docimport_shared::{ImportError, Result, SourceAdapter, SourceDocument, WorkerResult};
use docimport_writer::{
    BlockRelation, ConvertedBlocks, CreatedDocument, DocApi, Page, RemoteFolder, WikiNode, WikiSpace,
};

use crate::executor::GroupDispatcher;
use crate::protocol::WorkerPayload;
use crate::worker::process_payload;

/// Markdown files held in a map.
#[derive(Default)]
pub(crate) struct MemSource {
    files: BTreeMap<String, String>,
}

impl MemSource {
    pub(crate) fn new(files: &[(&str, &str)]) -> Self {
        Self {
            files: files.iter().map(|(p, c)| (p.to_string(), c.to_string())).collect(),
        }
    }
}

impl SourceAdapter for MemSource {
    fn list_markdown(&self) -> Result<Vec<String>> {
        Ok(self.files.keys().cloned().collect())
    }

    fn read_markdown(&self, relative_path: &str) -> Result<SourceDocument> {
        let markdown = self
            .files
            .get(relative_path)
            .ok_or_else(|| ImportError::validation(format!("no such file: {relative_path}")))?;
        Ok(SourceDocument {
            path: relative_path.to_string(),
            title: extract_title(markdown).unwrap_or_else(|| relative_path.to_string()),
            markdown: markdown.clone(),
            relative_dir: parent_dir(relative_path).to_string(),
            base_ref: String::new(),
        })
    }
}

/// Runs groups in-process against a shared API and records the groups seen.
pub(crate) struct InProcessDispatcher {
    pub(crate) api: Arc<dyn DocApi>,
    pub(crate) groups: Mutex<Vec<String>>,
}

impl InProcessDispatcher {
    pub(crate) fn new(api: Arc<dyn DocApi>) -> Self {
        Self {
            api,
            groups: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl GroupDispatcher for InProcessDispatcher {
    async fn dispatch(&self, payload: WorkerPayload, cancel: watch::Receiver<bool>) -> Result<WorkerResult> {
        self.groups.lock().unwrap().push(payload.group_key.clone());
        Ok(process_payload(self.api.clone(), &payload, &cancel).await)
    }
}

/// Records every call as a short line and succeeds unless told otherwise.
#[derive(Default)]
pub(crate) struct FakeApi {
    rejected_titles: HashMap<String, i64>,
    failing_docs: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl FakeApi {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// `create_document` with this title fails with `code`.
    pub(crate) fn reject_title(mut self, title: &str, code: i64) -> Self {
        self.rejected_titles.insert(title.to_string(), code);
        self
    }

    /// Every append to this document fails.
    pub(crate) fn fail_writes_to(mut self, document_id: &str) -> Self {
        self.failing_docs.insert(document_id.to_string());
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn calls_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.calls().into_iter().filter(|c| c.starts_with(prefix)).collect()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn check_writable(&self, document_id: &str) -> Result<()> {
        if self.failing_docs.contains(document_id) {
            return Err(ImportError::api("/open-apis/docx/v1/documents/blocks", 1_770_001, "invalid param"));
        }
        Ok(())
    }
}

#[async_trait]
impl DocApi for FakeApi {
    async fn create_document(&self, title: &str, folder_token: Option<&str>) -> Result<CreatedDocument> {
        self.record(format!("create:{title}:{}", folder_token.unwrap_or("-")));
        if let Some(code) = self.rejected_titles.get(title) {
            return Err(ImportError::api("/open-apis/docx/v1/documents", *code, "rejected title"));
        }
        let document_id = format!("doc-{title}");
        Ok(CreatedDocument {
            url: format!("https://docs.example/docx/{document_id}"),
            document_id,
        })
    }

    async fn convert_markdown(&self, markdown: &str) -> Result<ConvertedBlocks> {
        self.record(format!("convert:{}", markdown.len()));
        Ok(ConvertedBlocks {
            first_level_block_ids: vec!["tmp-1".into()],
            blocks: vec![json!({ "block_id": "tmp-1", "block_type": 2 })],
            images: Vec::new(),
        })
    }

    async fn append_descendants(&self, document_id: &str, _converted: &ConvertedBlocks) -> Result<Vec<BlockRelation>> {
        self.record(format!("append:{document_id}"));
        self.check_writable(document_id)?;
        Ok(Vec::new())
    }

    async fn append_children(&self, document_id: &str, children: &[Value]) -> Result<()> {
        self.record(format!("children:{document_id}:{}", children.len()));
        self.check_writable(document_id)
    }

    async fn list_child_folders(&self, folder_token: &str, _page: Option<&str>) -> Result<Page<RemoteFolder>> {
        self.record(format!("list_folders:{folder_token}"));
        Ok(Page::last(Vec::new()))
    }

    async fn create_folder(&self, name: &str, parent_token: &str) -> Result<String> {
        self.record(format!("create_folder:{name}:{parent_token}"));
        Ok(format!("fld-{name}"))
    }

    async fn list_wiki_spaces(&self, _page: Option<&str>) -> Result<Page<WikiSpace>> {
        self.record("list_spaces".into());
        Ok(Page::last(vec![WikiSpace {
            space_id: "space-existing".into(),
            name: "Existing".into(),
        }]))
    }

    async fn create_wiki_space(&self, name: &str) -> Result<String> {
        self.record(format!("create_space:{name}"));
        Ok(format!("space-{name}"))
    }

    async fn list_wiki_nodes(&self, space_id: &str, parent: Option<&str>, _page: Option<&str>) -> Result<Page<WikiNode>> {
        self.record(format!("list_nodes:{space_id}:{}", parent.unwrap_or("-")));
        Ok(Page::last(Vec::new()))
    }

    async fn create_wiki_node(&self, space_id: &str, parent: Option<&str>, title: &str) -> Result<String> {
        self.record(format!("create_node:{space_id}:{}:{title}", parent.unwrap_or("-")));
        Ok(format!("node-{title}"))
    }

    async fn move_doc_to_wiki(&self, space_id: &str, document_id: &str, parent: Option<&str>) -> Result<String> {
        self.record(format!("move:{space_id}:{document_id}:{}", parent.unwrap_or("-")));
        Ok(format!("wiki-{document_id}"))
    }
}
