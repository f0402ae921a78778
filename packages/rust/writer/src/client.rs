//! HTTP implementation of [`DocApi`] for the Feishu/Lark open platform.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};
use tracing::{debug, warn};

use docimport_shared::{HttpConfig, ImportError, Result};

use crate::api::{
    BlockRelation, ConvertedBlocks, CreatedDocument, DocApi, Page, RemoteFolder, WikiNode, WikiSpace,
};
use crate::auth::AuthProvider;

const USER_AGENT: &str = concat!("docimport/", env!("CARGO_PKG_VERSION"));

const FOLDER_PAGE_SIZE: u32 = 200;
const SPACE_PAGE_SIZE: u32 = 50;
const NODE_PAGE_SIZE: u32 = 200;

/// Build the shared reqwest client from `[http]` settings.
pub fn build_http_client(config: &HttpConfig) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(config.timeout())
        .build()
        .map_err(|e| ImportError::Network(format!("failed to build HTTP client: {e}")))
}

/// Docx, drive and wiki calls over the JSON envelope API.
///
/// Transport errors and 5xx/408/429 responses are retried with linear
/// backoff; any envelope with `code != 0` becomes [`ImportError::Api`].
pub struct FeishuClient {
    client: Client,
    base_url: String,
    auth: Arc<dyn AuthProvider>,
    max_retries: u32,
    retry_backoff: Duration,
}

impl FeishuClient {
    pub fn new(client: Client, base_url: &str, auth: Arc<dyn AuthProvider>, http: &HttpConfig) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            max_retries: http.max_retries,
            retry_backoff: http.retry_backoff(),
        }
    }

    /// Send one signed request and return the decoded success envelope.
    async fn request(&self, method: Method, path: &str, query: &[(&str, String)], body: Option<&Value>) -> Result<Value> {
        let url = format!("{}{path}", self.base_url);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let token = self.auth.bearer_token().await?;
            let mut builder = self.client.request(method.clone(), &url).bearer_auth(token);
            if !query.is_empty() {
                builder = builder.query(query);
            }
            if let Some(body) = body {
                builder = builder.json(body);
            }

            let response = match builder.send().await {
                Ok(response) => response,
                Err(e) if attempt <= self.max_retries => {
                    warn!(%url, attempt, error = %e, "request failed, retrying");
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                    continue;
                }
                Err(e) => return Err(ImportError::Network(format!("{url}: {e}"))),
            };

            let status = response.status();
            if is_retryable(status) && attempt <= self.max_retries {
                warn!(%url, attempt, %status, "retryable status, retrying");
                tokio::time::sleep(self.retry_backoff * attempt).await;
                continue;
            }

            let text = response
                .text()
                .await
                .map_err(|e| ImportError::Network(format!("{url}: body read failed: {e}")))?;
            debug!(%method, path, %status, bytes = text.len(), "response received");
            return decode_envelope(path, &url, status, &text);
        }
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        self.request(Method::GET, path, query, None).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        self.request(Method::POST, path, &[], Some(body)).await
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::TOO_MANY_REQUESTS
}

/// Map an HTTP response onto the envelope contract.
///
/// Error statuses that still carry a JSON envelope keep their business code,
/// so callers can recognise payload rejections regardless of status.
fn decode_envelope(path: &str, url: &str, status: StatusCode, text: &str) -> Result<Value> {
    let parsed = serde_json::from_str::<Value>(text).ok();
    let code = parsed.as_ref().and_then(|v| v.get("code")).and_then(Value::as_i64);

    match (parsed, code) {
        (Some(payload), Some(0)) if status.is_success() => Ok(payload),
        (Some(payload), Some(code)) => {
            let msg = payload.get("msg").and_then(Value::as_str).unwrap_or("unknown");
            Err(ImportError::api(path, code, msg))
        }
        _ if !status.is_success() => Err(ImportError::Network(format!("{url}: HTTP {status}: {}", snippet(text)))),
        _ => Err(ImportError::parse(format!("invalid JSON from {path}: {}", snippet(text)))),
    }
}

fn snippet(text: &str) -> &str {
    match text.char_indices().nth(200) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// First non-empty string among JSON pointers into `payload`.
fn first_str(payload: &Value, pointers: &[&str]) -> Option<String> {
    pointers
        .iter()
        .filter_map(|p| payload.pointer(p).and_then(Value::as_str))
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn require_str(payload: &Value, pointers: &[&str], what: &str) -> Result<String> {
    first_str(payload, pointers).ok_or_else(|| ImportError::validation(format!("response missing {what}")))
}

/// `data.items` plus the next-page token when `data.has_more` is set.
fn page_items(payload: &Value) -> (Vec<Value>, Option<String>) {
    let items = payload
        .pointer("/data/items")
        .or_else(|| payload.pointer("/data/files"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let has_more = payload.pointer("/data/has_more").and_then(Value::as_bool).unwrap_or(false);
    let next = if has_more {
        first_str(payload, &["/data/next_page_token", "/data/page_token"])
    } else {
        None
    };
    (items, next)
}

fn paging_query(page_size: u32, page_token: Option<&str>) -> Vec<(&'static str, String)> {
    let mut query = vec![("page_size", page_size.to_string())];
    if let Some(token) = page_token.filter(|t| !t.is_empty()) {
        query.push(("page_token", token.to_string()));
    }
    query
}

fn document_path(document_id: &str, suffix: &str) -> String {
    format!("/open-apis/docx/v1/documents/{document_id}/blocks/{document_id}/{suffix}")
}

#[async_trait]
impl DocApi for FeishuClient {
    async fn create_document(&self, title: &str, folder_token: Option<&str>) -> Result<CreatedDocument> {
        let mut body = json!({ "title": title });
        if let Some(token) = folder_token.filter(|t| !t.is_empty()) {
            body["folder_token"] = json!(token);
        }
        let payload = self.post("/open-apis/docx/v1/documents", &body).await?;

        Ok(CreatedDocument {
            document_id: require_str(
                &payload,
                &["/data/document_id", "/data/document/document_id", "/data/document/token"],
                "document_id",
            )?,
            url: first_str(
                &payload,
                &["/data/url", "/data/document_url", "/data/document/url", "/data/document/document_url"],
            )
            .unwrap_or_default(),
        })
    }

    async fn convert_markdown(&self, markdown: &str) -> Result<ConvertedBlocks> {
        let body = json!({ "content": markdown, "content_type": "markdown" });
        let payload = self.post("/open-apis/docx/v1/documents/blocks/convert", &body).await?;
        let data = payload.get("data").cloned().unwrap_or(Value::Null);
        if data.is_null() {
            return Ok(ConvertedBlocks::default());
        }
        serde_json::from_value(data).map_err(|e| ImportError::parse(format!("invalid convert response: {e}")))
    }

    async fn append_descendants(&self, document_id: &str, converted: &ConvertedBlocks) -> Result<Vec<BlockRelation>> {
        let body = json!({
            "children_id": converted.first_level_block_ids,
            "descendants": converted.blocks,
            "index": -1,
        });
        let payload = self.post(&document_path(document_id, "descendant"), &body).await?;
        let relations = payload
            .pointer("/data/block_id_relations")
            .cloned()
            .map(serde_json::from_value::<Vec<BlockRelation>>)
            .transpose()
            .map_err(|e| ImportError::parse(format!("invalid block_id_relations: {e}")))?;
        Ok(relations.unwrap_or_default())
    }

    async fn append_children(&self, document_id: &str, children: &[Value]) -> Result<()> {
        let body = json!({ "children": children, "index": -1 });
        self.post(&document_path(document_id, "children"), &body).await?;
        Ok(())
    }

    async fn list_child_folders(&self, folder_token: &str, page_token: Option<&str>) -> Result<Page<RemoteFolder>> {
        let mut query = paging_query(FOLDER_PAGE_SIZE, page_token);
        query.push(("folder_token", folder_token.to_string()));
        let payload = self.get("/open-apis/drive/v1/files", &query).await?;

        let (items, next_page_token) = page_items(&payload);
        let items = items
            .iter()
            .filter(|item| {
                item.get("type")
                    .and_then(Value::as_str)
                    .is_some_and(|t| t.to_lowercase().contains("folder"))
            })
            .filter_map(|item| {
                Some(RemoteFolder {
                    name: first_str(item, &["/name"])?,
                    token: first_str(item, &["/token", "/file_token", "/folder_token"])?,
                })
            })
            .collect();
        Ok(Page { items, next_page_token })
    }

    async fn create_folder(&self, name: &str, parent_token: &str) -> Result<String> {
        let body = json!({ "name": name, "folder_token": parent_token });
        let payload = self.post("/open-apis/drive/v1/files/create_folder", &body).await?;
        require_str(
            &payload,
            &[
                "/data/token",
                "/data/file_token",
                "/data/folder_token",
                "/data/file/token",
                "/data/folder/token",
            ],
            "folder token",
        )
    }

    async fn list_wiki_spaces(&self, page_token: Option<&str>) -> Result<Page<WikiSpace>> {
        let payload = self
            .get("/open-apis/wiki/v2/spaces", &paging_query(SPACE_PAGE_SIZE, page_token))
            .await?;
        let (items, next_page_token) = page_items(&payload);
        let items = items
            .iter()
            .filter_map(|item| {
                Some(WikiSpace {
                    space_id: first_str(item, &["/space_id", "/id"])?,
                    name: first_str(item, &["/name", "/title"]).unwrap_or_default(),
                })
            })
            .collect();
        Ok(Page { items, next_page_token })
    }

    async fn create_wiki_space(&self, name: &str) -> Result<String> {
        let payload = self.post("/open-apis/wiki/v2/spaces", &json!({ "name": name })).await?;
        require_str(&payload, &["/data/space_id", "/data/space/space_id"], "space_id")
    }

    async fn list_wiki_nodes(
        &self,
        space_id: &str,
        parent_node_token: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<Page<WikiNode>> {
        let mut query = paging_query(NODE_PAGE_SIZE, page_token);
        if let Some(parent) = parent_node_token.filter(|t| !t.is_empty()) {
            query.push(("parent_node_token", parent.to_string()));
        }
        let payload = self
            .get(&format!("/open-apis/wiki/v2/spaces/{space_id}/nodes"), &query)
            .await?;

        let (items, next_page_token) = page_items(&payload);
        let items = items
            .iter()
            .filter_map(|item| {
                Some(WikiNode {
                    node_token: first_str(item, &["/node_token", "/wiki_token"])?,
                    title: first_str(item, &["/title", "/name"]).unwrap_or_default(),
                })
            })
            .collect();
        Ok(Page { items, next_page_token })
    }

    async fn create_wiki_node(&self, space_id: &str, parent_node_token: Option<&str>, title: &str) -> Result<String> {
        let mut body = json!({ "title": title, "obj_type": "wiki_catalog" });
        if let Some(parent) = parent_node_token.filter(|t| !t.is_empty()) {
            body["parent_node_token"] = json!(parent);
        }
        let payload = self
            .post(&format!("/open-apis/wiki/v2/spaces/{space_id}/nodes"), &body)
            .await?;
        require_str(
            &payload,
            &["/data/node/node_token", "/data/node_token", "/data/wiki_token"],
            "node_token",
        )
    }

    async fn move_doc_to_wiki(
        &self,
        space_id: &str,
        document_id: &str,
        parent_node_token: Option<&str>,
    ) -> Result<String> {
        let body = json!({
            "parent_wiki_token": parent_node_token.unwrap_or_default(),
            "obj_type": "docx",
            "obj_token": document_id,
            "apply": true,
        });
        let payload = self
            .post(&format!("/open-apis/wiki/v2/spaces/{space_id}/nodes/move_docs_to_wiki"), &body)
            .await?;
        require_str(
            &payload,
            &["/data/node_token", "/data/wiki_token", "/data/node/node_token"],
            "node token",
        )
    }
}
