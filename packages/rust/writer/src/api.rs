//! The remote document platform, as the rest of the importer sees it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use docimport_shared::Result;

/// A freshly created docx document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedDocument {
    pub document_id: String,
    /// Browser URL, empty when the platform did not return one.
    #[serde(default)]
    pub url: String,
}

/// Output of the markdown convert endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConvertedBlocks {
    #[serde(default)]
    pub first_level_block_ids: Vec<String>,
    /// Block payloads keyed by temporary block id.
    #[serde(default)]
    pub blocks: Vec<Value>,
    #[serde(default, rename = "block_id_to_image_urls")]
    pub images: Vec<ConvertedImage>,
}

impl ConvertedBlocks {
    /// Nothing to append.
    pub fn is_empty(&self) -> bool {
        self.first_level_block_ids.is_empty() || self.blocks.is_empty()
    }
}

/// An image reference found during conversion, keyed by temporary block id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertedImage {
    #[serde(default)]
    pub block_id: String,
    #[serde(default)]
    pub image_url: String,
}

/// Temporary-to-final block id mapping returned by a descendant append.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRelation {
    #[serde(default)]
    pub temporary_block_id: String,
    #[serde(default)]
    pub block_id: String,
}

/// A child folder of a drive folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFolder {
    pub name: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WikiSpace {
    pub space_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WikiNode {
    pub node_token: String,
    pub title: String,
}

/// One page of a paged listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Token for the next page, `None` on the last one.
    pub next_page_token: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_page_token: None,
        }
    }
}

/// Remote docx, drive and wiki operations.
///
/// Every call either succeeds or returns an [`docimport_shared::ImportError`];
/// non-zero business codes surface as `ImportError::Api`.
#[async_trait]
pub trait DocApi: Send + Sync {
    async fn create_document(&self, title: &str, folder_token: Option<&str>) -> Result<CreatedDocument>;

    async fn convert_markdown(&self, markdown: &str) -> Result<ConvertedBlocks>;

    /// Append converted blocks at the end of the document body.
    async fn append_descendants(
        &self,
        document_id: &str,
        converted: &ConvertedBlocks,
    ) -> Result<Vec<BlockRelation>>;

    /// Append native block payloads at the end of the document body.
    async fn append_children(&self, document_id: &str, children: &[Value]) -> Result<()>;

    async fn list_child_folders(&self, folder_token: &str, page_token: Option<&str>) -> Result<Page<RemoteFolder>>;

    /// Returns the new folder's token.
    async fn create_folder(&self, name: &str, parent_token: &str) -> Result<String>;

    async fn list_wiki_spaces(&self, page_token: Option<&str>) -> Result<Page<WikiSpace>>;

    /// Returns the new space id.
    async fn create_wiki_space(&self, name: &str) -> Result<String>;

    async fn list_wiki_nodes(
        &self,
        space_id: &str,
        parent_node_token: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<Page<WikiNode>>;

    /// Create a catalog node; returns its node token.
    async fn create_wiki_node(&self, space_id: &str, parent_node_token: Option<&str>, title: &str) -> Result<String>;

    /// Move a docx document under a wiki node; returns the new node token.
    async fn move_doc_to_wiki(
        &self,
        space_id: &str,
        document_id: &str,
        parent_node_token: Option<&str>,
    ) -> Result<String>;
}
