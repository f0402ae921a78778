//! Remote side of the importer: the document platform API, its HTTP client,
//! and the write pipeline that pushes markdown into documents.
//!
//! - [`DocApi`] is the seam every remote call goes through
//! - [`FeishuClient`] implements it over HTTP with retries
//! - [`WritePipeline`] writes markdown with a three-tier fallback chain
//! - [`DestinationResolver`] maps directories to folders and wiki nodes

mod api;
mod auth;
pub mod blocks;
mod client;
mod destination;
mod pipeline;

pub use api::{
    BlockRelation, ConvertedBlocks, ConvertedImage, CreatedDocument, DocApi, Page, RemoteFolder, WikiNode,
    WikiSpace,
};
pub use auth::{AuthProvider, StaticToken, TenantTokenProvider};
pub use client::{FeishuClient, build_http_client};
pub use destination::{
    DestinationResolver, FOLDER_CONFLICT_CODE, FOLDER_CREATE_ATTEMPTS, FOLDER_NAME_MAX_BYTES, normalize_name,
};
pub use pipeline::{
    DEFAULT_CONVERT_MAX_BYTES, ImageBlockHandler, LogImageBlocks, MAX_SPLIT_DEPTH, WritePipeline, WriteTier,
};
