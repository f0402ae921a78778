//! Writing markdown into an existing document through a fallback chain.
//!
//! Tier 1 converts each semantic segment through the remote markdown
//! converter, re-chunking payloads the platform rejects. A chunk that still
//! fails is written as native blocks. If tier 1 fails as a whole the document
//! is rewritten with native blocks (tier 2), and as a last resort the head of
//! the raw markdown is appended as one text block (tier 3). Only a tier 3
//! failure reaches the caller.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use docimport_markdown::{
    SegmentKind, chunk_text_by_bytes, split_markdown_by_lines, split_semantic_blocks, truncate_utf8,
};
use docimport_shared::{ImportError, Result};

use crate::api::{BlockRelation, ConvertedImage, DocApi};
use crate::blocks::{NATIVE_TEXT_MAX_BYTES, blocks_for_segment, raw_text_block};

pub const DEFAULT_CONVERT_MAX_BYTES: usize = 45_000;

/// Re-chunking stops at this depth.
pub const MAX_SPLIT_DEPTH: usize = 6;
/// Chunks at or below this size are never split again.
pub const MIN_SPLIT_BYTES: usize = 256;
/// Floor for the byte budget of re-chunked pieces.
pub const MIN_RETRY_CHUNK_BYTES: usize = 1024;

pub const CHILDREN_BATCH_SIZE: usize = 20;
/// Bytes kept by the raw text fallback; one native text element at most.
pub const RAW_FALLBACK_BYTES: usize = NATIVE_TEXT_MAX_BYTES;

/// Which tier finally wrote the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteTier {
    BlockMatching,
    NativeBlocks,
    RawText,
}

/// Receives `(image_url, final_block_id)` for every image block written by
/// the converter, e.g. to upload and attach the image.
#[async_trait]
pub trait ImageBlockHandler: Send + Sync {
    async fn on_image_block(&self, document_id: &str, image_url: &str, block_id: &str) -> Result<()>;
}

/// Default handler: image upload is not wired, so the placeholder stays.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogImageBlocks;

#[async_trait]
impl ImageBlockHandler for LogImageBlocks {
    async fn on_image_block(&self, document_id: &str, image_url: &str, block_id: &str) -> Result<()> {
        debug!(document_id, image_url, block_id, "image block left as placeholder");
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct ChunkStats {
    converted: usize,
    fallback: usize,
}

/// Writes markdown bodies through a [`DocApi`].
#[derive(Clone)]
pub struct WritePipeline {
    api: Arc<dyn DocApi>,
    convert_max_bytes: usize,
}

impl WritePipeline {
    pub fn new(api: Arc<dyn DocApi>, convert_max_bytes: usize) -> Self {
        Self {
            api,
            convert_max_bytes: convert_max_bytes.max(1),
        }
    }

    /// Append `content` to the end of `document_id`.
    #[instrument(skip_all, fields(document_id = %document_id, bytes = content.len()))]
    pub async fn write_markdown(
        &self,
        document_id: &str,
        content: &str,
        images: &dyn ImageBlockHandler,
    ) -> Result<WriteTier> {
        let err = match self.write_by_block_matching(document_id, content, images).await {
            Ok(stats) => {
                info!(
                    converted_chunks = stats.converted,
                    fallback_chunks = stats.fallback,
                    "markdown written by block matching"
                );
                return Ok(WriteTier::BlockMatching);
            }
            Err(e) => e,
        };
        warn!(error = %err, "block matching failed, writing native blocks");

        let err = match self.write_by_native_blocks(document_id, content).await {
            Ok(()) => return Ok(WriteTier::NativeBlocks),
            Err(e) => e,
        };
        warn!(error = %err, "native blocks failed, writing raw text");

        self.append_raw_text(document_id, content).await?;
        Ok(WriteTier::RawText)
    }

    // -----------------------------------------------------------------------
    // Tier 1: block matching
    // -----------------------------------------------------------------------

    async fn write_by_block_matching(
        &self,
        document_id: &str,
        content: &str,
        images: &dyn ImageBlockHandler,
    ) -> Result<ChunkStats> {
        let segments = split_semantic_blocks(content);
        let mut stats = ChunkStats::default();

        for (idx, segment) in segments.iter().enumerate() {
            for chunk in split_markdown_by_lines(&segment.content, self.convert_max_bytes) {
                if chunk.trim().is_empty() {
                    continue;
                }

                if segment.kind == SegmentKind::Table {
                    debug!(segment = idx + 1, "table written as native blocks");
                    self.write_segment_natively(document_id, segment.kind, &chunk).await?;
                    stats.fallback += 1;
                    continue;
                }

                match self.convert_with_rechunk(document_id, &chunk, images).await {
                    Ok(()) => stats.converted += 1,
                    Err(e) => {
                        warn!(
                            kind = %segment.kind,
                            segment = idx + 1,
                            segments = segments.len(),
                            bytes = chunk.len(),
                            error = %e,
                            "convert failed, chunk falls back to native blocks"
                        );
                        self.write_segment_natively(document_id, segment.kind, &chunk).await?;
                        stats.fallback += 1;
                    }
                }
            }
        }
        Ok(stats)
    }

    /// Convert and append one chunk, splitting rejected payloads.
    ///
    /// Pieces are processed from an explicit stack so they keep document
    /// order and the split depth stays bounded by [`MAX_SPLIT_DEPTH`].
    async fn convert_with_rechunk(&self, document_id: &str, chunk: &str, images: &dyn ImageBlockHandler) -> Result<()> {
        let mut stack = vec![(chunk.to_string(), 0usize)];

        while let Some((piece, depth)) = stack.pop() {
            let converted = self.api.convert_markdown(&piece).await?;
            if converted.is_empty() {
                continue;
            }

            match self.api.append_descendants(document_id, &converted).await {
                Ok(relations) => dispatch_images(document_id, &converted.images, &relations, images).await,
                Err(e) if should_split(&e, &piece, depth) => {
                    let pieces = split_for_retry(&piece);
                    if pieces.len() == 1 && pieces[0] == piece {
                        warn!(depth, bytes = piece.len(), "re-chunk made no progress");
                        return Err(e);
                    }
                    warn!(depth, bytes = piece.len(), pieces = pieces.len(), error = %e, "append rejected, re-chunking");
                    stack.extend(pieces.into_iter().rev().map(|p| (p, depth + 1)));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Tier 2: native blocks
    // -----------------------------------------------------------------------

    async fn write_by_native_blocks(&self, document_id: &str, content: &str) -> Result<()> {
        for segment in split_semantic_blocks(content) {
            self.write_segment_natively(document_id, segment.kind, &segment.content)
                .await?;
        }
        Ok(())
    }

    async fn write_segment_natively(&self, document_id: &str, kind: SegmentKind, content: &str) -> Result<()> {
        let blocks = blocks_for_segment(kind, content);
        self.append_blocks(document_id, &blocks).await
    }

    async fn append_blocks(&self, document_id: &str, blocks: &[Value]) -> Result<()> {
        for batch in blocks.chunks(CHILDREN_BATCH_SIZE) {
            self.api.append_children(document_id, batch).await?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Tier 3: raw text
    // -----------------------------------------------------------------------

    async fn append_raw_text(&self, document_id: &str, content: &str) -> Result<()> {
        let snippet = truncate_utf8(content, RAW_FALLBACK_BYTES);
        self.api.append_children(document_id, &[raw_text_block(snippet)]).await
    }
}

fn should_split(err: &ImportError, chunk: &str, depth: usize) -> bool {
    depth < MAX_SPLIT_DEPTH && chunk.len() > MIN_SPLIT_BYTES && err.is_invalid_param()
}

/// Halve a chunk along line breaks, or by bytes when it is one long line.
fn split_for_retry(chunk: &str) -> Vec<String> {
    let budget = (chunk.len() / 2).max(MIN_RETRY_CHUNK_BYTES);
    let pieces: Vec<String> = split_markdown_by_lines(chunk, budget)
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect();
    if pieces.len() >= 2 {
        return pieces;
    }
    chunk_text_by_bytes(chunk, budget)
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect()
}

/// Join converter image refs with append relations and notify the handler.
async fn dispatch_images(
    document_id: &str,
    converted: &[ConvertedImage],
    relations: &[BlockRelation],
    handler: &dyn ImageBlockHandler,
) {
    if converted.is_empty() || relations.is_empty() {
        return;
    }

    let final_ids: HashMap<&str, &str> = relations
        .iter()
        .filter(|r| !r.temporary_block_id.is_empty() && !r.block_id.is_empty())
        .map(|r| (r.temporary_block_id.as_str(), r.block_id.as_str()))
        .collect();

    for image in converted {
        let Some(block_id) = final_ids.get(image.block_id.as_str()) else {
            continue;
        };
        if image.image_url.is_empty() {
            continue;
        }
        if let Err(e) = handler.on_image_block(document_id, &image.image_url, block_id).await {
            warn!(block_id, image_url = %image.image_url, error = %e, "image handler failed");
        }
    }
}
