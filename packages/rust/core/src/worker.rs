//! Worker side of a directory group: import each document in order.
//!
//! A worker process reads one [`WorkerPayload`] from stdin, writes every
//! document through the [`WritePipeline`], and answers with a single
//! [`WorkerResult`] line on stdout. Logs go to stderr.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use docimport_shared::{CreatedDocRecord, ImportError, ImportFailure, Result, WorkerResult};
use docimport_writer::{DocApi, LogImageBlocks, WritePipeline};

use crate::protocol::{
    DocumentSnapshot, WorkerDestination, WorkerPayload, WorkerRequest, WorkerResponse, decode_line,
    display_group, encode_line,
};
use crate::title::{create_with_title_strategy, title_candidates};

// ---------------------------------------------------------------------------
// Document loop
// ---------------------------------------------------------------------------

/// Import every document of a group, strictly in payload order.
///
/// Per-document errors are recorded as failures and never stop the loop.
/// When `cancel` flips to `true` the loop stops before the next document.
#[instrument(skip_all, fields(group = %display_group(&payload.group_key), documents = payload.documents.len()))]
pub async fn process_payload(
    api: Arc<dyn DocApi>,
    payload: &WorkerPayload,
    cancel: &watch::Receiver<bool>,
) -> WorkerResult {
    if payload.settings.chunk_workers > 1 {
        debug!(
            chunk_workers = payload.settings.chunk_workers,
            "chunk writes stay sequential within a document"
        );
    }

    let pipeline = WritePipeline::new(api.clone(), payload.settings.convert_max_bytes);
    let total = payload.documents.len();
    let mut result = WorkerResult::default();

    for (idx, doc) in payload.documents.iter().enumerate() {
        if *cancel.borrow() {
            warn!(remaining = total - idx, "cancelled, skipping remaining documents");
            break;
        }

        info!(index = idx + 1, total, path = %doc.path, "importing document");
        match import_document(api.as_ref(), &pipeline, &payload.destination, doc).await {
            Ok(record) => {
                result.success_count += 1;
                result.created_docs.push(record);
            }
            Err(e) => {
                warn!(path = %doc.path, error = %e, "document import failed");
                result.failures.push(ImportFailure::new(&doc.path, e.to_string()));
            }
        }
    }

    info!(
        success = result.success_count,
        failed = result.failures.len(),
        "group finished"
    );
    result
}

async fn import_document(
    api: &dyn DocApi,
    pipeline: &WritePipeline,
    destination: &WorkerDestination,
    doc: &DocumentSnapshot,
) -> Result<CreatedDocRecord> {
    let candidates = title_candidates(&doc.path, &doc.title, &doc.relative_dir);
    let folder = Some(doc.folder_token.as_str()).filter(|t| !t.is_empty());
    let (created, title) = create_with_title_strategy(api, &candidates, folder).await?;
    info!(
        document_id = %created.document_id,
        title = %title,
        url = %created.url,
        "document created"
    );

    let tier = pipeline
        .write_markdown(&created.document_id, &doc.markdown, &LogImageBlocks)
        .await?;
    debug!(path = %doc.path, tier = ?tier, "content written");

    let mut wiki_node_token = String::new();
    if destination.write_mode.uses_wiki() {
        let parent = Some(doc.wiki_parent_token.as_str()).filter(|t| !t.is_empty());
        wiki_node_token = api
            .move_doc_to_wiki(&destination.space_id, &created.document_id, parent)
            .await?;
        debug!(node_token = %wiki_node_token, "moved into wiki");
    }

    Ok(CreatedDocRecord {
        path: doc.path.clone(),
        title,
        document_id: created.document_id,
        doc_url: created.url,
        wiki_node_token,
    })
}

// ---------------------------------------------------------------------------
// Line protocol
// ---------------------------------------------------------------------------

/// Serve the worker protocol on the process's own stdin/stdout.
pub async fn run_worker_stdio(api: Arc<dyn DocApi>) -> Result<()> {
    serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout(), api).await
}

/// Serve the worker protocol over any line-oriented stream pair.
///
/// A `shutdown` line received while a run is in progress stops the run
/// after the current document; the partial result is still sent.
pub async fn serve<R, W>(reader: R, mut writer: W, api: Arc<dyn DocApi>) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    send(&mut writer, &WorkerResponse::Ready).await?;

    let mut lines = reader.lines();
    let mut input_open = true;
    while input_open {
        let Some(line) = lines.next_line().await.map_err(read_error)? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let payload = match decode_line::<WorkerRequest>(&line) {
            Ok(WorkerRequest::Run { payload }) => payload,
            Ok(WorkerRequest::Shutdown) => {
                info!("shutdown requested");
                break;
            }
            Err(e) => {
                send(&mut writer, &WorkerResponse::Error { error: e.to_string() }).await?;
                continue;
            }
        };

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let run = process_payload(api.clone(), &payload, &cancel_rx);
        tokio::pin!(run);

        let result = loop {
            tokio::select! {
                biased;
                result = &mut run => break result,
                next = lines.next_line(), if input_open => match next {
                    Ok(Some(line)) => {
                        if matches!(decode_line::<WorkerRequest>(&line), Ok(WorkerRequest::Shutdown)) {
                            info!("shutdown requested mid-run, finishing current document");
                            cancel_tx.send_replace(true);
                        }
                    }
                    Ok(None) | Err(_) => {
                        warn!("coordinator closed stdin, stopping run");
                        input_open = false;
                        cancel_tx.send_replace(true);
                    }
                },
            }
        };

        send(&mut writer, &WorkerResponse::Result { result }).await?;
        if *cancel_rx.borrow() {
            break;
        }
    }
    Ok(())
}

async fn send<W: AsyncWrite + Unpin>(writer: &mut W, message: &WorkerResponse) -> Result<()> {
    let line = encode_line(message)?;
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|e| ImportError::Worker(format!("failed to write to stdout: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| ImportError::Worker(format!("failed to flush stdout: {e}")))
}

fn read_error(e: std::io::Error) -> ImportError {
    ImportError::Worker(format!("failed to read stdin: {e}"))
}
