//! Coordinator/worker wire format.
//!
//! One JSON object per line. The worker announces `ready`, the coordinator
//! sends one `run` request per process, the worker answers with `result` or
//! `error`, and a `shutdown` line ends the session (or cuts a run short).

use serde::{Deserialize, Serialize};

use docimport_shared::{ImportError, Result, WorkerResult, WriteMode};

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Everything a worker needs to import one directory group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerPayload {
    /// First path segment shared by every document, empty for root files.
    pub group_key: String,
    /// Documents in manifest order.
    pub documents: Vec<DocumentSnapshot>,
    pub destination: WorkerDestination,
    pub settings: WorkerSettings,
}

/// A source document plus its precomputed destination tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub path: String,
    pub order: usize,
    pub title: String,
    pub markdown: String,
    pub relative_dir: String,
    pub is_index: bool,
    #[serde(default)]
    pub toc_label: String,
    /// Drive folder to create the document in; empty means the root folder.
    #[serde(default)]
    pub folder_token: String,
    /// Wiki node to move the document under; empty means the space root.
    #[serde(default)]
    pub wiki_parent_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerDestination {
    pub write_mode: WriteMode,
    /// Target wiki space, empty in folder mode.
    #[serde(default)]
    pub space_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSettings {
    pub convert_max_bytes: usize,
    pub chunk_workers: usize,
}

/// Rendered group name for logs and failure records.
pub fn display_group(group_key: &str) -> &str {
    if group_key.is_empty() { "<root>" } else { group_key }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Coordinator to worker.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum WorkerRequest {
    Run { payload: Box<WorkerPayload> },
    Shutdown,
}

/// Worker to coordinator.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum WorkerResponse {
    Ready,
    Result { result: WorkerResult },
    Error { error: String },
}

/// Serialize a message as one newline-terminated line.
pub(crate) fn encode_line<T: Serialize>(message: &T) -> Result<String> {
    let mut line = serde_json::to_string(message)
        .map_err(|e| ImportError::Worker(format!("failed to serialize message: {e}")))?;
    line.push('\n');
    Ok(line)
}

pub(crate) fn decode_line<'a, T: Deserialize<'a>>(line: &'a str) -> Result<T> {
    serde_json::from_str(line.trim()).map_err(|e| {
        let shown: String = line.chars().take(200).collect();
        ImportError::Worker(format!("invalid worker message: {e} (got: {shown})"))
    })
}
