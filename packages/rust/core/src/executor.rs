//! Grouped concurrent execution.
//!
//! Documents are partitioned by their first path segment and each group is
//! handed to a [`GroupDispatcher`]. The production dispatcher runs every group
//! in its own worker process so a crash or leak stays inside that group.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use docimport_shared::{ImportError, ImportFailure, Result, WorkerResult};

use crate::protocol::{
    DocumentSnapshot, WorkerDestination, WorkerPayload, WorkerRequest, WorkerResponse, WorkerSettings,
    decode_line, display_group, encode_line,
};

/// How long a worker may take to exit after a shutdown line.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Hidden CLI subcommand a worker process is started with.
pub const WORKER_SUBCOMMAND: &str = "worker";

// ---------------------------------------------------------------------------
// Grouping
// ---------------------------------------------------------------------------

/// First path segment, or `""` for root-level files.
pub fn group_key(path: &str) -> &str {
    path.split_once('/').map_or("", |(first, _)| first)
}

/// One payload per group, groups in first-seen order, documents in input
/// order within each group.
pub fn group_payloads(
    documents: Vec<DocumentSnapshot>,
    destination: &WorkerDestination,
    settings: &WorkerSettings,
) -> Vec<WorkerPayload> {
    let mut payloads: Vec<WorkerPayload> = Vec::new();
    for doc in documents {
        let key = group_key(&doc.path);
        match payloads.iter_mut().find(|p| p.group_key == key) {
            Some(payload) => payload.documents.push(doc),
            None => payloads.push(WorkerPayload {
                group_key: key.to_string(),
                documents: vec![doc],
                destination: destination.clone(),
                settings: settings.clone(),
            }),
        }
    }
    payloads
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Runs one group somewhere and reports its result.
///
/// When `cancel` becomes `true` an implementation stops its work and returns
/// [`ImportError::Interrupted`].
#[async_trait]
pub trait GroupDispatcher: Send + Sync {
    async fn dispatch(&self, payload: WorkerPayload, cancel: watch::Receiver<bool>) -> Result<WorkerResult>;
}

/// Run every group with at most `max_workers` in flight.
///
/// Results are merged in completion order. A group that fails as a whole
/// becomes a single `group:<key>` failure; other groups are unaffected.
#[instrument(skip_all, fields(groups = payloads.len(), max_workers = max_workers))]
pub async fn run_grouped(
    payloads: Vec<WorkerPayload>,
    dispatcher: Arc<dyn GroupDispatcher>,
    max_workers: usize,
    cancel: watch::Receiver<bool>,
) -> Result<WorkerResult> {
    let semaphore = Arc::new(Semaphore::new(max_workers.max(1)));
    let mut tasks = JoinSet::new();

    for payload in payloads {
        let semaphore = semaphore.clone();
        let dispatcher = dispatcher.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let key = payload.group_key.clone();
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return (key, Err(ImportError::Interrupted));
            };
            if *cancel.borrow() {
                return (key, Err(ImportError::Interrupted));
            }

            info!(
                group = display_group(&key),
                documents = payload.documents.len(),
                "dispatching group"
            );
            let outcome = match tokio::spawn(async move { dispatcher.dispatch(payload, cancel).await }).await {
                Ok(outcome) => outcome,
                Err(e) => Err(ImportError::Worker(format!("group task failed: {e}"))),
            };
            (key, outcome)
        });
    }

    let mut aggregate = WorkerResult::default();
    let mut interrupted = false;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, Err(ImportError::Interrupted))) => interrupted = true,
            Ok((key, Ok(result))) => {
                info!(
                    group = display_group(&key),
                    success = result.success_count,
                    failed = result.failures.len(),
                    "group completed"
                );
                aggregate.merge(result);
            }
            Ok((key, Err(e))) => {
                warn!(group = display_group(&key), error = %e, "group failed");
                aggregate
                    .failures
                    .push(ImportFailure::new(format!("group:{key}"), e.to_string()));
            }
            Err(e) => {
                warn!(error = %e, "group task panicked");
                aggregate
                    .failures
                    .push(ImportFailure::new("group:<unknown>", e.to_string()));
            }
        }
    }

    if interrupted || *cancel.borrow() {
        warn!(
            completed = aggregate.success_count,
            "run interrupted before all groups finished"
        );
        return Err(ImportError::Interrupted);
    }
    Ok(aggregate)
}

/// A cancellation flag that flips to `true` on Ctrl-C.
pub fn ctrl_c_cancellation() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping workers");
            tx.send_replace(true);
        }
    });
    rx
}

/// Resolves once `cancel` reads `true`; never resolves if the sender is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|flag| *flag).await.is_err() {
        std::future::pending::<()>().await;
    }
}

// ---------------------------------------------------------------------------
// Worker processes
// ---------------------------------------------------------------------------

/// Starts one worker process per group and talks to it over stdin/stdout.
#[derive(Debug, Clone)]
pub struct ProcessDispatcher {
    program: PathBuf,
    args: Vec<String>,
    grace: Duration,
}

impl ProcessDispatcher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            grace: SHUTDOWN_GRACE,
        }
    }

    /// Re-run the current executable with the worker subcommand followed by
    /// `extra_args`.
    pub fn current_exe(extra_args: Vec<String>) -> Result<Self> {
        let program = std::env::current_exe()
            .map_err(|e| ImportError::Worker(format!("cannot locate current executable: {e}")))?;
        let mut args = vec![WORKER_SUBCOMMAND.to_string()];
        args.extend(extra_args);
        Ok(Self::new(program, args))
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    fn spawn(&self, group: &str) -> Result<WorkerProcess> {
        debug!(program = %self.program.display(), group, "spawning worker");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ImportError::Worker(format!("failed to spawn {}: {e}", self.program.display()))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ImportError::Worker("failed to capture worker stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ImportError::Worker("failed to capture worker stdout".into()))?;

        Ok(WorkerProcess {
            child,
            stdin,
            lines: BufReader::new(stdout).lines(),
            group: group.to_string(),
        })
    }
}

#[async_trait]
impl GroupDispatcher for ProcessDispatcher {
    async fn dispatch(&self, payload: WorkerPayload, mut cancel: watch::Receiver<bool>) -> Result<WorkerResult> {
        let mut worker = self.spawn(display_group(&payload.group_key))?;

        let ready = tokio::select! {
            ready = worker.wait_for_ready() => Some(ready),
            _ = cancelled(&mut cancel) => None,
        };
        match ready {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                worker.stop(self.grace).await;
                return Err(e);
            }
            None => {
                worker.stop(self.grace).await;
                return Err(ImportError::Interrupted);
            }
        }

        let request = WorkerRequest::Run {
            payload: Box::new(payload),
        };
        if let Err(e) = worker.send(&request).await {
            worker.stop(self.grace).await;
            return Err(e);
        }

        let outcome = tokio::select! {
            response = worker.read_result() => Some(response),
            _ = cancelled(&mut cancel) => None,
        };
        worker.stop(self.grace).await;
        outcome.unwrap_or(Err(ImportError::Interrupted))
    }
}

/// A spawned worker and its pipes.
struct WorkerProcess {
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
    group: String,
}

impl WorkerProcess {
    async fn next_message(&mut self) -> Result<WorkerResponse> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| ImportError::Worker(format!("worker read error: {e}")))?
                .ok_or_else(|| ImportError::Worker("worker closed stdout unexpectedly".into()))?;
            if !line.trim().is_empty() {
                return decode_line(&line);
            }
        }
    }

    async fn wait_for_ready(&mut self) -> Result<()> {
        match self.next_message().await? {
            WorkerResponse::Ready => {
                debug!(group = %self.group, "worker is ready");
                Ok(())
            }
            other => Err(ImportError::Worker(format!("expected ready message, got: {other:?}"))),
        }
    }

    async fn read_result(&mut self) -> Result<WorkerResult> {
        match self.next_message().await? {
            WorkerResponse::Result { result } => Ok(result),
            WorkerResponse::Error { error } => Err(ImportError::Worker(error)),
            WorkerResponse::Ready => Err(ImportError::Worker("unexpected ready message during run".into())),
        }
    }

    async fn send(&mut self, request: &WorkerRequest) -> Result<()> {
        let line = encode_line(request)?;
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ImportError::Worker(format!("failed to write to worker stdin: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| ImportError::Worker(format!("failed to flush worker stdin: {e}")))
    }

    /// Ask the worker to exit, then kill it if it outlives `grace`.
    async fn stop(mut self, grace: Duration) {
        if let Err(e) = self.send(&WorkerRequest::Shutdown).await {
            debug!(group = %self.group, error = %e, "shutdown line not delivered");
        }
        drop(self.stdin);

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => debug!(group = %self.group, ?status, "worker exited"),
            Ok(Err(e)) => warn!(group = %self.group, error = %e, "worker wait error"),
            Err(_) => {
                warn!(
                    group = %self.group,
                    grace_ms = grace.as_millis() as u64,
                    "worker ignored shutdown, killing"
                );
                if let Err(e) = self.child.kill().await {
                    warn!(group = %self.group, error = %e, "failed to kill worker");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use pretty_assertions::assert_eq;

    use docimport_shared::{CreatedDocRecord, WriteMode};

    use super::*;

    fn snapshot(path: &str) -> DocumentSnapshot {
        DocumentSnapshot {
            path: path.into(),
            order: 0,
            title: path.into(),
            markdown: String::new(),
            relative_dir: String::new(),
            is_index: false,
            toc_label: String::new(),
            folder_token: String::new(),
            wiki_parent_token: String::new(),
        }
    }

    fn payloads(paths: &[&str]) -> Vec<WorkerPayload> {
        group_payloads(
            paths.iter().map(|p| snapshot(p)).collect(),
            &WorkerDestination {
                write_mode: WriteMode::Folder,
                space_id: String::new(),
            },
            &WorkerSettings {
                convert_max_bytes: 1000,
                chunk_workers: 1,
            },
        )
    }

    #[test]
    fn groups_by_first_segment_in_first_seen_order() {
        let groups = payloads(&["b/x.md", "top.md", "a/y.md", "b/z/w.md", "other.md"]);
        let summary: Vec<(String, Vec<String>)> = groups
            .iter()
            .map(|g| (g.group_key.clone(), g.documents.iter().map(|d| d.path.clone()).collect()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("b".to_string(), vec!["b/x.md".to_string(), "b/z/w.md".to_string()]),
                (String::new(), vec!["top.md".to_string(), "other.md".to_string()]),
                ("a".to_string(), vec!["a/y.md".to_string()]),
            ]
        );
    }

    /// Succeeds per document unless the group is listed as failing; tracks
    /// the number of groups in flight.
    #[derive(Default)]
    struct StubDispatcher {
        failing: Vec<&'static str>,
        wait_for_cancel: bool,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl GroupDispatcher for StubDispatcher {
        async fn dispatch(&self, payload: WorkerPayload, mut cancel: watch::Receiver<bool>) -> Result<WorkerResult> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            if self.wait_for_cancel {
                cancelled(&mut cancel).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                return Err(ImportError::Interrupted);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing.contains(&payload.group_key.as_str()) {
                return Err(ImportError::Worker("worker crashed".into()));
            }
            Ok(WorkerResult {
                success_count: payload.documents.len(),
                failures: Vec::new(),
                created_docs: payload
                    .documents
                    .iter()
                    .map(|d| CreatedDocRecord {
                        path: d.path.clone(),
                        title: d.title.clone(),
                        document_id: format!("doc-{}", d.path),
                        doc_url: String::new(),
                        wiki_node_token: String::new(),
                    })
                    .collect(),
            })
        }
    }

    #[tokio::test]
    async fn failing_group_does_not_affect_others() {
        let dispatcher = Arc::new(StubDispatcher {
            failing: vec!["b"],
            ..Default::default()
        });
        let (_tx, cancel) = watch::channel(false);

        let result = run_grouped(
            payloads(&["a/1.md", "a/2.md", "b/3.md", "c/4.md", "root.md"]),
            dispatcher.clone(),
            2,
            cancel,
        )
        .await
        .unwrap();

        assert_eq!(result.success_count, 4);
        assert_eq!(result.failures, vec![ImportFailure::new("group:b", "worker error: worker crashed")]);
        let mut created: Vec<&str> = result.created_docs.iter().map(|d| d.path.as_str()).collect();
        created.sort();
        assert_eq!(created, vec!["a/1.md", "a/2.md", "c/4.md", "root.md"]);
        assert!(dispatcher.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_run() {
        let dispatcher = Arc::new(StubDispatcher {
            wait_for_cancel: true,
            ..Default::default()
        });
        let (tx, cancel) = watch::channel(false);

        let run = tokio::spawn(run_grouped(payloads(&["a/1.md", "b/2.md", "c/3.md"]), dispatcher, 2, cancel));
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send_replace(true);

        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(err, ImportError::Interrupted));
    }

    #[cfg(unix)]
    fn sh(script: &str) -> ProcessDispatcher {
        ProcessDispatcher::new("sh", vec!["-c".into(), script.into()]).with_grace(Duration::from_millis(200))
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_worker_result_is_read_from_stdout() {
        let dispatcher = sh(
            r#"echo '{"type":"ready"}'; read run; echo '{"type":"result","result":{"success_count":3,"failures":[],"created_docs":[]}}'; read bye"#,
        );
        let (_tx, cancel) = watch::channel(false);
        let payload = payloads(&["a/1.md"]).remove(0);

        let result = dispatcher.dispatch(payload, cancel).await.unwrap();
        assert_eq!(result.success_count, 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_worker_error_and_early_exit() {
        let (_tx, cancel) = watch::channel(false);

        let dispatcher = sh(r#"echo '{"type":"ready"}'; read run; echo '{"type":"error","error":"bad payload"}'"#);
        let err = dispatcher
            .dispatch(payloads(&["a/1.md"]).remove(0), cancel.clone())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "worker error: bad payload");

        let dispatcher = sh(r#"echo '{"type":"ready"}'; exit 3"#);
        let err = dispatcher
            .dispatch(payloads(&["a/1.md"]).remove(0), cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::Worker(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stuck_worker_is_killed_after_grace() {
        let dispatcher = sh(r#"echo '{"type":"ready"}'; read run; exec sleep 30"#);
        let (tx, cancel) = watch::channel(false);
        let payload = payloads(&["a/1.md"]).remove(0);

        let started = Instant::now();
        let run = tokio::spawn(async move { dispatcher.dispatch(payload, cancel).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send_replace(true);

        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(err, ImportError::Interrupted));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
