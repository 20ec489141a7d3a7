//! Sequential transfer queue with per-item progress and cancellation

use futures::Stream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::command::{CommandClient, OpenMode, join_path, unix_now};
use crate::error::TransferError;
use crate::types::{
    FatTimestamp, TransferId, TransferItem, TransferKind, TransferProgress, TransferStatus,
};
use crate::Result;

/// Source of one upload.
#[derive(Debug, Clone)]
pub enum UploadSpec {
    /// Bytes already in memory, stored under `name`.
    Bytes { name: String, data: Arc<[u8]> },
    /// A local file, stored under `name` or the file's own name.
    File { path: PathBuf, name: Option<String> },
}

impl UploadSpec {
    pub fn bytes(name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        UploadSpec::Bytes { name: name.into(), data: data.into() }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        UploadSpec::File { path: path.into(), name: None }
    }

    /// Name the file will have on the device.
    pub fn device_name(&self) -> String {
        match self {
            UploadSpec::Bytes { name, .. } => name.clone(),
            UploadSpec::File { name: Some(name), .. } => name.clone(),
            UploadSpec::File { path, name: None } => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }

    fn label(&self) -> String {
        match self {
            UploadSpec::Bytes { name, .. } => name.clone(),
            UploadSpec::File { path, .. } => path.display().to_string(),
        }
    }
}

/// One download: device path to local path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSpec {
    pub remote: String,
    pub local: PathBuf,
}

#[derive(Debug, Clone)]
enum Job {
    Upload { spec: UploadSpec, destination: String, mode: OpenMode },
    Download { remote: String, local: PathBuf },
    Move { from: String, to: String },
}

struct Entry {
    item: TransferItem,
    job: Job,
    cancel: CancellationToken,
}

#[derive(Default)]
struct QueueState {
    entries: Vec<Entry>,
    /// Items of the current pass, in processing order.
    pass: Vec<TransferId>,
    worker_running: bool,
}

struct QueueInner {
    client: CommandClient,
    state: Mutex<QueueState>,
    items_tx: watch::Sender<Arc<Vec<TransferItem>>>,
    progress_tx: watch::Sender<TransferProgress>,
    next_id: AtomicU64,
}

/// Queue of uploads, downloads and moves for one device.
///
/// Items run strictly one at a time in enqueue order, because the device can only work
/// on one file at a time. One item failing never stops the others. Finished items stay
/// visible until cleared.
#[derive(Clone)]
pub struct TransferQueue {
    inner: Arc<QueueInner>,
}

impl TransferQueue {
    pub fn new(client: CommandClient) -> Self {
        let (items_tx, _) = watch::channel(Arc::new(Vec::new()));
        let (progress_tx, _) = watch::channel(TransferProgress::default());
        Self {
            inner: Arc::new(QueueInner {
                client,
                state: Mutex::new(QueueState::default()),
                items_tx,
                progress_tx,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Queue uploads into `destination_dir`.
    ///
    /// With `overwrite` an existing file of the same name is replaced; without it the
    /// item fails with `Exist` and the existing file is left alone.
    pub fn enqueue_uploads(
        &self,
        specs: impl IntoIterator<Item = UploadSpec>,
        destination_dir: &str,
        overwrite: bool,
    ) -> Vec<TransferId> {
        let mode = if overwrite { OpenMode::CreateAlways } else { OpenMode::CreateNew };
        let jobs = specs
            .into_iter()
            .map(|spec| {
                let destination = join_path(destination_dir, &spec.device_name());
                let label = spec.label();
                let job = Job::Upload { spec, destination: destination.clone(), mode };
                (TransferKind::Upload, label, Some(destination), job)
            })
            .collect();
        self.enqueue(jobs)
    }

    pub fn enqueue_downloads(&self, specs: impl IntoIterator<Item = DownloadSpec>) -> Vec<TransferId> {
        let jobs = specs
            .into_iter()
            .map(|spec| {
                let destination = Some(spec.local.display().to_string());
                let job = Job::Download { remote: spec.remote.clone(), local: spec.local };
                (TransferKind::Download, spec.remote, destination, job)
            })
            .collect();
        self.enqueue(jobs)
    }

    /// Queue device-side moves of `(from, to)` full paths.
    pub fn enqueue_moves(&self, moves: impl IntoIterator<Item = (String, String)>) -> Vec<TransferId> {
        let jobs = moves
            .into_iter()
            .map(|(from, to)| {
                (TransferKind::Move, from.clone(), Some(to.clone()), Job::Move { from, to })
            })
            .collect();
        self.enqueue(jobs)
    }

    /// Cancel one item, or every unfinished item with `None`.
    ///
    /// Pending items are canceled at once; the active item stops at its next chunk boundary.
    pub fn cancel(&self, id: Option<TransferId>) {
        let mut state = self.inner.state();
        for entry in state.entries.iter_mut() {
            if id.is_some_and(|id| id != entry.item.id) || entry.item.status.is_terminal() {
                continue;
            }
            entry.cancel.cancel();
            if entry.item.status == TransferStatus::Pending {
                entry.item.status = TransferStatus::Canceled;
            }
            debug!(id = %entry.item.id, "Transfer cancel requested");
        }
        self.inner.publish(&state);
    }

    /// Remove a finished item. Returns whether it was removed.
    pub fn clear(&self, id: TransferId) -> bool {
        let mut state = self.inner.state();
        let before = state.entries.len();
        state.entries.retain(|e| e.item.id != id || !e.item.status.is_terminal());
        let removed = state.entries.len() != before;
        if removed {
            self.inner.publish(&state);
        }
        removed
    }

    /// Remove every finished item.
    pub fn clear_finished(&self) {
        let mut state = self.inner.state();
        state.entries.retain(|e| !e.item.status.is_terminal());
        self.inner.publish(&state);
    }

    pub fn items(&self) -> Vec<TransferItem> {
        self.inner.items_tx.borrow().as_ref().clone()
    }

    pub fn item(&self, id: TransferId) -> Option<TransferItem> {
        self.inner.items_tx.borrow().iter().find(|i| i.id == id).cloned()
    }

    /// Queue snapshots, starting with the current one.
    pub fn item_updates(&self) -> impl Stream<Item = Arc<Vec<TransferItem>>> + 'static {
        WatchStream::new(self.inner.items_tx.subscribe())
    }

    pub fn progress(&self) -> TransferProgress {
        self.inner.progress_tx.borrow().clone()
    }

    /// Progress snapshots, starting with the current one.
    pub fn progress_updates(&self) -> impl Stream<Item = TransferProgress> + 'static {
        WatchStream::new(self.inner.progress_tx.subscribe())
    }

    /// Whether a pass is running.
    pub fn is_busy(&self) -> bool {
        self.inner.progress_tx.borrow().in_progress
    }

    /// Wait until the current pass (if any) has finished every item.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.progress_tx.subscribe();
        // The sender lives in `self`, so this cannot fail.
        let _ = rx.wait_for(|p| !p.in_progress).await;
    }

    fn enqueue(&self, jobs: Vec<(TransferKind, String, Option<String>, Job)>) -> Vec<TransferId> {
        let mut state = self.inner.state();
        if !state.worker_running {
            state.pass.clear();
        }

        let mut ids = Vec::with_capacity(jobs.len());
        for (kind, source, destination, job) in jobs {
            let id = TransferId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
            let item = TransferItem {
                id,
                kind,
                source,
                destination,
                bytes: 0,
                total: 0,
                status: TransferStatus::Pending,
                error: None,
            };
            state.entries.push(Entry { item, job, cancel: CancellationToken::new() });
            state.pass.push(id);
            ids.push(id);
        }

        if !ids.is_empty() && !state.worker_running {
            state.worker_running = true;
            let inner = self.inner.clone();
            tokio::spawn(async move { inner.run_pass().await });
            info!(items = ids.len(), "Transfer pass started");
        } else if !ids.is_empty() {
            debug!(items = ids.len(), "Joined running transfer pass");
        }

        self.inner.publish(&state);
        ids
    }
}

impl QueueInner {
    async fn run_pass(self: Arc<Self>) {
        loop {
            let next = {
                let mut state = self.state();
                let next = state
                    .entries
                    .iter_mut()
                    .find(|e| e.item.status == TransferStatus::Pending)
                    .map(|entry| {
                        entry.item.status = TransferStatus::Active;
                        (entry.item.id, entry.job.clone(), entry.cancel.clone())
                    });
                if next.is_none() {
                    state.worker_running = false;
                }
                self.publish(&state);
                next
            };

            let Some((id, job, cancel)) = next else { break };
            debug!(%id, "Transfer started");
            let outcome = self.execute(id, job, &cancel).await;
            self.finish(id, outcome);
        }
        info!("Transfer pass finished");
    }

    async fn execute(&self, id: TransferId, job: Job, cancel: &CancellationToken) -> Result<u64, TransferError> {
        let progress = |bytes: u64, total: u64| self.update_bytes(id, bytes, total);
        match job {
            Job::Upload { spec, destination, mode } => {
                let (data, modified) = load_upload(&spec).await?;
                self.client.upload(&destination, &data, mode, modified, cancel, progress).await
            }
            Job::Download { remote, local } => {
                let data = self.client.download(&remote, cancel, progress).await?;
                tokio::fs::write(&local, &data)
                    .await
                    .map_err(|source| TransferError::Local { path: local.clone(), source })?;
                Ok(data.len() as u64)
            }
            Job::Move { from, to } => {
                if cancel.is_cancelled() {
                    return Err(TransferError::Canceled);
                }
                self.client.move_entry(&from, &to).await?;
                Ok(0)
            }
        }
    }

    fn finish(&self, id: TransferId, outcome: Result<u64, TransferError>) {
        let mut state = self.state();
        if let Some(entry) = state.entries.iter_mut().find(|e| e.item.id == id) {
            let item = &mut entry.item;
            match outcome {
                Ok(bytes) => {
                    item.bytes = bytes;
                    item.total = item.total.max(bytes);
                    item.status = TransferStatus::Done;
                    info!(%id, bytes, "Transfer done");
                }
                Err(TransferError::Canceled) => {
                    item.status = TransferStatus::Canceled;
                    info!(%id, "Transfer canceled");
                }
                Err(e) => {
                    warn!(%id, source = %item.source, "Transfer failed: {}", e);
                    item.status = TransferStatus::Error;
                    item.error = Some(e.to_string());
                }
            }
        }
        self.publish(&state);
    }

    fn update_bytes(&self, id: TransferId, bytes: u64, total: u64) {
        let mut state = self.state();
        if let Some(entry) = state.entries.iter_mut().find(|e| e.item.id == id) {
            entry.item.bytes = bytes;
            entry.item.total = total;
        }
        self.publish(&state);
    }

    /// Push the item list and the aggregate progress to observers.
    fn publish(&self, state: &QueueState) {
        let items: Vec<TransferItem> = state.entries.iter().map(|e| e.item.clone()).collect();

        let mut progress = TransferProgress {
            files_total: state.pass.len(),
            in_progress: state.worker_running,
            ..TransferProgress::default()
        };
        for (index, id) in state.pass.iter().enumerate() {
            // Cleared items count as finished.
            match items.iter().find(|i| i.id == *id) {
                Some(item) if item.status == TransferStatus::Active => {
                    progress.current_index = Some(index);
                    progress.current_bytes = item.bytes;
                    progress.current_total = item.total;
                }
                Some(item) if !item.status.is_terminal() => {}
                _ => progress.files_completed += 1,
            }
        }

        self.items_tx.send_replace(Arc::new(items));
        self.progress_tx.send_replace(progress);
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn load_upload(spec: &UploadSpec) -> Result<(Arc<[u8]>, FatTimestamp), TransferError> {
    match spec {
        UploadSpec::Bytes { data, .. } => Ok((data.clone(), FatTimestamp::from_unix(unix_now()))),
        UploadSpec::File { path, .. } => {
            let local = |source| TransferError::Local { path: path.clone(), source };
            let meta = tokio::fs::metadata(path).await.map_err(local)?;
            if meta.is_dir() {
                return Err(TransferError::Local {
                    path: path.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "is a directory"),
                });
            }
            let modified = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map_or_else(unix_now, |d| d.as_secs());
            let data = tokio::fs::read(path).await.map_err(local)?;
            Ok((data.into(), FatTimestamp::from_unix(modified)))
        }
    }
}
