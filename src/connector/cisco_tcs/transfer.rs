//! Relocation of finished recordings into managed storage.
//!
//! Transfers run on a fixed number of workers fed by a channel. Each queued recording is
//! tracked by key so a reconciliation pass never queues it twice and folder deletion can
//! wait for transfers of that folder to drain. A folder being deleted is closed first, so no
//! new transfer into it is accepted while the deletion runs.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::recording_id::RecordingId;
use super::TcsInner;
use crate::connector::controller::Notification;
use crate::connector::error::{CommandError, CommandResult};
use crate::connector::http::{HttpExchange, HttpRequest};
use crate::constants::METADATA_SIDECAR_SUFFIX;
use crate::storage::{BytesSource, ByteStream, FileSpec, ResumableSource, ResumeSupport, StorageError, StorageResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TransferJob {
    pub recording: RecordingId,
    pub download_url: String,
}

/// Work executed by the pool workers
#[async_trait]
pub(crate) trait TransferHandler: Send + Sync + 'static {
    async fn run_transfer(self: Arc<Self>, job: TransferJob);
}

#[derive(Default)]
struct PoolShared {
    /// Recording key to folder id
    queued: DashMap<String, String>,
    /// Folders being deleted
    closed_folders: DashMap<String, usize>,
    finished: Notify,
    closing: AtomicBool,
}

pub(crate) struct TransferPool {
    device_id: String,
    workers: usize,
    shared: Arc<PoolShared>,
    sender: Mutex<Option<mpsc::UnboundedSender<TransferJob>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TransferPool {
    pub fn new(device_id: impl Into<String>, workers: usize) -> Self {
        Self {
            device_id: device_id.into(),
            workers: workers.max(1),
            shared: Arc::new(PoolShared::default()),
            sender: Mutex::new(None),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn start<T: TransferHandler>(&self, handler: Weak<T>) {
        let mut sender = self.sender.lock();
        if sender.is_some() {
            return;
        }
        self.shared.closing.store(false, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel::<TransferJob>();
        let receiver = Arc::new(tokio::sync::Mutex::new(rx));

        let mut handles = self.handles.lock();
        for worker in 0..self.workers {
            let receiver = Arc::clone(&receiver);
            let shared = Arc::clone(&self.shared);
            let handler = handler.clone();
            let device_id = self.device_id.clone();
            handles.push(tokio::spawn(async move {
                debug!(device_id = %device_id, worker, "Transfer worker started");
                loop {
                    let job = receiver.lock().await.recv().await;
                    let Some(job) = job else {
                        break;
                    };
                    let key = job.recording.key();
                    if !shared.closing.load(Ordering::SeqCst) {
                        if let Some(handler) = handler.upgrade() {
                            handler.run_transfer(job).await;
                        }
                    }
                    shared.queued.remove(&key);
                    shared.finished.notify_waiters();
                }
                debug!(device_id = %device_id, worker, "Transfer worker stopped");
            }));
        }
        *sender = Some(tx);
        info!(device_id = %self.device_id, workers = self.workers, "🚚 Transfer pool started");
    }

    /// Queue a transfer unless the recording is already queued
    pub fn enqueue(&self, job: TransferJob) -> bool {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return false;
        };
        let key = job.recording.key();
        match self.shared.queued.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => return false,
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(job.recording.folder_id.clone());
            }
        }
        // Checked after registering, so a concurrent close either sees the job or is seen here
        if self.is_folder_closed(&job.recording.folder_id) {
            debug!(device_id = %self.device_id, recording = %job.recording, "Folder closed, transfer refused");
            self.shared.queued.remove(&key);
            self.shared.finished.notify_waiters();
            return false;
        }
        if sender.send(job).is_err() {
            self.shared.queued.remove(&key);
            return false;
        }
        true
    }

    /// Refuse new transfers into `folder_id` until the returned guard is dropped
    pub fn close_folder(&self, folder_id: &str) -> ClosedFolder {
        *self
            .shared
            .closed_folders
            .entry(folder_id.to_string())
            .or_insert(0) += 1;
        ClosedFolder {
            shared: Arc::clone(&self.shared),
            folder_id: folder_id.to_string(),
        }
    }

    pub fn is_folder_closed(&self, folder_id: &str) -> bool {
        self.shared.closed_folders.contains_key(folder_id)
    }

    pub fn is_queued(&self, key: &str) -> bool {
        self.shared.queued.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.shared.queued.len()
    }

    fn has_folder(&self, folder_id: &str) -> bool {
        self.shared
            .queued
            .iter()
            .any(|entry| entry.value() == folder_id)
    }

    /// Wait until no transfer of `folder_id` is queued or running; false on timeout
    pub async fn wait_for_folder(&self, folder_id: &str, timeout: Duration) -> bool {
        // A timeout past the clock's range means waiting without a deadline
        let deadline = tokio::time::Instant::now().checked_add(timeout);
        loop {
            let finished = self.shared.finished.notified();
            tokio::pin!(finished);
            finished.as_mut().enable();
            if !self.has_folder(folder_id) {
                return true;
            }
            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, finished).await.is_err() {
                        return !self.has_folder(folder_id);
                    }
                }
                None => finished.await,
            }
        }
    }

    /// Stop accepting work, let running transfers finish and join the workers
    pub async fn shutdown(&self) {
        self.shared.closing.store(true, Ordering::SeqCst);
        drop(self.sender.lock().take());
        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        for handle in handles {
            if let Err(error) = handle.await {
                warn!(device_id = %self.device_id, error = %error, "⚠️ Transfer worker ended abnormally");
            }
        }
        self.shared.queued.clear();
        self.shared.finished.notify_waiters();
    }
}

/// Keeps a folder closed to new transfers while alive
pub(crate) struct ClosedFolder {
    shared: Arc<PoolShared>,
    folder_id: String,
}

impl Drop for ClosedFolder {
    fn drop(&mut self) {
        self.shared
            .closed_folders
            .remove_if_mut(&self.folder_id, |_, closers| {
                *closers -= 1;
                *closers == 0
            });
    }
}

/// Device download reopened with a byte range after a dropped connection
pub(crate) struct HttpDownloadSource<H: HttpExchange> {
    inner: Arc<TcsInner<H>>,
    url: url::Url,
}

impl<H: HttpExchange> HttpDownloadSource<H> {
    pub fn new(inner: Arc<TcsInner<H>>, url: url::Url) -> Self {
        Self { inner, url }
    }
}

#[async_trait]
impl<H: HttpExchange> ResumableSource for HttpDownloadSource<H> {
    async fn open(&self, offset: u64) -> StorageResult<ByteStream> {
        let mut request = HttpRequest::get(self.url.clone());
        if offset > 0 {
            request = request.header("Range", format!("bytes={offset}-"));
        }
        let stream = self
            .inner
            .download(request)
            .await
            .map_err(|error| StorageError::io(error.to_string()))?;

        match stream.status {
            206 => Ok(stream.body),
            200 if offset == 0 => Ok(stream.body),
            // Range ignored, skip what is already written
            200 => {
                let mut skip = offset;
                Ok(stream
                    .body
                    .map(move |chunk| {
                        chunk.map(|bytes| {
                            let skipped = usize::try_from(skip).unwrap_or(usize::MAX).min(bytes.len());
                            skip -= skipped as u64;
                            bytes.slice(skipped..)
                        })
                    })
                    .boxed())
            }
            status => Err(StorageError::io(format!("download returned HTTP {status}"))),
        }
    }
}

pub(crate) fn sidecar_name(file_id: &str) -> String {
    format!("{file_id}{METADATA_SIDECAR_SUFFIX}")
}

impl<H: HttpExchange> TcsInner<H> {
    /// Store the raw device metadata next to the recording, replacing an older copy
    pub(crate) async fn write_metadata(&self, recording: &RecordingId) -> CommandResult<()> {
        let metadata = self.conference_metadata(&recording.native_id).await?;
        self.storage
            .create_file(
                &FileSpec::new(recording.folder_id.clone(), sidecar_name(&recording.file_id)),
                &BytesSource::new(metadata.into_bytes()),
                ResumeSupport::Disabled,
            )
            .await?;
        Ok(())
    }

    async fn relocate(self: &Arc<Self>, job: &TransferJob) -> CommandResult<u64> {
        let url = url::Url::parse(&job.download_url)
            .map_err(|error| CommandError::invalid_argument(format!("bad download url: {error}")))?;
        let source = HttpDownloadSource::new(Arc::clone(self), url);
        let recording = &job.recording;
        let written = self
            .storage
            .create_file(
                &FileSpec::new(recording.folder_id.clone(), recording.file_id.clone()),
                &source,
                ResumeSupport::Enabled {
                    max_resumes: self.settings.max_resumes,
                },
            )
            .await?;
        self.write_metadata(recording).await?;
        // Device copy goes only after the stored copy is complete
        self.delete_device_recording(&recording.native_id).await?;
        Ok(written)
    }
}

#[async_trait]
impl<H: HttpExchange> TransferHandler for TcsInner<H> {
    async fn run_transfer(self: Arc<Self>, job: TransferJob) {
        let recording = &job.recording;
        info!(
            device_id = %self.device_id,
            folder_id = %recording.folder_id,
            file = %recording.file_id,
            "🚚 Transferring recording"
        );
        match self.relocate(&job).await {
            Ok(bytes) => info!(
                device_id = %self.device_id,
                folder_id = %recording.folder_id,
                file = %recording.file_id,
                bytes,
                "✅ Recording relocated"
            ),
            Err(error) => {
                warn!(
                    device_id = %self.device_id,
                    folder_id = %recording.folder_id,
                    file = %recording.file_id,
                    error = %error,
                    "❌ Recording transfer failed"
                );
                self.controller
                    .notify_administrators(Notification::recording_move_failed(
                        &self.device_id,
                        &recording.folder_id,
                        &recording.file_id,
                        &error.to_string(),
                    ))
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Gate {
        release: Notify,
        done: AtomicUsize,
    }

    #[async_trait]
    impl TransferHandler for Gate {
        async fn run_transfer(self: Arc<Self>, _job: TransferJob) {
            self.release.notified().await;
            self.done.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn job(folder: &str, file: &str) -> TransferJob {
        TransferJob {
            recording: RecordingId::new(folder, file, "1").unwrap(),
            download_url: "https://tcs.example.org/download/1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_enqueue_deduplicates_and_waits_for_folder() {
        let gate = Arc::new(Gate {
            release: Notify::new(),
            done: AtomicUsize::new(0),
        });
        let pool = TransferPool::new("tcs-1", 1);
        assert!(!pool.enqueue(job("f1", "a.mp4")), "pool not started");

        pool.start(Arc::downgrade(&gate));
        assert!(pool.enqueue(job("f1", "a.mp4")));
        assert!(!pool.enqueue(job("f1", "a.mp4")));
        assert!(pool.is_queued(&job("f1", "a.mp4").recording.key()));

        assert!(pool.wait_for_folder("f2", Duration::from_millis(10)).await);
        assert!(pool.wait_for_folder("f2", Duration::MAX).await);
        assert!(!pool.wait_for_folder("f1", Duration::from_millis(30)).await);

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                gate.release.notify_waiters();
            })
        };
        assert!(pool.wait_for_folder("f1", Duration::from_secs(5)).await);
        waiter.await.unwrap();
        assert_eq!(gate.done.load(Ordering::SeqCst), 1);
        assert_eq!(pool.len(), 0);

        pool.shutdown().await;
        assert!(!pool.enqueue(job("f1", "b.mp4")));
    }

    #[tokio::test]
    async fn test_closed_folder_refuses_new_transfers() {
        let gate = Arc::new(Gate {
            release: Notify::new(),
            done: AtomicUsize::new(0),
        });
        let pool = TransferPool::new("tcs-1", 1);
        pool.start(Arc::downgrade(&gate));

        let first = pool.close_folder("f1");
        let second = pool.close_folder("f1");
        assert!(pool.is_folder_closed("f1"));
        assert!(!pool.enqueue(job("f1", "a.mp4")));
        assert!(!pool.is_queued(&job("f1", "a.mp4").recording.key()));
        assert!(pool.wait_for_folder("f1", Duration::from_millis(10)).await);

        // Other folders keep transferring
        assert!(pool.enqueue(job("f2", "b.mp4")));

        drop(first);
        assert!(pool.is_folder_closed("f1"), "still closed by the second deletion");
        drop(second);
        assert!(!pool.is_folder_closed("f1"));
        assert!(pool.enqueue(job("f1", "a.mp4")));

        let releaser = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                while gate.done.load(Ordering::SeqCst) < 2 {
                    gate.release.notify_waiters();
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
        };
        assert!(pool.wait_for_folder("f1", Duration::from_secs(5)).await);
        assert!(pool.wait_for_folder("f2", Duration::from_secs(5)).await);
        releaser.await.unwrap();
        pool.shutdown().await;
    }
}
