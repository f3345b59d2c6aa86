//! # Managed Storage
//!
//! Storage backend that relocated recordings end up in. Files are written from a
//! [`ResumableSource`]: when the byte stream drops, the source is reopened at the number
//! of bytes already written, so an interrupted transfer completes with the same content
//! an uninterrupted one would have produced.

pub mod local;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use regex::Regex;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::warn;

pub use local::LocalStorage;

use crate::connector::FolderPermission;

/// Chunked byte stream; an `Err` item means the stream dropped
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Not found: {path}")]
    NotFound { path: String },

    #[error("Already exists: {path}")]
    AlreadyExists { path: String },

    #[error("Storage I/O error: {message}")]
    Io { message: String },

    #[error("Transfer interrupted after {offset} bytes: {message}")]
    Interrupted { offset: u64, message: String },

    #[error("Invalid name: {name}")]
    InvalidName { name: String },
}

impl StorageError {
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists { path: path.into() }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    pub fn interrupted(offset: u64, message: impl Into<String>) -> Self {
        Self::Interrupted {
            offset,
            message: message.into(),
        }
    }

    pub fn invalid_name(name: impl Into<String>) -> Self {
        Self::InvalidName { name: name.into() }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::io(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::io(format!("metadata: {err}"))
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Whether an interrupted transfer may reopen its source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeSupport {
    Disabled,
    Enabled { max_resumes: u32 },
}

/// File to create inside a folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSpec {
    pub folder_id: String,
    pub file_name: String,
}

impl FileSpec {
    pub fn new(folder_id: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            folder_id: folder_id.into(),
            file_name: file_name.into(),
        }
    }
}

/// Byte source that can be reopened at an offset
#[async_trait]
pub trait ResumableSource: Send + Sync {
    async fn open(&self, offset: u64) -> StorageResult<ByteStream>;
}

/// In-memory source, also used for small generated files like metadata sidecars
#[derive(Debug, Clone)]
pub struct BytesSource {
    data: Bytes,
    chunk_size: usize,
}

impl BytesSource {
    const DEFAULT_CHUNK: usize = 64 * 1024;

    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            chunk_size: Self::DEFAULT_CHUNK,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }
}

#[async_trait]
impl ResumableSource for BytesSource {
    async fn open(&self, offset: u64) -> StorageResult<ByteStream> {
        let offset = usize::try_from(offset)
            .map_err(|_| StorageError::io("offset out of range"))?
            .min(self.data.len());
        let remaining = self.data.slice(offset..);
        let chunks: Vec<std::io::Result<Bytes>> = remaining
            .chunks(self.chunk_size)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        Ok(futures::stream::iter(chunks).boxed())
    }
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Create a folder; returns its id
    async fn create_folder(&self, name: &str) -> StorageResult<String>;

    /// Delete a folder and everything in it
    async fn delete_folder(&self, folder_id: &str) -> StorageResult<()>;

    async fn folder_exists(&self, folder_id: &str) -> StorageResult<bool>;

    /// Replace the per-user permissions of a folder
    async fn set_folder_permissions(
        &self,
        folder_id: &str,
        permissions: &[(String, FolderPermission)],
    ) -> StorageResult<()>;

    /// Write a file from `source`, replacing an existing one; returns the bytes written
    async fn create_file(
        &self,
        file: &FileSpec,
        source: &dyn ResumableSource,
        resume: ResumeSupport,
    ) -> StorageResult<u64>;

    async fn delete_file(&self, folder_id: &str, file_name: &str) -> StorageResult<()>;

    /// File names in a folder, optionally filtered by pattern
    async fn list_files(&self, folder_id: &str, pattern: Option<&Regex>) -> StorageResult<Vec<String>>;

    async fn file_exists(&self, folder_id: &str, file_name: &str) -> StorageResult<bool>;

    async fn get_file_downloadable_url(&self, folder_id: &str, file_name: &str) -> StorageResult<Option<String>>;
}

/// Drain `source` into `writer`, reopening it at the written offset after a drop
pub async fn copy_resumable<W>(
    source: &dyn ResumableSource,
    writer: &mut W,
    resume: ResumeSupport,
) -> StorageResult<u64>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut written: u64 = 0;
    let mut resumes: u32 = 0;

    loop {
        let failure = match source.open(written).await {
            Ok(mut stream) => {
                let mut failure = None;
                while let Some(chunk) = stream.next().await {
                    match chunk {
                        Ok(bytes) => {
                            writer.write_all(&bytes).await?;
                            written += bytes.len() as u64;
                        }
                        Err(error) => {
                            failure = Some(error.to_string());
                            break;
                        }
                    }
                }
                failure
            }
            Err(error) => Some(error.to_string()),
        };

        let Some(message) = failure else {
            writer.flush().await?;
            return Ok(written);
        };

        match resume {
            ResumeSupport::Enabled { max_resumes } if resumes < max_resumes => {
                resumes += 1;
                warn!(
                    offset = written,
                    attempt = resumes,
                    error = %message,
                    "🔁 Transfer interrupted, resuming"
                );
            }
            _ => return Err(StorageError::interrupted(written, message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Drops the connection once after `fail_after` bytes
    struct FlakySource {
        data: Bytes,
        fail_after: usize,
        failed: Mutex<bool>,
        opened_at: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl ResumableSource for FlakySource {
        async fn open(&self, offset: u64) -> StorageResult<ByteStream> {
            self.opened_at.lock().push(offset);
            let start = offset as usize;
            let mut failed = self.failed.lock();
            if !*failed && start < self.fail_after {
                *failed = true;
                let head = self.data.slice(start..self.fail_after);
                let items: Vec<std::io::Result<Bytes>> = vec![
                    Ok(head),
                    Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
                ];
                return Ok(futures::stream::iter(items).boxed());
            }
            let tail = self.data.slice(start..);
            Ok(futures::stream::iter(vec![Ok(tail)]).boxed())
        }
    }

    fn flaky(len: usize, fail_after: usize) -> FlakySource {
        FlakySource {
            data: (0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>().into(),
            fail_after,
            failed: Mutex::new(false),
            opened_at: Mutex::new(Vec::new()),
        }
    }

    #[tokio::test]
    async fn test_resume_reopens_at_written_offset() {
        let source = flaky(10_000, 3_333);
        let mut output = Vec::new();

        let written = copy_resumable(&source, &mut output, ResumeSupport::Enabled { max_resumes: 3 })
            .await
            .unwrap();

        assert_eq!(written, 10_000);
        assert_eq!(output, source.data.to_vec());
        assert_eq!(*source.opened_at.lock(), vec![0, 3_333]);
    }

    #[tokio::test]
    async fn test_disabled_resume_reports_offset() {
        let source = flaky(1_000, 400);
        let mut output = Vec::new();

        let error = copy_resumable(&source, &mut output, ResumeSupport::Disabled)
            .await
            .unwrap_err();
        assert!(matches!(error, StorageError::Interrupted { offset: 400, .. }));
    }

    #[tokio::test]
    async fn test_bytes_source_opens_at_offset() {
        let source = BytesSource::new(&b"0123456789"[..]).with_chunk_size(3);
        let mut output = Vec::new();
        let mut stream = source.open(4).await.unwrap();
        while let Some(chunk) = stream.next().await {
            output.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(output, b"456789");
    }
}
