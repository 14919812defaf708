//! Storage abstraction trait
//!
//! This module defines the Storage trait that blob backends implement. The upload
//! core stages chunks, assembles artifacts and serves range reads through it.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::time::SystemTime;
use stowage_core::AppError;
use thiserror::Error;
use tokio::io::AsyncRead;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::NotFound(_) => true,
            StorageError::IoError(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidKey(msg) | StorageError::InvalidRange(msg) => {
                AppError::InvalidInput(msg)
            }
            StorageError::ConfigError(msg) => AppError::Internal(msg),
            // Everything else is I/O from the caller's point of view and worth a retry.
            other => AppError::StorageIO(other.to_string()),
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Boxed stream of blob bytes
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

/// Size and modification time of a stored blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobMeta {
    pub size: u64,
    pub modified: Option<SystemTime>,
}

/// Blob storage abstraction
///
/// Keys are relative, `/`-separated paths such as `artifacts/{artifact_id}`.
/// Writes are atomic: a reader never observes a partially written blob under its
/// final key.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Write `data` to `key`, replacing any existing blob. Returns bytes written.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<u64>;

    /// Write a blob from a reader until EOF, replacing any existing blob.
    ///
    /// Nothing is visible under `key` until the whole stream has been persisted.
    async fn put_stream(
        &self,
        key: &str,
        reader: Pin<Box<dyn AsyncRead + Send + Unpin>>,
    ) -> StorageResult<u64>;

    /// Read a whole blob into memory
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Read bytes `[start, end)` of a blob into memory. Bounded in size; meant for
    /// sniffing and sampling, not for serving large ranges.
    async fn get_range(&self, key: &str, start: u64, end: u64) -> StorageResult<Bytes>;

    /// Stream bytes `[start, end)` of a blob
    async fn get_range_stream(&self, key: &str, start: u64, end: u64)
        -> StorageResult<ByteStream>;

    /// Stream a whole blob
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream>;

    /// Size and modification time, or `NotFound`
    async fn head(&self, key: &str) -> StorageResult<BlobMeta>;

    /// Check if a blob exists
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Delete a blob. Deleting a missing blob succeeds.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Atomically move a blob to a new key, replacing any blob there.
    async fn rename(&self, from_key: &str, to_key: &str) -> StorageResult<()>;

    /// Delete every blob under a key prefix (a directory for filesystem backends)
    async fn delete_prefix(&self, prefix: &str) -> StorageResult<()>;
}
