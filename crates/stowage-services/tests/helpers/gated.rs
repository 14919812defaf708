//! Storage wrapper that can hold one write open, to line up concurrent operations.

use async_trait::async_trait;
use bytes::Bytes;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use stowage_services::{LocalStorage, Storage, StorageResult};
use stowage_storage::{BlobMeta, ByteStream};
use tokio::io::AsyncRead;
use tokio::sync::Notify;

struct Gate {
    key_prefix: String,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

/// Handle to a held write
pub struct HeldWrite {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl HeldWrite {
    /// Wait until the write has reached storage and is parked
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let the write through
    pub fn release(&self) {
        self.release.notify_one();
    }
}

pub struct GatedStorage {
    inner: Arc<LocalStorage>,
    gate: Mutex<Option<Gate>>,
}

impl GatedStorage {
    pub fn new(inner: Arc<LocalStorage>) -> Self {
        Self {
            inner,
            gate: Mutex::new(None),
        }
    }

    /// Park the next `put` or `put_stream` whose key starts with `key_prefix`
    pub fn hold_next_write(&self, key_prefix: &str) -> HeldWrite {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Gate {
            key_prefix: key_prefix.to_string(),
            entered: entered.clone(),
            release: release.clone(),
        });
        HeldWrite { entered, release }
    }

    async fn pass(&self, key: &str) {
        let gate = {
            let mut slot = self.gate.lock().unwrap();
            match slot.as_ref() {
                Some(gate) if key.starts_with(&gate.key_prefix) => slot.take(),
                _ => None,
            }
        };
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
    }
}

#[async_trait]
impl Storage for GatedStorage {
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<u64> {
        self.pass(key).await;
        self.inner.put(key, data).await
    }

    async fn put_stream(
        &self,
        key: &str,
        reader: Pin<Box<dyn AsyncRead + Send + Unpin>>,
    ) -> StorageResult<u64> {
        self.pass(key).await;
        self.inner.put_stream(key, reader).await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.inner.get(key).await
    }

    async fn get_range(&self, key: &str, start: u64, end: u64) -> StorageResult<Bytes> {
        self.inner.get_range(key, start, end).await
    }

    async fn get_range_stream(&self, key: &str, start: u64, end: u64) -> StorageResult<ByteStream> {
        self.inner.get_range_stream(key, start, end).await
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        self.inner.get_stream(key).await
    }

    async fn head(&self, key: &str) -> StorageResult<BlobMeta> {
        self.inner.head(key).await
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }

    async fn rename(&self, from_key: &str, to_key: &str) -> StorageResult<()> {
        self.inner.rename(from_key, to_key).await
    }

    async fn delete_prefix(&self, prefix: &str) -> StorageResult<()> {
        self.inner.delete_prefix(prefix).await
    }
}
