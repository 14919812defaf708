use crate::traits::{BlobMeta, ByteStream, Storage, StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use uuid::Uuid;

/// Largest range `get_range` will buffer in memory (16 MiB).
const MAX_BUFFERED_RANGE: u64 = 16 * 1024 * 1024;

/// Local filesystem storage implementation
#[derive(Clone, Debug)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at `base_path` (created if missing)
    pub async fn new(base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(LocalStorage { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Convert storage key to filesystem path with security validation
    ///
    /// Rejects keys that could escape the base storage directory.
    fn key_to_path(&self, storage_key: &str) -> StorageResult<PathBuf> {
        if storage_key.is_empty()
            || storage_key.contains("..")
            || storage_key.contains('\\')
            || storage_key.starts_with('/')
        {
            return Err(StorageError::InvalidKey(format!(
                "Storage key contains invalid characters: {:?}",
                storage_key
            )));
        }

        let path = self.base_path.join(storage_key);

        if let Ok(canonical) = path.canonicalize() {
            let base_canonical = self.base_path.canonicalize().map_err(|e| {
                StorageError::ConfigError(format!("Failed to canonicalize base path: {}", e))
            })?;
            if canonical.strip_prefix(&base_canonical).is_err() {
                return Err(StorageError::InvalidKey(
                    "Storage key resolves outside storage directory".to_string(),
                ));
            }
        }

        Ok(path)
    }

    /// Ensure parent directory exists
    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Sibling temp path, unique per write so concurrent writers never share a file
    fn temp_path(path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        path.with_file_name(format!(".{}.tmp.{}", name, Uuid::new_v4()))
    }

    async fn open_existing(&self, storage_key: &str, path: &Path) -> StorageResult<fs::File> {
        fs::File::open(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(storage_key.to_string())
            } else {
                StorageError::DownloadFailed(format!(
                    "Failed to open file {}: {}",
                    path.display(),
                    e
                ))
            }
        })
    }

    /// Copy `reader` into a temp file, fsync, then rename over `path`.
    async fn write_atomically<R>(&self, path: &Path, reader: &mut R) -> StorageResult<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.ensure_parent_dir(path).await?;
        let temp_path = Self::temp_path(path);

        let result = async {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                StorageError::UploadFailed(format!(
                    "Failed to create file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            let written = tokio::io::copy(reader, &mut file).await.map_err(|e| {
                StorageError::UploadFailed(format!(
                    "Failed to write file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.flush().await?;
            file.sync_all().await.map_err(|e| {
                StorageError::UploadFailed(format!(
                    "Failed to sync file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            drop(file);

            fs::rename(&temp_path, path).await.map_err(|e| {
                StorageError::UploadFailed(format!(
                    "Failed to move {} into place: {}",
                    path.display(),
                    e
                ))
            })?;

            Ok::<u64, StorageError>(written)
        }
        .await;

        if result.is_err() {
            let _ = fs::remove_file(&temp_path).await;
        }
        result
    }

    fn check_range(start: u64, end: u64) -> StorageResult<()> {
        if end < start {
            return Err(StorageError::InvalidRange(format!(
                "end ({}) < start ({})",
                end, start
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<u64> {
        let path = self.key_to_path(key)?;
        let start = std::time::Instant::now();

        let mut reader: &[u8] = &data;
        let written = self.write_atomically(&path, &mut reader).await?;

        tracing::debug!(
            key = %key,
            size_bytes = written,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage put successful"
        );

        Ok(written)
    }

    async fn put_stream(
        &self,
        key: &str,
        mut reader: Pin<Box<dyn AsyncRead + Send + Unpin>>,
    ) -> StorageResult<u64> {
        let path = self.key_to_path(key)?;
        let start = std::time::Instant::now();

        let written = self.write_atomically(&path, &mut reader).await?;

        tracing::info!(
            key = %key,
            size_bytes = written,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage stream put successful"
        );

        Ok(written)
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.key_to_path(key)?;
        let data = fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::DownloadFailed(format!(
                    "Failed to read file {}: {}",
                    path.display(),
                    e
                ))
            }
        })?;
        Ok(Bytes::from(data))
    }

    async fn get_range(&self, key: &str, start: u64, end: u64) -> StorageResult<Bytes> {
        Self::check_range(start, end)?;
        let len = end - start;
        if len > MAX_BUFFERED_RANGE {
            return Err(StorageError::InvalidRange(format!(
                "range size {} exceeds maximum {} bytes",
                len, MAX_BUFFERED_RANGE
            )));
        }

        let path = self.key_to_path(key)?;
        let mut file = self.open_existing(key, &path).await?;
        let size = file.metadata().await?.len();
        if end > size {
            return Err(StorageError::InvalidRange(format!(
                "range end {} beyond blob size {}",
                end, size
            )));
        }

        file.seek(SeekFrom::Start(start)).await?;
        let mut buf = vec![0u8; len as usize];
        file.read_exact(&mut buf).await?;

        Ok(Bytes::from(buf))
    }

    async fn get_range_stream(
        &self,
        key: &str,
        start: u64,
        end: u64,
    ) -> StorageResult<ByteStream> {
        Self::check_range(start, end)?;

        let path = self.key_to_path(key)?;
        let mut file = self.open_existing(key, &path).await?;
        let size = file.metadata().await?.len();
        if end > size {
            return Err(StorageError::InvalidRange(format!(
                "range end {} beyond blob size {}",
                end, size
            )));
        }
        file.seek(SeekFrom::Start(start)).await?;

        let stream = tokio_util::io::ReaderStream::new(file.take(end - start)).map(|result| {
            result.map_err(|e| StorageError::DownloadFailed(format!("Failed to read chunk: {}", e)))
        });

        Ok(Box::pin(stream))
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        let path = self.key_to_path(key)?;
        let file = self.open_existing(key, &path).await?;

        let stream = tokio_util::io::ReaderStream::new(file).map(|result| {
            result.map_err(|e| StorageError::DownloadFailed(format!("Failed to read chunk: {}", e)))
        });

        Ok(Box::pin(stream))
    }

    async fn head(&self, key: &str) -> StorageResult<BlobMeta> {
        let path = self.key_to_path(key)?;
        let meta = fs::metadata(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::BackendError(e.to_string())
            }
        })?;

        if !meta.is_file() {
            return Err(StorageError::NotFound(key.to_string()));
        }

        Ok(BlobMeta {
            size: meta.len(),
            modified: meta.modified().ok(),
        })
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.key_to_path(key)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_to_path(key)?;

        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(key = %key, "Local storage delete successful");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::DeleteFailed(format!(
                "Failed to delete file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn rename(&self, from_key: &str, to_key: &str) -> StorageResult<()> {
        let from_path = self.key_to_path(from_key)?;
        let to_path = self.key_to_path(to_key)?;
        self.ensure_parent_dir(&to_path).await?;

        fs::rename(&from_path, &to_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(from_key.to_string())
            } else {
                StorageError::BackendError(format!(
                    "Failed to rename {} to {}: {}",
                    from_path.display(),
                    to_path.display(),
                    e
                ))
            }
        })?;

        tracing::debug!(from_key = %from_key, to_key = %to_key, "Local storage rename successful");
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> StorageResult<()> {
        let path = self.key_to_path(prefix.trim_end_matches('/'))?;

        let meta = match fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let result = if meta.is_dir() {
            fs::remove_dir_all(&path).await
        } else {
            fs::remove_file(&path).await
        };

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::DeleteFailed(format!(
                "Failed to delete {}: {}",
                path.display(),
                e
            ))),
        }
    }
}
