//! Finished-Artifact Lookup
//!
//! Resolves artifact ids to published blobs for full and ranged reads. Locations
//! and identification digests are cached per process and revalidated against the
//! blob's modification time on every request.

mod cache;
mod range;

pub use cache::{ArtifactCache, ArtifactLocation};
pub use range::{ByteRange, ResolvedRange};

use bytes::Bytes;
use std::sync::Arc;
use stowage_core::models::{ArtifactListEntry, ArtifactSummary, CompletedArtifact};
use stowage_core::{AppError, Fingerprint, IdentificationDigest};
use stowage_db::UploadLedger;
use stowage_storage::{BlobMeta, ByteStream, Storage, StorageError};

/// A read in progress
pub struct ArtifactRead {
    pub location: ArtifactLocation,
    /// `None` for a whole-artifact read
    pub range: Option<ResolvedRange>,
    pub body: ByteStream,
}

#[derive(Clone)]
pub struct ArtifactLookup {
    ledger: Arc<dyn UploadLedger>,
    storage: Arc<dyn Storage>,
    cache: Arc<ArtifactCache>,
    identification_window: u64,
}

impl ArtifactLookup {
    pub fn new(
        ledger: Arc<dyn UploadLedger>,
        storage: Arc<dyn Storage>,
        cache_capacity: usize,
        identification_window: u64,
    ) -> Self {
        Self {
            ledger,
            storage,
            cache: Arc::new(ArtifactCache::new(cache_capacity)),
            identification_window,
        }
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    fn not_found(&self, artifact_id: &str, error: StorageError) -> AppError {
        if error.is_not_found() {
            self.cache.invalidate(artifact_id);
            AppError::ArtifactNotFound(artifact_id.to_string())
        } else {
            error.into()
        }
    }

    /// Locate a published artifact and confirm its blob is still on storage.
    #[tracing::instrument(skip(self))]
    pub async fn resolve(&self, artifact_id: &str) -> Result<ArtifactLocation, AppError> {
        if Fingerprint::parse(artifact_id).is_err() {
            return Err(AppError::ArtifactNotFound(artifact_id.to_string()));
        }

        if let Some(cached) = self.cache.get(artifact_id) {
            let meta = self
                .storage
                .head(&cached.artifact.storage_key)
                .await
                .map_err(|e| self.not_found(artifact_id, e))?;
            if cached.is_current(&meta) {
                return Ok(cached);
            }
            tracing::debug!(artifact_id = %artifact_id, "Artifact blob changed, recomputing");
            let fresh = self.locate(cached.artifact, meta).await?;
            self.cache.insert(fresh.clone());
            return Ok(fresh);
        }

        let artifact = self
            .ledger
            .get_artifact(artifact_id)
            .await?
            .ok_or_else(|| AppError::ArtifactNotFound(artifact_id.to_string()))?;
        let meta = self
            .storage
            .head(&artifact.storage_key)
            .await
            .map_err(|e| self.not_found(artifact_id, e))?;

        let location = self.locate(artifact, meta).await?;
        self.cache.insert(location.clone());
        Ok(location)
    }

    async fn locate(
        &self,
        artifact: CompletedArtifact,
        meta: BlobMeta,
    ) -> Result<ArtifactLocation, AppError> {
        let etag = self
            .identification_digest(&artifact.storage_key, meta.size)
            .await
            .map_err(|e| self.not_found(&artifact.artifact_id, e))?;
        Ok(ArtifactLocation {
            artifact,
            size: meta.size,
            modified: meta.modified,
            etag,
        })
    }

    async fn identification_digest(
        &self,
        key: &str,
        size: u64,
    ) -> Result<IdentificationDigest, StorageError> {
        let ((head_start, head_len), tail) =
            IdentificationDigest::windows(size, self.identification_window);

        let head = if head_len == 0 {
            Bytes::new()
        } else {
            self.storage
                .get_range(key, head_start, head_start + head_len)
                .await?
        };
        let tail = match tail {
            Some((start, len)) => self.storage.get_range(key, start, start + len).await?,
            None => Bytes::new(),
        };

        Ok(IdentificationDigest::compute(size, &head, &tail))
    }

    /// DownloadArtifact: open the artifact for a whole or ranged read
    #[tracing::instrument(skip(self))]
    pub async fn read(
        &self,
        artifact_id: &str,
        range: Option<ByteRange>,
    ) -> Result<ArtifactRead, AppError> {
        let location = self.resolve(artifact_id).await?;
        let range = range.map(|r| r.resolve(location.size)).transpose()?;
        let (start, end) = match range {
            Some(r) => (r.start, r.end + 1),
            None => (0, location.size),
        };

        let body = self
            .storage
            .get_range_stream(&location.artifact.storage_key, start, end)
            .await
            .map_err(|e| self.not_found(artifact_id, e))?;

        Ok(ArtifactRead {
            location,
            range,
            body,
        })
    }

    /// PNG thumbnail of an image artifact
    pub async fn thumbnail(&self, artifact_id: &str) -> Result<Bytes, AppError> {
        let location = self.resolve(artifact_id).await?;
        let key = location
            .artifact
            .thumbnail_key
            .ok_or_else(|| AppError::ArtifactNotFound(format!("{}/thumbnail", artifact_id)))?;

        self.storage.get(&key).await.map_err(|e| {
            if e.is_not_found() {
                AppError::ArtifactNotFound(format!("{}/thumbnail", artifact_id))
            } else {
                e.into()
            }
        })
    }

    /// ListArtifacts: the owner's completed uploads, newest first.
    /// Entries whose blob has gone missing are left out.
    pub async fn list(&self, owner: &str) -> Result<Vec<ArtifactListEntry>, AppError> {
        let completed = self.ledger.list_completed(owner).await?;
        let mut entries = Vec::with_capacity(completed.len());

        for (session, artifact) in completed {
            let location = match self.resolve(&artifact.artifact_id).await {
                Ok(location) => location,
                Err(AppError::ArtifactNotFound(_)) => {
                    tracing::warn!(
                        artifact_id = %artifact.artifact_id,
                        upload_id = %session.upload_id,
                        "Completed upload without a published blob"
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };
            entries.push(ArtifactListEntry {
                artifact: ArtifactSummary::from(&artifact),
                etag: location.etag.to_string(),
                upload_id: session.upload_id.to_string(),
                completed_at: session.updated_at,
            });
        }

        Ok(entries)
    }
}
