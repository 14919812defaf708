//! Chunk Store: staged chunk blobs plus their ledger records.

use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use stowage_core::models::{
    ArtifactSummary, ChunkCheck, ChunkRecord, ChunkStatus, ChunkUploadResponse, InstantCheck,
    UploadId, UploadSession, UploadState, UploadStatusResponse,
};
use stowage_core::{AppError, Fingerprint};
use stowage_db::UploadLedger;
use stowage_storage::{keys, Storage};

use crate::capacity::CapacityChecker;

/// Load a session that belongs to `owner`. Sessions of other owners are reported as
/// not found.
pub(crate) async fn load_owned_session(
    ledger: &dyn UploadLedger,
    owner: &str,
    upload_id: &UploadId,
) -> Result<UploadSession, AppError> {
    match ledger.get_session(upload_id).await? {
        Some(session) if session.owner == owner => Ok(session),
        _ => Err(AppError::UploadNotFound(upload_id.to_string())),
    }
}

/// Payloads above this size are hashed on the blocking pool
const INLINE_HASH_LIMIT: usize = 1024 * 1024;

async fn fingerprint_payload(data: &Bytes) -> Result<Fingerprint, AppError> {
    if data.len() <= INLINE_HASH_LIMIT {
        return Ok(Fingerprint::of(data));
    }
    let data = data.clone();
    tokio::task::spawn_blocking(move || Fingerprint::of(&data))
        .await
        .map_err(|e| AppError::Internal(format!("Chunk hashing task failed: {}", e)))
}

#[derive(Clone)]
pub struct ChunkStore {
    ledger: Arc<dyn UploadLedger>,
    storage: Arc<dyn Storage>,
    capacity: Option<CapacityChecker>,
    max_chunk_size_bytes: u64,
}

impl ChunkStore {
    pub fn new(
        ledger: Arc<dyn UploadLedger>,
        storage: Arc<dyn Storage>,
        capacity: Option<CapacityChecker>,
        max_chunk_size_bytes: u64,
    ) -> Self {
        Self {
            ledger,
            storage,
            capacity,
            max_chunk_size_bytes,
        }
    }

    /// Store one chunk and confirm it in the ledger.
    ///
    /// Every attempt writes its own blob, and the ledger record takes the key and
    /// fingerprint of the attempt together. Of concurrent writes to one index the
    /// last to confirm wins, and the blob it replaced is deleted.
    #[tracing::instrument(skip(self, data), fields(size_bytes = data.len()))]
    pub async fn put_chunk(
        &self,
        owner: &str,
        upload_id: &UploadId,
        chunk_index: i64,
        data: Bytes,
    ) -> Result<ChunkUploadResponse, AppError> {
        let session = load_owned_session(self.ledger.as_ref(), owner, upload_id).await?;
        let index = session.check_chunk_index(chunk_index)?;

        if data.len() as u64 > self.max_chunk_size_bytes {
            return Err(AppError::PayloadTooLarge(format!(
                "Chunk of {} bytes exceeds the maximum of {} bytes",
                data.len(),
                self.max_chunk_size_bytes
            )));
        }
        if data.len() as u64 > session.total_size {
            return Err(AppError::InvalidInput(format!(
                "Chunk of {} bytes is larger than the declared file size {}",
                data.len(),
                session.total_size
            )));
        }

        if let Some(capacity) = &self.capacity {
            capacity.check_disk_space_async(data.len() as u64).await?;
        }

        let start = std::time::Instant::now();
        let fingerprint = fingerprint_payload(&data).await?;
        let record = ChunkRecord {
            upload_id: upload_id.clone(),
            chunk_index: index,
            status: ChunkStatus::Receiving,
            owner: owner.to_string(),
            fingerprint: fingerprint.clone(),
            storage_key: keys::chunk_key(upload_id, index),
            size_bytes: data.len() as u64,
            uploaded_at: Utc::now(),
        };

        // Rejects sessions that started assembling or completed since the read above
        self.ledger.begin_chunk(&record).await?;

        if let Err(e) = self.storage.put(&record.storage_key, data).await {
            tracing::warn!(
                error = %e,
                storage_key = %record.storage_key,
                "Chunk write failed; session stays open for retry"
            );
            return Err(e.into());
        }

        let confirmation = match self.ledger.confirm_chunk(&record).await {
            Ok(confirmation) => confirmation,
            Err(e) => {
                // Session purged, assembling or complete: nothing references the blob
                if matches!(
                    e,
                    AppError::UploadNotFound(_)
                        | AppError::AssemblyInProgress(_)
                        | AppError::DeclarationConflict(_)
                ) {
                    self.discard_blob(&record.storage_key).await;
                }
                return Err(e);
            }
        };
        if let Some(replaced) = &confirmation.replaced_key {
            self.discard_blob(replaced).await;
        }

        tracing::info!(
            state = %confirmation.session.state,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Chunk confirmed"
        );

        Ok(ChunkUploadResponse {
            chunk_index: index,
            chunk_md5: fingerprint.to_string(),
        })
    }

    /// Best effort: leftovers under the staging prefix go with the session
    async fn discard_blob(&self, storage_key: &str) {
        if let Err(e) = self.storage.delete(storage_key).await {
            tracing::warn!(error = %e, storage_key = %storage_key, "Failed to delete unreferenced chunk blob");
        }
    }

    /// Indices currently CONFIRMED, ascending
    pub async fn list_confirmed(
        &self,
        owner: &str,
        upload_id: &UploadId,
    ) -> Result<Vec<u32>, AppError> {
        load_owned_session(self.ledger.as_ref(), owner, upload_id).await?;
        self.confirmed_indices(upload_id).await
    }

    pub(crate) async fn confirmed_indices(&self, upload_id: &UploadId) -> Result<Vec<u32>, AppError> {
        Ok(self
            .ledger
            .list_chunks(upload_id)
            .await?
            .into_iter()
            .filter(|c| c.status == ChunkStatus::Confirmed)
            .map(|c| c.chunk_index)
            .collect())
    }

    /// Compare expected per-chunk fingerprints with what is CONFIRMED for `upload_id`.
    ///
    /// Unknown uploads report every chunk as absent.
    pub async fn per_chunk_report(
        &self,
        upload_id: &UploadId,
        expected: &[Fingerprint],
    ) -> Result<Vec<ChunkCheck>, AppError> {
        let chunks = self.ledger.list_chunks(upload_id).await?;

        Ok(expected
            .iter()
            .enumerate()
            .map(|(index, expected_fp)| {
                let confirmed = chunks.iter().find(|c| {
                    c.chunk_index as usize == index && c.status == ChunkStatus::Confirmed
                });
                ChunkCheck {
                    chunk_index: index as u32,
                    present: confirmed.is_some(),
                    matches: confirmed.is_some_and(|c| &c.fingerprint == expected_fp),
                }
            })
            .collect())
    }

    /// Report whether the whole file already exists, or which chunks still need sending
    pub async fn check_instant(
        &self,
        upload_id: &UploadId,
        whole_fingerprint: &Fingerprint,
        chunk_fingerprints: Option<&[Fingerprint]>,
    ) -> Result<InstantCheck, AppError> {
        if let Some(artifact) = self
            .ledger
            .find_artifact_by_fingerprint(whole_fingerprint)
            .await?
        {
            if self.storage.exists(&artifact.storage_key).await? {
                return Ok(InstantCheck {
                    already_complete: true,
                    file: Some(ArtifactSummary::from(&artifact)),
                    per_chunk: Vec::new(),
                });
            }
            tracing::warn!(
                artifact_id = %artifact.artifact_id,
                storage_key = %artifact.storage_key,
                "Artifact record without blob; not eligible for instant completion"
            );
        }

        let per_chunk = match chunk_fingerprints {
            Some(expected) => self.per_chunk_report(upload_id, expected).await?,
            None => Vec::new(),
        };

        Ok(InstantCheck {
            already_complete: false,
            file: None,
            per_chunk,
        })
    }

    /// QueryStatus: what a resuming client still has to send
    pub async fn status(
        &self,
        owner: &str,
        upload_id: &UploadId,
        whole_fingerprint: Option<&Fingerprint>,
    ) -> Result<UploadStatusResponse, AppError> {
        let session = load_owned_session(self.ledger.as_ref(), owner, upload_id).await?;

        if let Some(fp) = whole_fingerprint {
            if fp != &session.fingerprint {
                return Err(AppError::DeclarationConflict(format!(
                    "Upload {} was declared with a different whole_md5",
                    upload_id
                )));
            }
        }

        let file = match (&session.state, &session.artifact_id) {
            (UploadState::Complete, Some(artifact_id)) => self
                .ledger
                .get_artifact(artifact_id)
                .await?
                .map(|a| ArtifactSummary::from(&a)),
            _ => None,
        };

        let confirmed_chunk_indices = if session.state == UploadState::Complete {
            (0..session.total_chunks).collect()
        } else {
            self.confirmed_indices(upload_id).await?
        };

        Ok(UploadStatusResponse {
            upload_id: upload_id.to_string(),
            state: session.state,
            total_chunks: session.total_chunks,
            confirmed_chunk_indices,
            uploaded: session.state == UploadState::Complete,
            file,
            last_error: session.last_error,
        })
    }
}
