//! Dedup Gate: declaration of uploads with instant completion for known content.

use std::sync::Arc;
use stowage_core::models::{
    ArtifactSummary, DeclareUploadRequest, DeclareUploadResponse, NewUploadSession, UploadId,
    UploadSession, UploadState,
};
use stowage_core::{AppError, Fingerprint};
use stowage_db::UploadLedger;
use stowage_storage::{keys, Storage};
use validator::Validate;

use crate::chunk_store::ChunkStore;

/// Number of chunks a declaration describes.
///
/// Explicit `total_chunks` wins, then the length of `chunk_md5s`, then
/// `ceil(size / chunk_size)`. A zero-byte file is a single empty chunk.
pub fn derive_total_chunks(request: &DeclareUploadRequest) -> Result<u32, AppError> {
    if let Some(total) = request.total_chunks {
        return Ok(total);
    }
    if let Some(md5s) = &request.chunk_md5s {
        return u32::try_from(md5s.len())
            .map_err(|_| AppError::InvalidInput("Too many chunk_md5s".to_string()));
    }
    if let Some(chunk_size) = request.chunk_size {
        if chunk_size == 0 {
            return Err(AppError::InvalidInput(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        let count = request.size.div_ceil(chunk_size).max(1);
        return u32::try_from(count)
            .map_err(|_| AppError::InvalidInput(format!("{} chunks is too many", count)));
    }
    Err(AppError::MissingParameter("total_chunks".to_string()))
}

#[derive(Clone)]
pub struct DedupGate {
    ledger: Arc<dyn UploadLedger>,
    storage: Arc<dyn Storage>,
    chunks: ChunkStore,
    max_upload_size_bytes: u64,
    max_chunk_count: u32,
}

impl DedupGate {
    pub fn new(
        ledger: Arc<dyn UploadLedger>,
        storage: Arc<dyn Storage>,
        chunks: ChunkStore,
        max_upload_size_bytes: u64,
        max_chunk_count: u32,
    ) -> Self {
        Self {
            ledger,
            storage,
            chunks,
            max_upload_size_bytes,
            max_chunk_count,
        }
    }

    fn validate_declaration(
        &self,
        owner: &str,
        request: &DeclareUploadRequest,
    ) -> Result<(NewUploadSession, Option<Vec<Fingerprint>>), AppError> {
        let upload_id = UploadId::parse(&request.upload_id)?;
        if request.whole_md5.trim().is_empty() {
            return Err(AppError::MissingParameter("whole_md5".to_string()));
        }
        request.validate()?;
        let fingerprint = Fingerprint::parse(&request.whole_md5)?;

        if request.size > self.max_upload_size_bytes {
            return Err(AppError::PayloadTooLarge(format!(
                "Declared size {} exceeds the maximum of {} bytes",
                request.size, self.max_upload_size_bytes
            )));
        }

        let total_chunks = derive_total_chunks(request)?;
        if total_chunks == 0 {
            return Err(AppError::InvalidInput(
                "total_chunks must be at least 1".to_string(),
            ));
        }
        if total_chunks > self.max_chunk_count {
            return Err(AppError::InvalidInput(format!(
                "total_chunks {} exceeds the maximum of {}",
                total_chunks, self.max_chunk_count
            )));
        }
        if u64::from(total_chunks) > request.size.max(1) {
            return Err(AppError::InvalidInput(format!(
                "{} chunks cannot cover {} bytes",
                total_chunks, request.size
            )));
        }

        let chunk_fingerprints = match &request.chunk_md5s {
            Some(md5s) => {
                if md5s.len() != total_chunks as usize {
                    return Err(AppError::InvalidInput(format!(
                        "chunk_md5s has {} entries for {} chunks",
                        md5s.len(),
                        total_chunks
                    )));
                }
                Some(
                    md5s.iter()
                        .map(|md5| Fingerprint::parse(md5))
                        .collect::<Result<Vec<_>, _>>()?,
                )
            }
            None => None,
        };

        let declaration = NewUploadSession {
            upload_id,
            owner: owner.to_string(),
            file_name: request.name.clone(),
            total_size: request.size,
            total_chunks,
            fingerprint,
            category: request.category.clone(),
        };

        Ok((declaration, chunk_fingerprints))
    }

    async fn artifact_summary(
        &self,
        session: &UploadSession,
    ) -> Result<Option<ArtifactSummary>, AppError> {
        let Some(artifact_id) = &session.artifact_id else {
            return Ok(None);
        };
        Ok(self
            .ledger
            .get_artifact(artifact_id)
            .await?
            .map(|a| ArtifactSummary::from(&a)))
    }

    /// Chunk blobs of a session completed by dedup are no longer needed
    async fn discard_staged_chunks(&self, upload_id: &UploadId) {
        if let Err(e) = self
            .storage
            .delete_prefix(&keys::staging_prefix(upload_id))
            .await
        {
            tracing::warn!(error = %e, upload_id = %upload_id, "Failed to delete staged chunks");
            return;
        }
        if let Err(e) = self.ledger.delete_consumed_chunks(upload_id).await {
            tracing::warn!(error = %e, upload_id = %upload_id, "Failed to delete consumed chunk records");
        }
    }

    /// DeclareOrCheckInstant.
    ///
    /// Returns `uploaded = true` when content with the declared fingerprint is already
    /// published; the session is then recorded COMPLETE without any chunk transfer.
    /// Otherwise a RECEIVING session exists afterwards and, when `chunk_md5s` were
    /// supplied, the response says which chunks must be (re)sent.
    #[tracing::instrument(skip(self, request), fields(upload_id = %request.upload_id, size = request.size))]
    pub async fn declare_upload(
        &self,
        owner: &str,
        request: DeclareUploadRequest,
    ) -> Result<DeclareUploadResponse, AppError> {
        let (declaration, chunk_fingerprints) = self.validate_declaration(owner, &request)?;
        let upload_id = declaration.upload_id.clone();

        let existing = self.ledger.get_session(&upload_id).await?;
        if let Some(session) = &existing {
            if !declaration.matches(session) {
                return Err(AppError::DeclarationConflict(format!(
                    "Upload {} already exists with a different declaration",
                    upload_id
                )));
            }
            if session.state == UploadState::Complete {
                return Ok(DeclareUploadResponse {
                    upload_id: upload_id.to_string(),
                    uploaded: true,
                    file: self.artifact_summary(session).await?,
                    chunk_check_result: None,
                });
            }
        }

        let instant = self
            .chunks
            .check_instant(
                &upload_id,
                &declaration.fingerprint,
                chunk_fingerprints.as_deref(),
            )
            .await?;

        if let (true, Some(file)) = (instant.already_complete, &instant.file) {
            let session = self
                .ledger
                .complete_instant(&declaration, &file.artifact_id)
                .await?;

            if session.state == UploadState::Complete {
                if existing.is_some() {
                    self.discard_staged_chunks(&upload_id).await;
                }
                tracing::info!(
                    artifact_id = %file.artifact_id,
                    "Upload completed instantly from existing content"
                );
                return Ok(DeclareUploadResponse {
                    upload_id: upload_id.to_string(),
                    uploaded: true,
                    file: self.artifact_summary(&session).await?,
                    chunk_check_result: None,
                });
            }
        }

        let session = self.ledger.create_session(&declaration).await?;
        if !declaration.matches(&session) {
            return Err(AppError::DeclarationConflict(format!(
                "Upload {} already exists with a different declaration",
                upload_id
            )));
        }

        let chunk_check_result = match &chunk_fingerprints {
            Some(_) if !instant.already_complete => Some(instant.per_chunk),
            Some(expected) => Some(self.chunks.per_chunk_report(&upload_id, expected).await?),
            None => None,
        };

        tracing::debug!(state = %session.state, "Upload declared");

        Ok(DeclareUploadResponse {
            upload_id: upload_id.to_string(),
            uploaded: session.state == UploadState::Complete,
            file: self.artifact_summary(&session).await?,
            chunk_check_result,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(total_chunks: Option<u32>, chunk_size: Option<u64>, md5s: usize) -> DeclareUploadRequest {
        DeclareUploadRequest {
            upload_id: "u1".to_string(),
            whole_md5: Fingerprint::of(b"x").to_string(),
            name: "a.bin".to_string(),
            size: 10,
            total_chunks,
            chunk_size,
            chunk_md5s: (md5s > 0).then(|| vec![Fingerprint::of(b"c").to_string(); md5s]),
            category: None,
        }
    }

    #[test]
    fn test_total_chunks_derivation_order() {
        assert_eq!(derive_total_chunks(&request(Some(2), Some(3), 5)).unwrap(), 2);
        assert_eq!(derive_total_chunks(&request(None, Some(3), 5)).unwrap(), 5);
        assert_eq!(derive_total_chunks(&request(None, Some(3), 0)).unwrap(), 4);
        assert_eq!(derive_total_chunks(&request(None, Some(10), 0)).unwrap(), 1);
        assert!(matches!(
            derive_total_chunks(&request(None, None, 0)),
            Err(AppError::MissingParameter(_))
        ));
        assert!(derive_total_chunks(&request(None, Some(0), 0)).is_err());
    }

    #[test]
    fn test_zero_byte_file_is_one_chunk() {
        let mut req = request(None, Some(1024), 0);
        req.size = 0;
        assert_eq!(derive_total_chunks(&req).unwrap(), 1);
    }
}
