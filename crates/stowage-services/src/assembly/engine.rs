use bytes::Bytes;
use chrono::Utc;
use futures::{stream, StreamExt, TryStreamExt};
use std::collections::HashSet;
use std::io;
use std::sync::{Arc, Mutex};
use stowage_core::content::SNIFF_LEN;
use stowage_core::models::{
    AssemblyClaim, ChunkStatus, CompletedArtifact, MergeChunksRequest, UploadId, UploadSession,
    UploadState,
};
use stowage_core::{classify, AppError, Config, Fingerprint, StrictHasher};
use stowage_db::UploadLedger;
use stowage_storage::{keys, Storage};
use tokio::sync::Semaphore;
use tokio_util::io::StreamReader;
use validator::Validate;

use crate::capacity::CapacityChecker;
use crate::chunk_store::load_owned_session;
use crate::thumbnail::generate_thumbnail;

/// Assembly engine configuration
#[derive(Debug, Clone)]
pub struct AssemblyConfig {
    pub max_concurrent_assemblies: usize,
    pub thumbnail_max_dimension: u32,
    /// How long a session may sit in ASSEMBLING before the recovery sweep takes over
    pub stale_after: chrono::Duration,
    /// No other process writes the ledger
    pub owns_ledger: bool,
}

impl AssemblyConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_concurrent_assemblies: config.max_concurrent_assemblies(),
            thumbnail_max_dimension: config.thumbnail_max_dimension(),
            stale_after: chrono::Duration::seconds(config.assembly_stale_after_secs()),
            owns_ledger: config.owns_ledger(),
        }
    }
}

/// Removes a claim from the in-flight set when its assembly task ends
struct InFlight {
    set: Arc<Mutex<HashSet<AssemblyClaim>>>,
    claim: AssemblyClaim,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.claim);
        }
    }
}

/// Assembly Engine: concatenates confirmed chunks, verifies and publishes the result.
///
/// Assemblies run on spawned tasks bounded by a semaphore, so a slow assembly
/// never runs on the request path of chunk uploads.
#[derive(Clone)]
pub struct AssemblyEngine {
    pub(super) ledger: Arc<dyn UploadLedger>,
    pub(super) storage: Arc<dyn Storage>,
    capacity: Option<CapacityChecker>,
    permits: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashSet<AssemblyClaim>>>,
    pub(super) config: AssemblyConfig,
}

impl AssemblyEngine {
    pub fn new(
        ledger: Arc<dyn UploadLedger>,
        storage: Arc<dyn Storage>,
        capacity: Option<CapacityChecker>,
        config: AssemblyConfig,
    ) -> Self {
        tracing::info!(
            max_concurrent_assemblies = config.max_concurrent_assemblies,
            "Assembly engine initialized"
        );
        Self {
            ledger,
            storage,
            capacity,
            permits: Arc::new(Semaphore::new(config.max_concurrent_assemblies.max(1))),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            config,
        }
    }

    /// Whether `claim` is held by an assembly of this process, queued or running
    pub fn is_in_flight(&self, claim: &AssemblyClaim) -> bool {
        self.in_flight
            .lock()
            .map(|set| set.contains(claim))
            .unwrap_or(false)
    }

    fn track(&self, claim: &AssemblyClaim) -> InFlight {
        if let Ok(mut set) = self.in_flight.lock() {
            set.insert(claim.clone());
        }
        InFlight {
            set: self.in_flight.clone(),
            claim: claim.clone(),
        }
    }

    /// MergeChunks: validate the request against the declaration and assemble.
    ///
    /// Re-running it on a COMPLETE session returns the same artifact without work.
    #[tracing::instrument(skip(self, request))]
    pub async fn merge_chunks(
        &self,
        owner: &str,
        upload_id: &UploadId,
        request: MergeChunksRequest,
    ) -> Result<CompletedArtifact, AppError> {
        if request.whole_md5.trim().is_empty() {
            return Err(AppError::MissingParameter("whole_md5".to_string()));
        }
        request.validate()?;
        let fingerprint = Fingerprint::parse(&request.whole_md5)?;

        let session = load_owned_session(self.ledger.as_ref(), owner, upload_id).await?;

        if fingerprint != session.fingerprint || request.size != session.total_size {
            return Err(AppError::DeclarationConflict(format!(
                "Merge request for {} does not match its declaration",
                upload_id
            )));
        }

        if session.state == UploadState::Complete {
            return self.completed_artifact(&session).await;
        }

        let confirmed = self.confirmed_indices(upload_id).await?;
        if request.total_chunks != session.total_chunks {
            return Err(AppError::ChunkCountMismatch {
                declared: request.total_chunks,
                confirmed: confirmed.len() as u32,
            });
        }

        if !session.missing_chunks(&confirmed).is_empty() {
            return self.unavailable(upload_id).await;
        }

        if request.category.is_some() {
            self.ledger
                .set_category(upload_id, request.category.as_deref())
                .await?;
        }

        self.assemble(upload_id).await
    }

    /// Assemble a READY_TO_ASSEMBLE upload.
    ///
    /// Fails with `ChunksIncomplete` naming the missing indices, or with
    /// `AssemblyInProgress` when another assembly holds the upload.
    pub async fn assemble(&self, upload_id: &UploadId) -> Result<CompletedArtifact, AppError> {
        let session = self
            .ledger
            .get_session(upload_id)
            .await?
            .ok_or_else(|| AppError::UploadNotFound(upload_id.to_string()))?;

        match session.state {
            UploadState::Complete => return self.completed_artifact(&session).await,
            UploadState::Assembling => {
                return Err(AppError::AssemblyInProgress(upload_id.to_string()))
            }
            _ => {}
        }

        if !session
            .missing_chunks(&self.confirmed_indices(upload_id).await?)
            .is_empty()
        {
            return self.unavailable(upload_id).await;
        }

        if let Some(capacity) = &self.capacity {
            capacity.check_disk_space_async(session.total_size).await?;
        }

        // Write-ahead: ASSEMBLING is recorded before any blob is produced
        let Some(claimed) = self.ledger.try_begin_assembly(upload_id).await? else {
            return self.unavailable(upload_id).await;
        };
        let claim = AssemblyClaim::of(&claimed).ok_or_else(|| {
            AppError::Internal(format!("Upload {} was claimed without a start time", upload_id))
        })?;

        // In flight from the claim on, so a queued assembly is never taken for orphaned
        let in_flight = self.track(&claim);
        let engine = self.clone();
        let handle = tokio::spawn(async move {
            let _in_flight = in_flight;
            let _permit = match engine.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    let err = AppError::Internal(format!("Assembly pool closed: {}", e));
                    engine.abandon(&claim, &err).await;
                    return Err(err);
                }
            };
            engine.run_claimed(claimed, claim).await
        });

        handle
            .await
            .map_err(|e| AppError::Internal(format!("Assembly task failed: {}", e)))?
    }

    async fn confirmed_indices(&self, upload_id: &UploadId) -> Result<Vec<u32>, AppError> {
        Ok(self
            .ledger
            .list_chunks(upload_id)
            .await?
            .into_iter()
            .filter(|c| c.status == ChunkStatus::Confirmed)
            .map(|c| c.chunk_index)
            .collect())
    }

    pub(super) async fn completed_artifact(
        &self,
        session: &UploadSession,
    ) -> Result<CompletedArtifact, AppError> {
        let artifact_id = session
            .artifact_id
            .as_deref()
            .ok_or_else(|| AppError::Internal(format!("Upload {} has no artifact", session.upload_id)))?;
        self.ledger
            .get_artifact(artifact_id)
            .await?
            .ok_or_else(|| AppError::ArtifactNotFound(artifact_id.to_string()))
    }

    /// Re-read the session to report why it cannot be assembled right now.
    ///
    /// A concurrent assembly may have completed (or consumed the chunks) since the
    /// caller's read; that case returns the finished artifact.
    async fn unavailable(&self, upload_id: &UploadId) -> Result<CompletedArtifact, AppError> {
        let session = self
            .ledger
            .get_session(upload_id)
            .await?
            .ok_or_else(|| AppError::UploadNotFound(upload_id.to_string()))?;

        match session.state {
            UploadState::Complete => self.completed_artifact(&session).await,
            UploadState::Assembling => Err(AppError::AssemblyInProgress(upload_id.to_string())),
            _ => {
                let missing = session.missing_chunks(&self.confirmed_indices(upload_id).await?);
                if missing.is_empty() {
                    Err(AppError::AssemblyInProgress(upload_id.to_string()))
                } else {
                    Err(AppError::ChunksIncomplete { missing })
                }
            }
        }
    }

    /// Run a claimed assembly to completion or back to a retryable state
    #[tracing::instrument(skip(self, session, claim), fields(upload_id = %session.upload_id, size_bytes = session.total_size))]
    async fn run_claimed(
        &self,
        session: UploadSession,
        claim: AssemblyClaim,
    ) -> Result<CompletedArtifact, AppError> {
        let start = std::time::Instant::now();

        match self.build_and_publish(&session, &claim).await {
            Ok(None) => {
                tracing::warn!("Assembly claim was superseded before commit");
                self.unavailable(&session.upload_id).await
            }
            Ok(Some(artifact)) => {
                tracing::info!(
                    artifact_id = %artifact.artifact_id,
                    content_class = %artifact.content_class,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Assembly completed"
                );
                self.reclaim_chunks(&session.upload_id).await;
                Ok(artifact)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Assembly failed");
                self.abandon(&claim, &e).await;
                Err(e)
            }
        }
    }

    /// Drop the staged output and hand the upload back to the client as FAILED.
    /// Chunk records stay CONFIRMED. A superseded claim leaves the session alone.
    async fn abandon(&self, claim: &AssemblyClaim, error: &AppError) {
        let upload_id = &claim.upload_id;
        if let Err(e) = self.storage.delete(&keys::assembly_key(claim)).await {
            tracing::warn!(error = %e, upload_id = %upload_id, "Failed to delete staged assembly");
        }
        match self.ledger.fail_assembly(claim, &error.to_string()).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(upload_id = %upload_id, "Assembly claim superseded; failure not recorded")
            }
            Err(e) => tracing::error!(
                error = %e,
                upload_id = %upload_id,
                "Failed to record assembly failure; recovery sweep will release the upload"
            ),
        }
    }

    /// `None` when the claim was superseded before the ledger commit
    async fn build_and_publish(
        &self,
        session: &UploadSession,
        claim: &AssemblyClaim,
    ) -> Result<Option<CompletedArtifact>, AppError> {
        let upload_id = &session.upload_id;

        let mut chunks: Vec<_> = self
            .ledger
            .list_chunks(upload_id)
            .await?
            .into_iter()
            .filter(|c| c.status == ChunkStatus::Confirmed)
            .collect();
        chunks.sort_by_key(|c| c.chunk_index);
        let confirmed: Vec<u32> = chunks.iter().map(|c| c.chunk_index).collect();
        let missing = session.missing_chunks(&confirmed);
        if !missing.is_empty() {
            return Err(AppError::ChunksIncomplete { missing });
        }

        let staged_key = keys::assembly_key(claim);
        let chunk_keys = chunks.into_iter().map(|c| c.storage_key).collect();
        self.concatenate(&staged_key, chunk_keys).await?;

        let (fingerprint, size) = self.fingerprint_blob(&staged_key).await?;
        verify_assembled(session, &fingerprint, size)?;

        let artifact_key = keys::artifact_key(&CompletedArtifact::id_for(&fingerprint));
        self.storage.rename(&staged_key, &artifact_key).await?;

        let artifact = self
            .describe_published(session, fingerprint, &artifact_key, size)
            .await?;
        self.ledger.commit_assembly(claim, &artifact).await
    }

    /// Stream the chunk blobs, in order, into one staged blob
    async fn concatenate(&self, staged_key: &str, chunk_keys: Vec<String>) -> Result<u64, AppError> {
        let storage = self.storage.clone();
        let bytes = stream::iter(chunk_keys)
            .then(move |key| {
                let storage = storage.clone();
                async move { storage.get_stream(&key).await }
            })
            .try_flatten()
            .map_err(io::Error::other);
        let reader = StreamReader::new(Box::pin(bytes));

        Ok(self.storage.put_stream(staged_key, Box::pin(reader)).await?)
    }

    /// Strict fingerprint and length of a stored blob
    pub(super) async fn fingerprint_blob(&self, key: &str) -> Result<(Fingerprint, u64), AppError> {
        let mut stream = self.storage.get_stream(key).await?;
        let mut hasher = StrictHasher::new();
        while let Some(chunk) = stream.next().await {
            hasher.update(&chunk?);
        }
        let size = hasher.bytes_hashed();
        Ok((hasher.finalize(), size))
    }

    /// Build the artifact record for a blob already at its published key
    pub(super) async fn describe_published(
        &self,
        session: &UploadSession,
        fingerprint: Fingerprint,
        artifact_key: &str,
        size: u64,
    ) -> Result<CompletedArtifact, AppError> {
        let head = if size == 0 {
            Bytes::new()
        } else {
            self.storage
                .get_range(artifact_key, 0, size.min(SNIFF_LEN as u64))
                .await?
        };
        let classification = classify(&head);
        let artifact_id = CompletedArtifact::id_for(&fingerprint);

        let thumbnail_key = if classification.class.is_image() {
            self.thumbnail_for(&artifact_id, artifact_key, size).await
        } else {
            None
        };

        Ok(CompletedArtifact {
            artifact_id,
            fingerprint,
            storage_key: artifact_key.to_string(),
            file_name: session.file_name.clone(),
            size_bytes: size,
            mime_type: classification.mime_type,
            content_class: classification.class,
            thumbnail_key,
            owner: session.owner.clone(),
            category: session.category.clone(),
            complete: true,
            created_at: Utc::now(),
        })
    }

    /// Best effort: a failed thumbnail only leaves the reference empty
    async fn thumbnail_for(&self, artifact_id: &str, artifact_key: &str, size: u64) -> Option<String> {
        let thumbnail_key = keys::thumbnail_key(artifact_id);
        if let Ok(true) = self.storage.exists(&thumbnail_key).await {
            return Some(thumbnail_key);
        }

        match generate_thumbnail(
            self.storage.as_ref(),
            artifact_key,
            &thumbnail_key,
            size,
            self.config.thumbnail_max_dimension,
        )
        .await
        {
            Ok(_) => Some(thumbnail_key),
            Err(e) => {
                tracing::warn!(error = %e, artifact_id = %artifact_id, "Thumbnail generation failed");
                None
            }
        }
    }

    /// Delete the staging area of a completed upload, then its consumed chunk records.
    /// Failures are left for the janitor.
    pub(super) async fn reclaim_chunks(&self, upload_id: &UploadId) {
        if let Err(e) = self
            .storage
            .delete_prefix(&keys::staging_prefix(upload_id))
            .await
        {
            tracing::warn!(error = %e, upload_id = %upload_id, "Failed to delete consumed chunks");
            return;
        }
        if let Err(e) = self.ledger.delete_consumed_chunks(upload_id).await {
            tracing::warn!(error = %e, upload_id = %upload_id, "Failed to delete consumed chunk records");
        }
    }
}

/// Compare an assembled blob with the session's declaration
pub(super) fn verify_assembled(
    session: &UploadSession,
    fingerprint: &Fingerprint,
    size: u64,
) -> Result<(), AppError> {
    if size != session.total_size {
        return Err(AppError::IntegrityMismatch {
            expected: format!("{} bytes", session.total_size),
            actual: format!("{} bytes", size),
        });
    }
    if fingerprint != &session.fingerprint {
        return Err(AppError::IntegrityMismatch {
            expected: session.fingerprint.to_string(),
            actual: fingerprint.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(data: &[u8]) -> UploadSession {
        UploadSession {
            upload_id: UploadId::parse("u1").unwrap(),
            owner: "alice".to_string(),
            file_name: "a.bin".to_string(),
            total_size: data.len() as u64,
            total_chunks: 1,
            fingerprint: Fingerprint::of(data),
            state: UploadState::Assembling,
            category: None,
            artifact_id: None,
            last_error: None,
            assembly_started_at: Some(Utc::now()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_verify_assembled() {
        let s = session(b"hello");
        assert!(verify_assembled(&s, &Fingerprint::of(b"hello"), 5).is_ok());
        assert!(matches!(
            verify_assembled(&s, &Fingerprint::of(b"hellO"), 5),
            Err(AppError::IntegrityMismatch { .. })
        ));
        assert!(matches!(
            verify_assembled(&s, &Fingerprint::of(b"hello"), 6),
            Err(AppError::IntegrityMismatch { .. })
        ));
    }
}
