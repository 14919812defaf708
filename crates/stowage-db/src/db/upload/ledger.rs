use async_trait::async_trait;
use chrono::{DateTime, Utc};
use stowage_core::models::{
    AssemblyClaim, ChunkRecord, ChunkStatus, CompletedArtifact, NewUploadSession, UploadId,
    UploadSession, UploadState,
};
use stowage_core::{AppError, Fingerprint};

/// States from which an upload may be claimed for assembly or accept chunk writes
pub const CHUNK_ACCEPTING_STATES: [UploadState; 3] = [
    UploadState::Receiving,
    UploadState::ReadyToAssemble,
    UploadState::Failed,
];

/// Error for a chunk write against a session that no longer accepts chunks
pub fn chunk_write_rejected(session: &UploadSession) -> AppError {
    match session.state {
        UploadState::Assembling => AppError::AssemblyInProgress(session.upload_id.to_string()),
        _ => AppError::DeclarationConflict(format!(
            "Upload {} is already complete",
            session.upload_id
        )),
    }
}

/// State a chunk-accepting session lands in after a confirmation
pub fn readiness(confirmed: u64, total_chunks: u32) -> UploadState {
    if confirmed >= u64::from(total_chunks) {
        UploadState::ReadyToAssemble
    } else {
        UploadState::Receiving
    }
}

/// Result of confirming one chunk write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkConfirmation {
    /// Session after its readiness was recomputed
    pub session: UploadSession,
    /// Blob of the CONFIRMED record this write replaced, now unreferenced
    pub replaced_key: Option<String>,
}

/// Storage key a confirmation of `new_key` leaves unreferenced.
///
/// Only a CONFIRMED predecessor counts: a RECEIVING record belongs to a write that
/// may still be in flight and will confirm its own key.
pub fn replaced_key(previous: Option<(&ChunkStatus, &str)>, new_key: &str) -> Option<String> {
    match previous {
        Some((ChunkStatus::Confirmed, key)) if key != new_key => Some(key.to_string()),
        _ => None,
    }
}

/// Durable record of uploads, their chunks and the published artifacts.
///
/// Every mutation is keyed by `upload_id` or `(upload_id, chunk_index)`; writes to
/// the artifact table only happen inside [`UploadLedger::commit_assembly`] and
/// [`UploadLedger::complete_instant`].
#[async_trait]
pub trait UploadLedger: Send + Sync {
    /// Insert a RECEIVING session. When `upload_id` already exists the stored
    /// session is returned unchanged; callers compare it with the declaration.
    async fn create_session(&self, new: &NewUploadSession) -> Result<UploadSession, AppError>;

    /// Record `new` as COMPLETE and linked to an existing artifact.
    ///
    /// A chunk-accepting session with the same id is completed in place and its
    /// chunk records are marked CONSUMED. ASSEMBLING or COMPLETE sessions are
    /// returned unchanged.
    async fn complete_instant(
        &self,
        new: &NewUploadSession,
        artifact_id: &str,
    ) -> Result<UploadSession, AppError>;

    async fn get_session(&self, upload_id: &UploadId) -> Result<Option<UploadSession>, AppError>;

    /// Register an in-flight chunk write. Creates a RECEIVING chunk record if none
    /// exists for the index; an existing record is left as is. Counts as activity on
    /// the session, so the janitor leaves it alone while the write runs.
    ///
    /// Fails with `UploadNotFound` or the state-specific rejection when the session
    /// does not accept chunks.
    async fn begin_chunk(&self, chunk: &ChunkRecord) -> Result<UploadSession, AppError>;

    /// Upsert a chunk record as CONFIRMED and recompute the session's readiness.
    ///
    /// The record takes the fingerprint and storage key of `chunk` together, so it
    /// always describes the blob of the write that confirmed last. FAILED sessions
    /// fall back to RECEIVING (or READY_TO_ASSEMBLE when complete).
    async fn confirm_chunk(&self, chunk: &ChunkRecord) -> Result<ChunkConfirmation, AppError>;

    /// All chunk records of an upload, ordered by index
    async fn list_chunks(&self, upload_id: &UploadId) -> Result<Vec<ChunkRecord>, AppError>;

    /// Exclusive transition to ASSEMBLING.
    ///
    /// Succeeds only from a chunk-accepting state and only if every index is
    /// CONFIRMED. Returns `None` when the transition was not taken.
    async fn try_begin_assembly(
        &self,
        upload_id: &UploadId,
    ) -> Result<Option<UploadSession>, AppError>;

    /// ASSEMBLING -> FAILED with `error`, if `claim` is still current. Chunk records
    /// are untouched. Returns false when the claim was superseded.
    async fn fail_assembly(&self, claim: &AssemblyClaim, error: &str) -> Result<bool, AppError>;

    /// ASSEMBLING -> READY_TO_ASSEMBLE for an abandoned claim, if still current
    async fn release_assembly(&self, claim: &AssemblyClaim) -> Result<bool, AppError>;

    /// Publish `artifact` and complete the session in one transaction.
    ///
    /// The artifact row is inserted unless one already exists for its fingerprint;
    /// the stored row is returned either way. Chunks become CONSUMED. Returns `None`
    /// and changes nothing when `claim` is no longer current.
    async fn commit_assembly(
        &self,
        claim: &AssemblyClaim,
        artifact: &CompletedArtifact,
    ) -> Result<Option<CompletedArtifact>, AppError>;

    /// COMPLETE artifact for a whole-file fingerprint
    async fn find_artifact_by_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<CompletedArtifact>, AppError>;

    async fn get_artifact(&self, artifact_id: &str) -> Result<Option<CompletedArtifact>, AppError>;

    async fn set_category(
        &self,
        upload_id: &UploadId,
        category: Option<&str>,
    ) -> Result<(), AppError>;

    /// COMPLETE sessions of `owner` with their artifacts, newest first
    async fn list_completed(
        &self,
        owner: &str,
    ) -> Result<Vec<(UploadSession, CompletedArtifact)>, AppError>;

    /// Non-complete, non-assembling sessions untouched since `cutoff`
    async fn list_idle_sessions(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<UploadSession>, AppError>;

    /// Sessions that entered ASSEMBLING before `cutoff`
    async fn list_stale_assemblies(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<UploadSession>, AppError>;

    /// Delete an idle session and its chunk records. Refuses COMPLETE and ASSEMBLING
    /// sessions and sessions touched after `cutoff`. Once this returns true no chunk
    /// write can confirm against the session.
    async fn purge_session(
        &self,
        upload_id: &UploadId,
        cutoff: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    /// Upload ids that still have CONSUMED chunk records
    async fn uploads_with_consumed_chunks(&self, limit: i64) -> Result<Vec<UploadId>, AppError>;

    /// Remove CONSUMED chunk records of an upload once their blobs are gone
    async fn delete_consumed_chunks(&self, upload_id: &UploadId) -> Result<u64, AppError>;

    /// Cheap connectivity check
    async fn health_check(&self) -> Result<(), AppError>;
}
