use chrono::{DateTime, Utc};
use stowage_core::models::{AssemblyClaim, CompletedArtifact, UploadSession};
use stowage_core::AppError;
use stowage_storage::keys;

use super::engine::{verify_assembled, AssemblyEngine};

/// Outcome of one recovery sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Sessions whose published blob verified and were committed
    pub committed: usize,
    /// Sessions handed back to READY_TO_ASSEMBLE
    pub released: usize,
    /// Sessions left for a later sweep
    pub skipped: usize,
}

enum Recovered {
    Committed,
    Released,
    /// Another claim took the session over while it was being recovered
    Superseded,
}

impl AssemblyEngine {
    /// Recover assemblies that have been ASSEMBLING for longer than the configured
    /// stale threshold.
    pub async fn recover_stale(&self) -> Result<RecoveryReport, AppError> {
        let cutoff = Utc::now() - self.config.stale_after;
        self.recover_assemblies_started_before(cutoff).await
    }

    /// Startup sweep. When this deployment owns the ledger, every ASSEMBLING session
    /// is an orphan of the previous run and is recovered right away; otherwise only
    /// stale ones are, since another instance may still be running the rest.
    pub async fn recover_at_startup(&self) -> Result<RecoveryReport, AppError> {
        if self.config.owns_ledger {
            return self.recover_assemblies_started_before(Utc::now()).await;
        }
        self.recover_stale().await
    }

    /// Roll every assembly started before `cutoff` forward or back.
    ///
    /// A session whose artifact blob is already published and verifies against the
    /// declaration is committed; any other is released to READY_TO_ASSEMBLE with its
    /// staged output removed.
    #[tracing::instrument(skip(self))]
    pub async fn recover_assemblies_started_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<RecoveryReport, AppError> {
        let stale = self.ledger.list_stale_assemblies(cutoff).await?;
        let mut report = RecoveryReport::default();

        for session in stale {
            let Some(claim) = AssemblyClaim::of(&session) else {
                report.skipped += 1;
                continue;
            };
            if self.is_in_flight(&claim) {
                report.skipped += 1;
                continue;
            }

            match self.recover_session(&session, &claim).await {
                Ok(Recovered::Committed) => report.committed += 1,
                Ok(Recovered::Released) => report.released += 1,
                Ok(Recovered::Superseded) => report.skipped += 1,
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        upload_id = %session.upload_id,
                        "Failed to recover stale assembly"
                    );
                    report.skipped += 1;
                }
            }
        }

        if report != RecoveryReport::default() {
            tracing::info!(
                committed = report.committed,
                released = report.released,
                skipped = report.skipped,
                "Recovered stale assemblies"
            );
        }

        Ok(report)
    }

    async fn recover_session(
        &self,
        session: &UploadSession,
        claim: &AssemblyClaim,
    ) -> Result<Recovered, AppError> {
        let upload_id = &session.upload_id;
        let artifact_key = keys::artifact_key(&CompletedArtifact::id_for(&session.fingerprint));

        if self.storage.exists(&artifact_key).await? {
            let (fingerprint, size) = self.fingerprint_blob(&artifact_key).await?;
            match verify_assembled(session, &fingerprint, size) {
                Ok(()) => {
                    let artifact = self
                        .describe_published(session, fingerprint, &artifact_key, size)
                        .await?;
                    if self.ledger.commit_assembly(claim, &artifact).await?.is_none() {
                        return Ok(Recovered::Superseded);
                    }
                    self.storage.delete(&keys::assembly_key(claim)).await?;
                    self.reclaim_chunks(upload_id).await;
                    tracing::info!(upload_id = %upload_id, "Committed interrupted assembly");
                    return Ok(Recovered::Committed);
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        storage_key = %artifact_key,
                        "Published blob does not verify; releasing upload"
                    );
                }
            }
        }

        self.storage.delete(&keys::assembly_key(claim)).await?;
        if !self.ledger.release_assembly(claim).await? {
            return Ok(Recovered::Superseded);
        }
        tracing::info!(upload_id = %upload_id, "Released interrupted assembly");
        Ok(Recovered::Released)
    }
}
