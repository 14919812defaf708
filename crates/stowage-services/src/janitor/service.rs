use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use stowage_core::Config;
use stowage_db::UploadLedger;
use stowage_storage::{keys, Storage};
use tokio::time::interval;

use crate::assembly::{AssemblyEngine, RecoveryReport};

/// Sessions and upload ids handled per batch
const BATCH_SIZE: i64 = 500;

#[derive(Debug, Clone)]
pub struct JanitorConfig {
    /// Idle time after which an unfinished upload is purged
    pub retention: chrono::Duration,
    /// Time between runs; zero disables the background loop
    pub interval: Duration,
}

impl JanitorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retention: chrono::Duration::hours(config.upload_retention_hours()),
            interval: Duration::from_secs(config.janitor_interval_secs()),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct JanitorReport {
    pub sessions_purged: usize,
    pub consumed_chunks_deleted: u64,
    pub recovery: RecoveryReport,
}

#[derive(Clone)]
pub struct JanitorService {
    ledger: Arc<dyn UploadLedger>,
    storage: Arc<dyn Storage>,
    engine: AssemblyEngine,
    config: JanitorConfig,
}

impl JanitorService {
    pub fn new(
        ledger: Arc<dyn UploadLedger>,
        storage: Arc<dyn Storage>,
        engine: AssemblyEngine,
        config: JanitorConfig,
    ) -> Self {
        Self {
            ledger,
            storage,
            engine,
            config,
        }
    }

    /// Start the periodic janitor. Returns `None` when the interval is zero.
    /// The returned JoinHandle can be aborted on shutdown.
    pub fn start(self: Arc<Self>) -> Option<tokio::task::JoinHandle<()>> {
        if self.config.interval.is_zero() {
            tracing::info!("Janitor disabled");
            return None;
        }

        Some(tokio::spawn(async move {
            let mut ticker = interval(self.config.interval);

            loop {
                ticker.tick().await;

                match self.run_once().await {
                    Ok(report) => tracing::info!(
                        sessions_purged = report.sessions_purged,
                        consumed_chunks_deleted = report.consumed_chunks_deleted,
                        assemblies_committed = report.recovery.committed,
                        assemblies_released = report.recovery.released,
                        "Janitor run completed"
                    ),
                    Err(e) => tracing::error!(error = %e, "Janitor run failed"),
                }
            }
        }))
    }

    /// One full pass: idle sessions, leftover consumed chunks, stale assemblies
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> Result<JanitorReport, anyhow::Error> {
        let sessions_purged = match self.purge_idle_sessions().await {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(error = %e, "Failed to purge idle uploads");
                0
            }
        };

        let consumed_chunks_deleted = match self.delete_consumed_chunks().await {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(error = %e, "Failed to delete consumed chunks");
                0
            }
        };

        let recovery = self.engine.recover_stale().await?;

        Ok(JanitorReport {
            sessions_purged,
            consumed_chunks_deleted,
            recovery,
        })
    }

    /// Rows first, then blobs. Once the conditional delete succeeds no chunk write can
    /// confirm against the session, so the blobs are unreferenced; a blob left behind
    /// by a failed delete is harmless.
    #[tracing::instrument(skip(self))]
    async fn purge_idle_sessions(&self) -> Result<usize, anyhow::Error> {
        let cutoff = Utc::now() - self.config.retention;
        let idle = self.ledger.list_idle_sessions(cutoff, BATCH_SIZE).await?;
        let mut purged = 0;

        for session in idle {
            if !self.ledger.purge_session(&session.upload_id, cutoff).await? {
                tracing::debug!(upload_id = %session.upload_id, "Upload became active, not purged");
                continue;
            }

            let prefix = keys::staging_prefix(&session.upload_id);
            if let Err(e) = self.storage.delete_prefix(&prefix).await {
                tracing::warn!(
                    error = %e,
                    upload_id = %session.upload_id,
                    "Failed to delete staged chunks of purged upload"
                );
            }

            tracing::info!(
                upload_id = %session.upload_id,
                state = %session.state,
                last_activity = %session.updated_at,
                "Purged idle upload"
            );
            purged += 1;
        }

        Ok(purged)
    }

    #[tracing::instrument(skip(self))]
    async fn delete_consumed_chunks(&self) -> Result<u64, anyhow::Error> {
        let upload_ids = self.ledger.uploads_with_consumed_chunks(BATCH_SIZE).await?;
        let mut deleted = 0;

        for upload_id in upload_ids {
            if let Err(e) = self
                .storage
                .delete_prefix(&keys::staging_prefix(&upload_id))
                .await
            {
                tracing::error!(error = %e, upload_id = %upload_id, "Failed to delete consumed chunk blobs");
                continue;
            }
            deleted += self.ledger.delete_consumed_chunks(&upload_id).await?;
        }

        Ok(deleted)
    }
}
