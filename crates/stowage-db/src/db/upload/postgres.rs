use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use stowage_core::models::{
    AssemblyClaim, ChunkRecord, ChunkStatus, CompletedArtifact, NewUploadSession, UploadId,
    UploadSession,
};
use stowage_core::{AppError, Fingerprint};

use super::ledger::{
    chunk_write_rejected, readiness, replaced_key, ChunkConfirmation, UploadLedger,
};
use crate::db::transaction::TransactionGuard;

const SESSION_COLUMNS: &str = r#"
    upload_id, owner, file_name, total_size, total_chunks, fingerprint, state,
    category, artifact_id, last_error, assembly_started_at, created_at, updated_at
"#;

const CHUNK_COLUMNS: &str = r#"
    upload_id, chunk_index, status, owner, fingerprint, storage_key, size_bytes, uploaded_at
"#;

const ARTIFACT_COLUMNS: &str = r#"
    artifact_id, fingerprint, storage_key, file_name, size_bytes, mime_type,
    content_class, thumbnail_key, owner, category, complete, created_at
"#;

/// Upload ledger backed by Postgres
#[derive(Clone)]
pub struct PgUploadLedger {
    pool: PgPool,
}

impl PgUploadLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Lock the session row for a chunk write and check it still accepts chunks
    async fn lock_accepting_session(
        tx: &mut TransactionGuard<'_>,
        upload_id: &UploadId,
    ) -> Result<UploadSession, AppError> {
        let session = sqlx::query_as::<_, UploadSession>(&format!(
            "SELECT {} FROM upload_sessions WHERE upload_id = $1 FOR UPDATE",
            SESSION_COLUMNS
        ))
        .bind(upload_id.as_str())
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| AppError::UploadNotFound(upload_id.to_string()))?;

        if !session.state.accepts_chunks() {
            return Err(chunk_write_rejected(&session));
        }
        Ok(session)
    }
}

#[async_trait]
impl UploadLedger for PgUploadLedger {
    async fn create_session(&self, new: &NewUploadSession) -> Result<UploadSession, AppError> {
        // Dynamic queries keep the crate buildable without DATABASE_URL/sqlx prepare
        let inserted = sqlx::query_as::<_, UploadSession>(&format!(
            r#"
            INSERT INTO upload_sessions (
                upload_id, owner, file_name, total_size, total_chunks, fingerprint,
                state, category
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'receiving', $7)
            ON CONFLICT (upload_id) DO NOTHING
            RETURNING {}
            "#,
            SESSION_COLUMNS
        ))
        .bind(new.upload_id.as_str())
        .bind(&new.owner)
        .bind(&new.file_name)
        .bind(new.total_size as i64)
        .bind(new.total_chunks as i32)
        .bind(new.fingerprint.as_str())
        .bind(&new.category)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(session) => Ok(session),
            None => self
                .get_session(&new.upload_id)
                .await?
                .ok_or_else(|| AppError::UploadNotFound(new.upload_id.to_string())),
        }
    }

    async fn complete_instant(
        &self,
        new: &NewUploadSession,
        artifact_id: &str,
    ) -> Result<UploadSession, AppError> {
        let mut tx = TransactionGuard::begin(&self.pool).await?;

        let completed = sqlx::query_as::<_, UploadSession>(&format!(
            r#"
            INSERT INTO upload_sessions (
                upload_id, owner, file_name, total_size, total_chunks, fingerprint,
                state, category, artifact_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'complete', $7, $8)
            ON CONFLICT (upload_id) DO UPDATE
            SET state = 'complete', artifact_id = EXCLUDED.artifact_id,
                last_error = NULL, updated_at = NOW()
            WHERE upload_sessions.state IN ('receiving', 'ready_to_assemble', 'failed')
            RETURNING {}
            "#,
            SESSION_COLUMNS
        ))
        .bind(new.upload_id.as_str())
        .bind(&new.owner)
        .bind(&new.file_name)
        .bind(new.total_size as i64)
        .bind(new.total_chunks as i32)
        .bind(new.fingerprint.as_str())
        .bind(&new.category)
        .bind(artifact_id)
        .fetch_optional(&mut *tx)
        .await?;

        let session = match completed {
            Some(session) => {
                sqlx::query(
                    r#"
                    UPDATE upload_chunks SET status = 'consumed'
                    WHERE upload_id = $1
                    "#,
                )
                .bind(new.upload_id.as_str())
                .execute(&mut *tx)
                .await?;
                session
            }
            None => sqlx::query_as::<_, UploadSession>(&format!(
                "SELECT {} FROM upload_sessions WHERE upload_id = $1",
                SESSION_COLUMNS
            ))
            .bind(new.upload_id.as_str())
            .fetch_one(&mut *tx)
            .await?,
        };

        tx.commit().await?;
        Ok(session)
    }

    async fn get_session(&self, upload_id: &UploadId) -> Result<Option<UploadSession>, AppError> {
        let session = sqlx::query_as::<_, UploadSession>(&format!(
            "SELECT {} FROM upload_sessions WHERE upload_id = $1",
            SESSION_COLUMNS
        ))
        .bind(upload_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    async fn begin_chunk(&self, chunk: &ChunkRecord) -> Result<UploadSession, AppError> {
        let mut tx = TransactionGuard::begin(&self.pool).await?;
        let session = Self::lock_accepting_session(&mut tx, &chunk.upload_id).await?;

        sqlx::query(
            r#"
            INSERT INTO upload_chunks (
                upload_id, chunk_index, status, owner, fingerprint, storage_key, size_bytes
            )
            VALUES ($1, $2, 'receiving', $3, $4, $5, $6)
            ON CONFLICT (upload_id, chunk_index) DO NOTHING
            "#,
        )
        .bind(chunk.upload_id.as_str())
        .bind(chunk.chunk_index as i32)
        .bind(&chunk.owner)
        .bind(chunk.fingerprint.as_str())
        .bind(&chunk.storage_key)
        .bind(chunk.size_bytes as i64)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE upload_sessions SET updated_at = NOW() WHERE upload_id = $1")
            .bind(chunk.upload_id.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(session)
    }

    async fn confirm_chunk(&self, chunk: &ChunkRecord) -> Result<ChunkConfirmation, AppError> {
        let mut tx = TransactionGuard::begin(&self.pool).await?;
        // The session row lock orders confirmations of every chunk of the upload
        let session = Self::lock_accepting_session(&mut tx, &chunk.upload_id).await?;

        let previous: Option<(String, String)> = sqlx::query_as(
            r#"
            SELECT status, storage_key FROM upload_chunks
            WHERE upload_id = $1 AND chunk_index = $2
            "#,
        )
        .bind(chunk.upload_id.as_str())
        .bind(chunk.chunk_index as i32)
        .fetch_optional(&mut *tx)
        .await?;
        let previous = previous
            .map(|(status, key)| Ok::<_, AppError>((status.parse::<ChunkStatus>()?, key)))
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO upload_chunks (
                upload_id, chunk_index, status, owner, fingerprint, storage_key, size_bytes,
                uploaded_at
            )
            VALUES ($1, $2, 'confirmed', $3, $4, $5, $6, NOW())
            ON CONFLICT (upload_id, chunk_index) DO UPDATE
            SET status = 'confirmed', owner = EXCLUDED.owner,
                fingerprint = EXCLUDED.fingerprint, storage_key = EXCLUDED.storage_key,
                size_bytes = EXCLUDED.size_bytes, uploaded_at = NOW()
            "#,
        )
        .bind(chunk.upload_id.as_str())
        .bind(chunk.chunk_index as i32)
        .bind(&chunk.owner)
        .bind(chunk.fingerprint.as_str())
        .bind(&chunk.storage_key)
        .bind(chunk.size_bytes as i64)
        .execute(&mut *tx)
        .await?;

        let confirmed: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM upload_chunks
            WHERE upload_id = $1 AND status = 'confirmed'
            "#,
        )
        .bind(chunk.upload_id.as_str())
        .fetch_one(&mut *tx)
        .await?;

        let state = readiness(confirmed.max(0) as u64, session.total_chunks);
        let updated = sqlx::query_as::<_, UploadSession>(&format!(
            r#"
            UPDATE upload_sessions SET state = $2, updated_at = NOW()
            WHERE upload_id = $1
            RETURNING {}
            "#,
            SESSION_COLUMNS
        ))
        .bind(chunk.upload_id.as_str())
        .bind(state.as_str())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ChunkConfirmation {
            session: updated,
            replaced_key: replaced_key(
                previous.as_ref().map(|(status, key)| (status, key.as_str())),
                &chunk.storage_key,
            ),
        })
    }

    async fn list_chunks(&self, upload_id: &UploadId) -> Result<Vec<ChunkRecord>, AppError> {
        let chunks = sqlx::query_as::<_, ChunkRecord>(&format!(
            "SELECT {} FROM upload_chunks WHERE upload_id = $1 ORDER BY chunk_index",
            CHUNK_COLUMNS
        ))
        .bind(upload_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(chunks)
    }

    async fn try_begin_assembly(
        &self,
        upload_id: &UploadId,
    ) -> Result<Option<UploadSession>, AppError> {
        // Compare-and-swap: only one caller observes a returned row
        let claimed = sqlx::query_as::<_, UploadSession>(&format!(
            r#"
            UPDATE upload_sessions s
            SET state = 'assembling', assembly_started_at = NOW(), updated_at = NOW()
            WHERE s.upload_id = $1
              AND s.state IN ('receiving', 'ready_to_assemble', 'failed')
              AND s.total_chunks = (
                  SELECT COUNT(*) FROM upload_chunks c
                  WHERE c.upload_id = s.upload_id AND c.status = 'confirmed'
              )
            RETURNING {}
            "#,
            SESSION_COLUMNS
        ))
        .bind(upload_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(claimed)
    }

    async fn fail_assembly(&self, claim: &AssemblyClaim, error: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE upload_sessions
            SET state = 'failed', last_error = $3, assembly_started_at = NULL, updated_at = NOW()
            WHERE upload_id = $1 AND state = 'assembling' AND assembly_started_at = $2
            "#,
        )
        .bind(claim.upload_id.as_str())
        .bind(claim.started_at)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_assembly(&self, claim: &AssemblyClaim) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE upload_sessions
            SET state = 'ready_to_assemble', assembly_started_at = NULL, updated_at = NOW()
            WHERE upload_id = $1 AND state = 'assembling' AND assembly_started_at = $2
            "#,
        )
        .bind(claim.upload_id.as_str())
        .bind(claim.started_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn commit_assembly(
        &self,
        claim: &AssemblyClaim,
        artifact: &CompletedArtifact,
    ) -> Result<Option<CompletedArtifact>, AppError> {
        let mut tx = TransactionGuard::begin(&self.pool).await?;

        let held: Option<String> = sqlx::query_scalar(
            r#"
            SELECT upload_id FROM upload_sessions
            WHERE upload_id = $1 AND state = 'assembling' AND assembly_started_at = $2
            FOR UPDATE
            "#,
        )
        .bind(claim.upload_id.as_str())
        .bind(claim.started_at)
        .fetch_optional(&mut *tx)
        .await?;

        if held.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }

        sqlx::query(
            r#"
            INSERT INTO completed_artifacts (
                artifact_id, fingerprint, storage_key, file_name, size_bytes, mime_type,
                content_class, thumbnail_key, owner, category, complete
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (fingerprint) DO NOTHING
            "#,
        )
        .bind(&artifact.artifact_id)
        .bind(artifact.fingerprint.as_str())
        .bind(&artifact.storage_key)
        .bind(&artifact.file_name)
        .bind(artifact.size_bytes as i64)
        .bind(&artifact.mime_type)
        .bind(artifact.content_class.to_string())
        .bind(&artifact.thumbnail_key)
        .bind(&artifact.owner)
        .bind(&artifact.category)
        .bind(artifact.complete)
        .execute(&mut *tx)
        .await?;

        let stored = sqlx::query_as::<_, CompletedArtifact>(&format!(
            "SELECT {} FROM completed_artifacts WHERE fingerprint = $1",
            ARTIFACT_COLUMNS
        ))
        .bind(artifact.fingerprint.as_str())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE upload_sessions
            SET state = 'complete', artifact_id = $2, last_error = NULL,
                assembly_started_at = NULL, updated_at = NOW()
            WHERE upload_id = $1
            "#,
        )
        .bind(claim.upload_id.as_str())
        .bind(&stored.artifact_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE upload_chunks SET status = 'consumed' WHERE upload_id = $1")
            .bind(claim.upload_id.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(stored))
    }

    async fn find_artifact_by_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<CompletedArtifact>, AppError> {
        let artifact = sqlx::query_as::<_, CompletedArtifact>(&format!(
            "SELECT {} FROM completed_artifacts WHERE fingerprint = $1 AND complete",
            ARTIFACT_COLUMNS
        ))
        .bind(fingerprint.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(artifact)
    }

    async fn get_artifact(&self, artifact_id: &str) -> Result<Option<CompletedArtifact>, AppError> {
        let artifact = sqlx::query_as::<_, CompletedArtifact>(&format!(
            "SELECT {} FROM completed_artifacts WHERE artifact_id = $1",
            ARTIFACT_COLUMNS
        ))
        .bind(artifact_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(artifact)
    }

    async fn set_category(
        &self,
        upload_id: &UploadId,
        category: Option<&str>,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE upload_sessions SET category = $2 WHERE upload_id = $1")
            .bind(upload_id.as_str())
            .bind(category)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn list_completed(
        &self,
        owner: &str,
    ) -> Result<Vec<(UploadSession, CompletedArtifact)>, AppError> {
        let sessions = sqlx::query_as::<_, UploadSession>(&format!(
            r#"
            SELECT {} FROM upload_sessions
            WHERE owner = $1 AND state = 'complete' AND artifact_id IS NOT NULL
            ORDER BY updated_at DESC
            "#,
            SESSION_COLUMNS
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        let artifact_ids: Vec<String> = sessions
            .iter()
            .filter_map(|s| s.artifact_id.clone())
            .collect();
        let artifacts = sqlx::query_as::<_, CompletedArtifact>(&format!(
            "SELECT {} FROM completed_artifacts WHERE artifact_id = ANY($1)",
            ARTIFACT_COLUMNS
        ))
        .bind(&artifact_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(sessions
            .into_iter()
            .filter_map(|session| {
                let artifact = artifacts
                    .iter()
                    .find(|a| Some(&a.artifact_id) == session.artifact_id.as_ref())?
                    .clone();
                Some((session, artifact))
            })
            .collect())
    }

    async fn list_idle_sessions(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<UploadSession>, AppError> {
        let sessions = sqlx::query_as::<_, UploadSession>(&format!(
            r#"
            SELECT {} FROM upload_sessions
            WHERE state IN ('receiving', 'ready_to_assemble', 'failed') AND updated_at < $1
            ORDER BY updated_at
            LIMIT $2
            "#,
            SESSION_COLUMNS
        ))
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(sessions)
    }

    async fn list_stale_assemblies(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<UploadSession>, AppError> {
        let sessions = sqlx::query_as::<_, UploadSession>(&format!(
            r#"
            SELECT {} FROM upload_sessions
            WHERE state = 'assembling' AND assembly_started_at < $1
            "#,
            SESSION_COLUMNS
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(sessions)
    }

    async fn purge_session(
        &self,
        upload_id: &UploadId,
        cutoff: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        // Chunk rows go with the session (ON DELETE CASCADE)
        let result = sqlx::query(
            r#"
            DELETE FROM upload_sessions
            WHERE upload_id = $1
              AND state IN ('receiving', 'ready_to_assemble', 'failed')
              AND updated_at < $2
            "#,
        )
        .bind(upload_id.as_str())
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn uploads_with_consumed_chunks(&self, limit: i64) -> Result<Vec<UploadId>, AppError> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT upload_id FROM upload_chunks
            WHERE status = $1
            ORDER BY upload_id
            LIMIT $2
            "#,
        )
        .bind(ChunkStatus::Consumed.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        ids.iter().map(|id| UploadId::parse(id)).collect()
    }

    async fn delete_consumed_chunks(&self, upload_id: &UploadId) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM upload_chunks WHERE upload_id = $1 AND status = $2")
            .bind(upload_id.as_str())
            .bind(ChunkStatus::Consumed.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
