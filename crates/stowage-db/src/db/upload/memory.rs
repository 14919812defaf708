//! In-process ledger for single-instance deployments and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use stowage_core::models::{
    AssemblyClaim, ChunkRecord, ChunkStatus, CompletedArtifact, NewUploadSession, UploadId,
    UploadSession, UploadState,
};
use stowage_core::{AppError, Fingerprint};

use super::ledger::{
    chunk_write_rejected, readiness, replaced_key, ChunkConfirmation, UploadLedger,
};

#[derive(Default)]
struct LedgerTables {
    sessions: HashMap<UploadId, UploadSession>,
    chunks: BTreeMap<(UploadId, u32), ChunkRecord>,
    artifacts: HashMap<String, CompletedArtifact>,
}

impl LedgerTables {
    fn chunks_of<'a>(&'a self, upload_id: &UploadId) -> impl Iterator<Item = &'a ChunkRecord> {
        self.chunks
            .range((upload_id.clone(), 0)..=(upload_id.clone(), u32::MAX))
            .map(|(_, chunk)| chunk)
    }

    fn chunks_of_mut<'a>(
        &'a mut self,
        upload_id: &UploadId,
    ) -> impl Iterator<Item = &'a mut ChunkRecord> {
        self.chunks
            .range_mut((upload_id.clone(), 0)..=(upload_id.clone(), u32::MAX))
            .map(|(_, chunk)| chunk)
    }

    fn confirmed_count(&self, upload_id: &UploadId) -> u64 {
        self.chunks_of(upload_id)
            .filter(|c| c.status == ChunkStatus::Confirmed)
            .count() as u64
    }

    fn accepting_session(&mut self, upload_id: &UploadId) -> Result<&mut UploadSession, AppError> {
        let session = self
            .sessions
            .get_mut(upload_id)
            .ok_or_else(|| AppError::UploadNotFound(upload_id.to_string()))?;
        if !session.state.accepts_chunks() {
            return Err(chunk_write_rejected(session));
        }
        Ok(session)
    }

    /// The session while it still carries `claim`
    fn claimed_session(&mut self, claim: &AssemblyClaim) -> Option<&mut UploadSession> {
        self.sessions.get_mut(&claim.upload_id).filter(|s| {
            s.state == UploadState::Assembling && s.assembly_started_at == Some(claim.started_at)
        })
    }
}

fn new_session(new: &NewUploadSession, state: UploadState, artifact_id: Option<&str>) -> UploadSession {
    let now = Utc::now();
    UploadSession {
        upload_id: new.upload_id.clone(),
        owner: new.owner.clone(),
        file_name: new.file_name.clone(),
        total_size: new.total_size,
        total_chunks: new.total_chunks,
        fingerprint: new.fingerprint.clone(),
        state,
        category: new.category.clone(),
        artifact_id: artifact_id.map(str::to_string),
        last_error: None,
        assembly_started_at: None,
        created_at: now,
        updated_at: now,
    }
}

/// Upload ledger held in process memory
#[derive(Clone, Default)]
pub struct MemoryLedger {
    tables: Arc<Mutex<LedgerTables>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, LedgerTables>, AppError> {
        self.tables
            .lock()
            .map_err(|_| AppError::Internal("Memory ledger lock poisoned".to_string()))
    }
}

#[async_trait]
impl UploadLedger for MemoryLedger {
    async fn create_session(&self, new: &NewUploadSession) -> Result<UploadSession, AppError> {
        let mut tables = self.lock()?;
        let session = tables
            .sessions
            .entry(new.upload_id.clone())
            .or_insert_with(|| new_session(new, UploadState::Receiving, None));
        Ok(session.clone())
    }

    async fn complete_instant(
        &self,
        new: &NewUploadSession,
        artifact_id: &str,
    ) -> Result<UploadSession, AppError> {
        let mut tables = self.lock()?;

        let session = match tables.sessions.get_mut(&new.upload_id) {
            Some(existing) if existing.state.accepts_chunks() => {
                existing.state = UploadState::Complete;
                existing.artifact_id = Some(artifact_id.to_string());
                existing.last_error = None;
                existing.updated_at = Utc::now();
                existing.clone()
            }
            Some(existing) => return Ok(existing.clone()),
            None => {
                let session = new_session(new, UploadState::Complete, Some(artifact_id));
                tables.sessions.insert(new.upload_id.clone(), session.clone());
                session
            }
        };

        for chunk in tables.chunks_of_mut(&new.upload_id) {
            chunk.status = ChunkStatus::Consumed;
        }

        Ok(session)
    }

    async fn get_session(&self, upload_id: &UploadId) -> Result<Option<UploadSession>, AppError> {
        Ok(self.lock()?.sessions.get(upload_id).cloned())
    }

    async fn begin_chunk(&self, chunk: &ChunkRecord) -> Result<UploadSession, AppError> {
        let mut tables = self.lock()?;
        let session = tables.accepting_session(&chunk.upload_id)?;
        session.updated_at = Utc::now();
        let session = session.clone();

        tables
            .chunks
            .entry((chunk.upload_id.clone(), chunk.chunk_index))
            .or_insert_with(|| ChunkRecord {
                status: ChunkStatus::Receiving,
                ..chunk.clone()
            });

        Ok(session)
    }

    async fn confirm_chunk(&self, chunk: &ChunkRecord) -> Result<ChunkConfirmation, AppError> {
        let mut tables = self.lock()?;
        tables.accepting_session(&chunk.upload_id)?;

        let previous = tables.chunks.insert(
            (chunk.upload_id.clone(), chunk.chunk_index),
            ChunkRecord {
                status: ChunkStatus::Confirmed,
                ..chunk.clone()
            },
        );
        let replaced_key = replaced_key(
            previous.as_ref().map(|p| (&p.status, p.storage_key.as_str())),
            &chunk.storage_key,
        );

        let confirmed = tables.confirmed_count(&chunk.upload_id);
        let session = tables.accepting_session(&chunk.upload_id)?;
        session.state = readiness(confirmed, session.total_chunks);
        session.updated_at = Utc::now();

        Ok(ChunkConfirmation {
            session: session.clone(),
            replaced_key,
        })
    }

    async fn list_chunks(&self, upload_id: &UploadId) -> Result<Vec<ChunkRecord>, AppError> {
        Ok(self.lock()?.chunks_of(upload_id).cloned().collect())
    }

    async fn try_begin_assembly(
        &self,
        upload_id: &UploadId,
    ) -> Result<Option<UploadSession>, AppError> {
        let mut tables = self.lock()?;
        let confirmed = tables.confirmed_count(upload_id);

        let Some(session) = tables.sessions.get_mut(upload_id) else {
            return Ok(None);
        };
        if !session.state.can_start_assembly() || confirmed != u64::from(session.total_chunks) {
            return Ok(None);
        }

        let now = Utc::now();
        session.state = UploadState::Assembling;
        session.assembly_started_at = Some(now);
        session.updated_at = now;
        Ok(Some(session.clone()))
    }

    async fn fail_assembly(&self, claim: &AssemblyClaim, error: &str) -> Result<bool, AppError> {
        let mut tables = self.lock()?;
        let Some(session) = tables.claimed_session(claim) else {
            return Ok(false);
        };
        session.state = UploadState::Failed;
        session.last_error = Some(error.to_string());
        session.assembly_started_at = None;
        session.updated_at = Utc::now();
        Ok(true)
    }

    async fn release_assembly(&self, claim: &AssemblyClaim) -> Result<bool, AppError> {
        let mut tables = self.lock()?;
        let Some(session) = tables.claimed_session(claim) else {
            return Ok(false);
        };
        session.state = UploadState::ReadyToAssemble;
        session.assembly_started_at = None;
        session.updated_at = Utc::now();
        Ok(true)
    }

    async fn commit_assembly(
        &self,
        claim: &AssemblyClaim,
        artifact: &CompletedArtifact,
    ) -> Result<Option<CompletedArtifact>, AppError> {
        let mut tables = self.lock()?;

        if tables.claimed_session(claim).is_none() {
            return Ok(None);
        }

        let stored = match tables
            .artifacts
            .values()
            .find(|a| a.fingerprint == artifact.fingerprint)
        {
            Some(existing) => existing.clone(),
            None => {
                tables
                    .artifacts
                    .insert(artifact.artifact_id.clone(), artifact.clone());
                artifact.clone()
            }
        };

        for chunk in tables.chunks_of_mut(&claim.upload_id) {
            chunk.status = ChunkStatus::Consumed;
        }

        if let Some(session) = tables.sessions.get_mut(&claim.upload_id) {
            session.state = UploadState::Complete;
            session.artifact_id = Some(stored.artifact_id.clone());
            session.last_error = None;
            session.assembly_started_at = None;
            session.updated_at = Utc::now();
        }

        Ok(Some(stored))
    }

    async fn find_artifact_by_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<CompletedArtifact>, AppError> {
        Ok(self
            .lock()?
            .artifacts
            .values()
            .find(|a| a.complete && &a.fingerprint == fingerprint)
            .cloned())
    }

    async fn get_artifact(&self, artifact_id: &str) -> Result<Option<CompletedArtifact>, AppError> {
        Ok(self.lock()?.artifacts.get(artifact_id).cloned())
    }

    async fn set_category(
        &self,
        upload_id: &UploadId,
        category: Option<&str>,
    ) -> Result<(), AppError> {
        let mut tables = self.lock()?;
        if let Some(session) = tables.sessions.get_mut(upload_id) {
            session.category = category.map(str::to_string);
        }
        Ok(())
    }

    async fn list_completed(
        &self,
        owner: &str,
    ) -> Result<Vec<(UploadSession, CompletedArtifact)>, AppError> {
        let tables = self.lock()?;
        let mut completed: Vec<_> = tables
            .sessions
            .values()
            .filter(|s| s.owner == owner && s.state == UploadState::Complete)
            .filter_map(|s| {
                let artifact = tables.artifacts.get(s.artifact_id.as_deref()?)?;
                Some((s.clone(), artifact.clone()))
            })
            .collect();
        completed.sort_by(|a, b| b.0.updated_at.cmp(&a.0.updated_at));
        Ok(completed)
    }

    async fn list_idle_sessions(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<UploadSession>, AppError> {
        let tables = self.lock()?;
        let mut idle: Vec<_> = tables
            .sessions
            .values()
            .filter(|s| s.state.accepts_chunks() && s.updated_at < cutoff)
            .cloned()
            .collect();
        idle.sort_by_key(|s| s.updated_at);
        idle.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(idle)
    }

    async fn list_stale_assemblies(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<UploadSession>, AppError> {
        let tables = self.lock()?;
        Ok(tables
            .sessions
            .values()
            .filter(|s| {
                s.state == UploadState::Assembling
                    && s.assembly_started_at.is_some_and(|t| t < cutoff)
            })
            .cloned()
            .collect())
    }

    async fn purge_session(
        &self,
        upload_id: &UploadId,
        cutoff: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut tables = self.lock()?;
        let purgeable = tables
            .sessions
            .get(upload_id)
            .is_some_and(|s| s.state.accepts_chunks() && s.updated_at < cutoff);
        if !purgeable {
            return Ok(false);
        }

        tables.sessions.remove(upload_id);
        tables.chunks.retain(|(id, _), _| id != upload_id);
        Ok(true)
    }

    async fn uploads_with_consumed_chunks(&self, limit: i64) -> Result<Vec<UploadId>, AppError> {
        let tables = self.lock()?;
        let mut ids: Vec<UploadId> = tables
            .chunks
            .values()
            .filter(|c| c.status == ChunkStatus::Consumed)
            .map(|c| c.upload_id.clone())
            .collect();
        ids.dedup();
        ids.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(ids)
    }

    async fn delete_consumed_chunks(&self, upload_id: &UploadId) -> Result<u64, AppError> {
        let mut tables = self.lock()?;
        let before = tables.chunks.len();
        tables
            .chunks
            .retain(|(id, _), c| !(id == upload_id && c.status == ChunkStatus::Consumed));
        Ok((before - tables.chunks.len()) as u64)
    }

    async fn health_check(&self) -> Result<(), AppError> {
        self.lock().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use stowage_core::ContentClass;

    fn declaration(id: &str, total_chunks: u32) -> NewUploadSession {
        NewUploadSession {
            upload_id: UploadId::parse(id).unwrap(),
            owner: "alice".to_string(),
            file_name: "report.pdf".to_string(),
            total_size: 30,
            total_chunks,
            fingerprint: Fingerprint::of(b"whole"),
            category: None,
        }
    }

    fn chunk(id: &str, index: u32, bytes: &[u8]) -> ChunkRecord {
        ChunkRecord {
            upload_id: UploadId::parse(id).unwrap(),
            chunk_index: index,
            status: ChunkStatus::Confirmed,
            owner: "alice".to_string(),
            fingerprint: Fingerprint::of(bytes),
            storage_key: format!("staging/{}/{}.chunk", id, index),
            size_bytes: bytes.len() as u64,
            uploaded_at: Utc::now(),
        }
    }

    fn artifact(fingerprint: Fingerprint) -> CompletedArtifact {
        CompletedArtifact {
            artifact_id: fingerprint.to_string(),
            storage_key: format!("artifacts/{}", fingerprint),
            fingerprint,
            file_name: "report.pdf".to_string(),
            size_bytes: 30,
            mime_type: "application/pdf".to_string(),
            content_class: ContentClass::Document,
            thumbnail_key: None,
            owner: "alice".to_string(),
            category: None,
            complete: true,
            created_at: Utc::now(),
        }
    }

    async fn claim(ledger: &MemoryLedger, id: &UploadId) -> AssemblyClaim {
        let claimed = ledger.try_begin_assembly(id).await.unwrap().unwrap();
        AssemblyClaim::of(&claimed).unwrap()
    }

    #[tokio::test]
    async fn test_create_session_returns_existing() {
        let ledger = MemoryLedger::new();
        let first = ledger.create_session(&declaration("u1", 3)).await.unwrap();
        let mut changed = declaration("u1", 3);
        changed.total_size = 99;
        let second = ledger.create_session(&changed).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second.total_size, 30);
        assert_eq!(second.state, UploadState::Receiving);
    }

    #[tokio::test]
    async fn test_confirm_chunk_recomputes_readiness() {
        let ledger = MemoryLedger::new();
        ledger.create_session(&declaration("u1", 2)).await.unwrap();

        let c = ledger.confirm_chunk(&chunk("u1", 1, b"b")).await.unwrap();
        assert_eq!(c.session.state, UploadState::Receiving);
        let c = ledger.confirm_chunk(&chunk("u1", 0, b"a")).await.unwrap();
        assert_eq!(c.session.state, UploadState::ReadyToAssemble);

        // Re-upload of the same index keeps a single record.
        ledger.confirm_chunk(&chunk("u1", 0, b"a")).await.unwrap();
        let chunks = ledger
            .list_chunks(&UploadId::parse("u1").unwrap())
            .await
            .unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[tokio::test]
    async fn test_confirm_reports_replaced_blob() {
        let ledger = MemoryLedger::new();
        ledger.create_session(&declaration("u1", 1)).await.unwrap();

        let mut first = chunk("u1", 0, b"a");
        first.storage_key = "staging/u1/0.first.chunk".to_string();
        let mut second = chunk("u1", 0, b"b");
        second.storage_key = "staging/u1/0.second.chunk".to_string();

        // A RECEIVING record belongs to a write still in flight
        ledger.begin_chunk(&first).await.unwrap();
        let c = ledger.confirm_chunk(&second).await.unwrap();
        assert_eq!(c.replaced_key, None);

        let c = ledger.confirm_chunk(&first).await.unwrap();
        assert_eq!(c.replaced_key.as_deref(), Some("staging/u1/0.second.chunk"));

        let chunks = ledger
            .list_chunks(&UploadId::parse("u1").unwrap())
            .await
            .unwrap();
        assert_eq!(chunks[0].fingerprint, Fingerprint::of(b"a"));
        assert_eq!(chunks[0].storage_key, "staging/u1/0.first.chunk");

        let c = ledger.confirm_chunk(&first).await.unwrap();
        assert_eq!(c.replaced_key, None);
    }

    #[tokio::test]
    async fn test_begin_chunk_keeps_confirmed_record() {
        let ledger = MemoryLedger::new();
        ledger.create_session(&declaration("u1", 1)).await.unwrap();
        ledger.confirm_chunk(&chunk("u1", 0, b"a")).await.unwrap();

        ledger.begin_chunk(&chunk("u1", 0, b"new")).await.unwrap();
        let chunks = ledger
            .list_chunks(&UploadId::parse("u1").unwrap())
            .await
            .unwrap();
        assert_eq!(chunks[0].status, ChunkStatus::Confirmed);
        assert_eq!(chunks[0].fingerprint, Fingerprint::of(b"a"));
    }

    #[tokio::test]
    async fn test_begin_chunk_counts_as_activity() {
        let ledger = MemoryLedger::new();
        let id = UploadId::parse("u1").unwrap();
        let created = ledger.create_session(&declaration("u1", 2)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(2)).await;
        let cutoff = Utc::now();
        tokio::time::sleep(Duration::from_millis(2)).await;
        ledger.begin_chunk(&chunk("u1", 0, b"a")).await.unwrap();

        let session = ledger.get_session(&id).await.unwrap().unwrap();
        assert!(session.updated_at > created.updated_at);
        assert!(!ledger.purge_session(&id, cutoff).await.unwrap());
    }

    #[tokio::test]
    async fn test_begin_assembly_is_exclusive() {
        let ledger = MemoryLedger::new();
        let id = UploadId::parse("u1").unwrap();
        ledger.create_session(&declaration("u1", 1)).await.unwrap();

        assert!(ledger.try_begin_assembly(&id).await.unwrap().is_none());

        ledger.confirm_chunk(&chunk("u1", 0, b"a")).await.unwrap();
        let claimed = ledger.try_begin_assembly(&id).await.unwrap().unwrap();
        assert_eq!(claimed.state, UploadState::Assembling);
        assert!(claimed.assembly_started_at.is_some());
        assert!(ledger.try_begin_assembly(&id).await.unwrap().is_none());

        let err = ledger.confirm_chunk(&chunk("u1", 0, b"a")).await.unwrap_err();
        assert!(matches!(err, AppError::AssemblyInProgress(_)));
    }

    #[tokio::test]
    async fn test_failed_session_returns_to_receiving() {
        let ledger = MemoryLedger::new();
        let id = UploadId::parse("u1").unwrap();
        ledger.create_session(&declaration("u1", 1)).await.unwrap();
        ledger.confirm_chunk(&chunk("u1", 0, b"a")).await.unwrap();
        let claim = claim(&ledger, &id).await;
        assert!(ledger.fail_assembly(&claim, "digest mismatch").await.unwrap());

        let failed = ledger.get_session(&id).await.unwrap().unwrap();
        assert_eq!(failed.state, UploadState::Failed);
        assert_eq!(failed.last_error.as_deref(), Some("digest mismatch"));
        assert_eq!(
            ledger.list_chunks(&id).await.unwrap()[0].status,
            ChunkStatus::Confirmed
        );

        let c = ledger.confirm_chunk(&chunk("u1", 0, b"c")).await.unwrap();
        assert_eq!(c.session.state, UploadState::ReadyToAssemble);
    }

    #[tokio::test]
    async fn test_superseded_claim_changes_nothing() {
        let ledger = MemoryLedger::new();
        let id = UploadId::parse("u1").unwrap();
        ledger.create_session(&declaration("u1", 1)).await.unwrap();
        ledger.confirm_chunk(&chunk("u1", 0, b"a")).await.unwrap();

        let stale = claim(&ledger, &id).await;
        assert!(ledger.release_assembly(&stale).await.unwrap());
        tokio::time::sleep(Duration::from_millis(2)).await;
        let current = claim(&ledger, &id).await;
        assert_ne!(stale, current);

        assert!(!ledger.fail_assembly(&stale, "late failure").await.unwrap());
        assert!(!ledger.release_assembly(&stale).await.unwrap());
        let whole = artifact(Fingerprint::of(b"whole"));
        assert!(ledger.commit_assembly(&stale, &whole).await.unwrap().is_none());

        let session = ledger.get_session(&id).await.unwrap().unwrap();
        assert_eq!(session.state, UploadState::Assembling);
        assert_eq!(session.assembly_started_at, Some(current.started_at));
        assert_eq!(
            ledger.list_chunks(&id).await.unwrap()[0].status,
            ChunkStatus::Confirmed
        );

        assert!(ledger.commit_assembly(&current, &whole).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_commit_keeps_first_artifact_per_fingerprint() {
        let ledger = MemoryLedger::new();
        let mut claims = Vec::new();
        for id in ["u1", "u2"] {
            ledger.create_session(&declaration(id, 1)).await.unwrap();
            ledger.confirm_chunk(&chunk(id, 0, b"a")).await.unwrap();
            claims.push(claim(&ledger, &UploadId::parse(id).unwrap()).await);
        }

        let fp = Fingerprint::of(b"whole");
        let first = ledger
            .commit_assembly(&claims[0], &artifact(fp.clone()))
            .await
            .unwrap()
            .unwrap();
        let mut other = artifact(fp.clone());
        other.file_name = "copy.pdf".to_string();
        let second = ledger
            .commit_assembly(&claims[1], &other)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(second.file_name, "report.pdf");
        let u2 = UploadId::parse("u2").unwrap();
        assert_eq!(
            ledger.list_chunks(&u2).await.unwrap()[0].status,
            ChunkStatus::Consumed
        );
        assert_eq!(ledger.uploads_with_consumed_chunks(10).await.unwrap().len(), 2);
        assert_eq!(ledger.delete_consumed_chunks(&u2).await.unwrap(), 1);
        assert_eq!(ledger.list_completed("alice").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_purge_skips_active_sessions() {
        let ledger = MemoryLedger::new();
        let id = UploadId::parse("u1").unwrap();
        ledger.create_session(&declaration("u1", 2)).await.unwrap();
        ledger.confirm_chunk(&chunk("u1", 0, b"a")).await.unwrap();

        let past = Utc::now() - chrono::Duration::hours(1);
        assert!(ledger.list_idle_sessions(past, 10).await.unwrap().is_empty());
        assert!(!ledger.purge_session(&id, past).await.unwrap());

        let future = Utc::now() + chrono::Duration::seconds(5);
        assert_eq!(ledger.list_idle_sessions(future, 10).await.unwrap().len(), 1);
        assert!(ledger.purge_session(&id, future).await.unwrap());
        assert!(ledger.get_session(&id).await.unwrap().is_none());
        assert!(ledger.list_chunks(&id).await.unwrap().is_empty());
    }
}
