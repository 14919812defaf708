mod helpers;

use chrono::{Duration as ChronoDuration, Utc};
use helpers::{
    declaration, merge_request, sample_bytes, setup_core, setup_core_with, split, upload_all,
    upload_id, TestCore,
};
use std::time::Duration;
use stowage_core::models::{AssemblyClaim, CompletedArtifact, UploadState};
use stowage_core::{ContentClass, Fingerprint};
use stowage_db::UploadLedger;
use stowage_services::{RecoveryReport, Storage};
use stowage_storage::keys;

const OWNER: &str = "alice";

/// Declare `id` and confirm every chunk of `data`
async fn stage_all(t: &TestCore, id: &str, data: &[u8], chunk_count: usize) {
    let chunks = split(data, chunk_count);
    t.core
        .dedup
        .declare_upload(OWNER, declaration(id, "a.bin", data, chunks.len() as u32))
        .await
        .unwrap();
    for (index, chunk) in chunks.into_iter().enumerate() {
        t.core
            .chunks
            .put_chunk(OWNER, &upload_id(id), index as i64, chunk.into())
            .await
            .unwrap();
    }
}

fn artifact_for(data: &[u8]) -> CompletedArtifact {
    let fingerprint = Fingerprint::of(data);
    let artifact_id = CompletedArtifact::id_for(&fingerprint);
    CompletedArtifact {
        storage_key: keys::artifact_key(&artifact_id),
        artifact_id,
        fingerprint,
        file_name: "a.bin".to_string(),
        size_bytes: data.len() as u64,
        mime_type: "application/octet-stream".to_string(),
        content_class: ContentClass::Binary,
        thumbnail_key: None,
        owner: OWNER.to_string(),
        category: None,
        complete: true,
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_idle_uploads_are_purged() {
    let t = setup_core().await;
    let data = sample_bytes(2000, 40);
    let idle = upload_id("idle");
    t.core
        .dedup
        .declare_upload(OWNER, declaration("idle", "a.bin", &data, 2))
        .await
        .unwrap();
    t.core
        .chunks
        .put_chunk(OWNER, &idle, 0, split(&data, 2)[0].clone().into())
        .await
        .unwrap();
    let done = upload_all(&t.core, OWNER, "done", "b.bin", &sample_bytes(10, 41), 1).await;

    tokio::time::sleep(Duration::from_millis(10)).await;
    let report = t.core.janitor(&t.config).run_once().await.unwrap();
    assert_eq!(report.sessions_purged, 1);

    assert!(t.ledger.get_session(&idle).await.unwrap().is_none());
    assert!(t.ledger.list_chunks(&idle).await.unwrap().is_empty());
    assert!(!t.storage.base_path().join("staging/idle").exists());

    // Completed uploads and their artifacts stay
    let session = t.ledger.get_session(&upload_id("done")).await.unwrap().unwrap();
    assert_eq!(session.state, UploadState::Complete);
    assert!(t.storage.exists(&done.storage_key).await.unwrap());
}

#[tokio::test]
async fn test_leftover_consumed_chunks_are_deleted() {
    let t = setup_core().await;
    let data = sample_bytes(3000, 42);
    let id = upload_id("leftover");
    stage_all(&t, "leftover", &data, 3).await;

    // An assembly whose chunk cleanup never ran
    let claimed = t.ledger.try_begin_assembly(&id).await.unwrap().unwrap();
    let claim = AssemblyClaim::of(&claimed).unwrap();
    let artifact = artifact_for(&data);
    t.storage
        .put(&artifact.storage_key, data.clone().into())
        .await
        .unwrap();
    t.ledger.commit_assembly(&claim, &artifact).await.unwrap().unwrap();
    assert_eq!(t.ledger.list_chunks(&id).await.unwrap().len(), 3);

    let report = t.core.janitor(&t.config).run_once().await.unwrap();
    assert_eq!(report.consumed_chunks_deleted, 3);
    assert!(t.ledger.list_chunks(&id).await.unwrap().is_empty());
    assert!(!t.storage.base_path().join("staging/leftover").exists());
    assert!(t.storage.exists(&artifact.storage_key).await.unwrap());
}

#[tokio::test]
async fn test_interrupted_assembly_is_released_and_retryable() {
    let t = setup_core().await;
    let data = sample_bytes(3000, 43);
    let id = upload_id("crashed");
    stage_all(&t, "crashed", &data, 3).await;

    // Crash after the write-ahead claim, with a partial staging blob on disk
    let claimed = t.ledger.try_begin_assembly(&id).await.unwrap().unwrap();
    let claim = AssemblyClaim::of(&claimed).unwrap();
    t.storage
        .put(&keys::assembly_key(&claim), data[..1000].to_vec().into())
        .await
        .unwrap();

    let report = t
        .core
        .assembly
        .recover_assemblies_started_before(Utc::now() + ChronoDuration::seconds(1))
        .await
        .unwrap();
    assert_eq!(
        report,
        RecoveryReport {
            committed: 0,
            released: 1,
            skipped: 0
        }
    );
    let session = t.ledger.get_session(&id).await.unwrap().unwrap();
    assert_eq!(session.state, UploadState::ReadyToAssemble);
    assert!(!t.storage.exists(&keys::assembly_key(&claim)).await.unwrap());

    let artifact = t
        .core
        .assembly
        .merge_chunks(OWNER, &id, merge_request("a.bin", &data, 3))
        .await
        .unwrap();
    assert_eq!(artifact.fingerprint, Fingerprint::of(&data));
}

#[tokio::test]
async fn test_published_but_uncommitted_assembly_is_committed() {
    let t = setup_core().await;
    let data = sample_bytes(3000, 44);
    let id = upload_id("published");
    stage_all(&t, "published", &data, 3).await;

    // Crash after the publish rename, before the ledger commit
    t.ledger.try_begin_assembly(&id).await.unwrap().unwrap();
    let artifact = artifact_for(&data);
    t.storage
        .put(&artifact.storage_key, data.clone().into())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;
    let report = t.core.janitor(&t.config).run_once().await.unwrap();
    assert_eq!(report.recovery.committed, 1);

    let session = t.ledger.get_session(&id).await.unwrap().unwrap();
    assert_eq!(session.state, UploadState::Complete);
    assert_eq!(session.artifact_id.as_deref(), Some(artifact.artifact_id.as_str()));
    assert!(t.ledger.list_chunks(&id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_recovery_ignores_fresh_assemblies() {
    let t = setup_core().await;
    let data = sample_bytes(100, 45);
    let id = upload_id("fresh");
    stage_all(&t, "fresh", &data, 1).await;
    t.ledger.try_begin_assembly(&id).await.unwrap().unwrap();

    let report = t
        .core
        .assembly
        .recover_assemblies_started_before(Utc::now() - ChronoDuration::hours(1))
        .await
        .unwrap();
    assert_eq!(report, RecoveryReport::default());
    let session = t.ledger.get_session(&id).await.unwrap().unwrap();
    assert_eq!(session.state, UploadState::Assembling);
}

#[tokio::test]
async fn test_startup_recovery_takes_every_assembly_of_an_owned_ledger() {
    let t = setup_core_with(|c| c.assembly_stale_after_secs = 3600).await;
    assert!(t.config.owns_ledger());
    let data = sample_bytes(2000, 46);
    let id = upload_id("orphan");
    stage_all(&t, "orphan", &data, 2).await;

    // Claimed by a process that no longer exists
    t.ledger.try_begin_assembly(&id).await.unwrap().unwrap();

    let stale = t.core.assembly.recover_stale().await.unwrap();
    assert_eq!(stale, RecoveryReport::default());

    let startup = t.core.assembly.recover_at_startup().await.unwrap();
    assert_eq!(startup.released, 1);
    let session = t.ledger.get_session(&id).await.unwrap().unwrap();
    assert_eq!(session.state, UploadState::ReadyToAssemble);
}

#[tokio::test]
async fn test_startup_recovery_of_a_shared_ledger_waits_for_staleness() {
    let t = setup_core_with(|c| {
        c.ledger_backend = stowage_core::LedgerBackend::Postgres;
        c.assembly_stale_after_secs = 3600;
    })
    .await;
    assert!(!t.config.owns_ledger());
    let data = sample_bytes(2000, 47);
    let id = upload_id("shared");
    stage_all(&t, "shared", &data, 2).await;
    t.ledger.try_begin_assembly(&id).await.unwrap().unwrap();

    let startup = t.core.assembly.recover_at_startup().await.unwrap();
    assert_eq!(startup, RecoveryReport::default());
    let session = t.ledger.get_session(&id).await.unwrap().unwrap();
    assert_eq!(session.state, UploadState::Assembling);
}
