mod helpers;

use helpers::{declaration, merge_request, sample_bytes, setup_core, split, upload_all, upload_id};
use stowage_core::models::UploadState;
use stowage_core::{AppError, Fingerprint};
use stowage_db::UploadLedger;
use stowage_services::Storage;

#[tokio::test]
async fn test_known_content_completes_instantly() {
    let t = setup_core().await;
    let data = sample_bytes(10_000, 20);
    let original = upload_all(&t.core, "alice", "first", "a.bin", &data, 3).await;

    let response = t
        .core
        .dedup
        .declare_upload("bob", declaration("second", "copy.bin", &data, 3))
        .await
        .unwrap();
    assert!(response.uploaded);
    let file = response.file.unwrap();
    assert_eq!(file.artifact_id, original.artifact_id);
    assert!(response.chunk_check_result.is_none());

    // No chunk work was needed, and the session already reads as complete
    let second = upload_id("second");
    assert!(t.ledger.list_chunks(&second).await.unwrap().is_empty());
    let status = t.core.chunks.status("bob", &second, None).await.unwrap();
    assert_eq!(status.state, UploadState::Complete);
    assert_eq!(status.confirmed_chunk_indices, vec![0, 1, 2]);

    let merged = t
        .core
        .assembly
        .merge_chunks("bob", &second, merge_request("copy.bin", &data, 3))
        .await
        .unwrap();
    assert_eq!(merged.artifact_id, original.artifact_id);
}

#[tokio::test]
async fn test_missing_blob_disables_instant_completion() {
    let t = setup_core().await;
    let data = sample_bytes(1000, 21);
    let original = upload_all(&t.core, "alice", "gone", "a.bin", &data, 1).await;
    t.storage.delete(&original.storage_key).await.unwrap();

    let response = t
        .core
        .dedup
        .declare_upload("alice", declaration("again", "a.bin", &data, 1))
        .await
        .unwrap();
    assert!(!response.uploaded);
    let session = t.ledger.get_session(&upload_id("again")).await.unwrap().unwrap();
    assert_eq!(session.state, UploadState::Receiving);
}

#[tokio::test]
async fn test_per_chunk_report_lists_what_to_resend() {
    let t = setup_core().await;
    let data = sample_bytes(3000, 22);
    let chunks = split(&data, 3);
    let chunk_md5s: Vec<String> = chunks
        .iter()
        .map(|c| Fingerprint::of(c).to_string())
        .collect();
    let id = upload_id("resume");

    let mut request = declaration("resume", "a.bin", &data, 3);
    request.total_chunks = None;
    request.chunk_md5s = Some(chunk_md5s.clone());
    t.core.dedup.declare_upload("alice", request.clone()).await.unwrap();

    t.core
        .chunks
        .put_chunk("alice", &id, 0, chunks[0].clone().into())
        .await
        .unwrap();
    // Chunk 2 arrives corrupted
    t.core
        .chunks
        .put_chunk("alice", &id, 2, vec![0u8; chunks[2].len()].into())
        .await
        .unwrap();

    let response = t.core.dedup.declare_upload("alice", request).await.unwrap();
    assert!(!response.uploaded);
    let report = response.chunk_check_result.unwrap();
    let resend: Vec<u32> = report
        .iter()
        .filter(|c| c.needs_upload())
        .map(|c| c.chunk_index)
        .collect();
    assert_eq!(resend, vec![1, 2]);
    assert!(report[2].present && !report[2].matches);
}

#[tokio::test]
async fn test_redeclaration_must_match() {
    let t = setup_core().await;
    let data = sample_bytes(100, 23);
    t.core
        .dedup
        .declare_upload("alice", declaration("dup", "a.bin", &data, 2))
        .await
        .unwrap();

    // Same declaration is fine
    t.core
        .dedup
        .declare_upload("alice", declaration("dup", "a.bin", &data, 2))
        .await
        .unwrap();

    let err = t
        .core
        .dedup
        .declare_upload("alice", declaration("dup", "a.bin", &data, 3))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::DeclarationConflict(_)));

    let err = t
        .core
        .dedup
        .declare_upload("bob", declaration("dup", "a.bin", &data, 2))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::DeclarationConflict(_)));
}

#[tokio::test]
async fn test_declaration_validation() {
    let t = setup_core().await;
    let data = sample_bytes(100, 24);

    let mut request = declaration("v1", "a.bin", &data, 1);
    request.whole_md5 = String::new();
    assert!(matches!(
        t.core.dedup.declare_upload("alice", request).await,
        Err(AppError::MissingParameter(_))
    ));

    let mut request = declaration("v2", "a.bin", &data, 1);
    request.total_chunks = None;
    assert!(matches!(
        t.core.dedup.declare_upload("alice", request).await,
        Err(AppError::MissingParameter(_))
    ));

    let request = declaration("v3", "a.bin", &data, 101);
    assert!(matches!(
        t.core.dedup.declare_upload("alice", request).await,
        Err(AppError::InvalidInput(_))
    ));

    let request = declaration("../escape", "a.bin", &data, 1);
    assert!(t.core.dedup.declare_upload("alice", request).await.is_err());
}
