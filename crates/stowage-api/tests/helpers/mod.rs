//! Test helpers: the full router over an in-memory ledger and a temp-dir store.
#![allow(dead_code)]

use axum_test::{TestResponse, TestServer};
use bytes::Bytes;
use serde_json::{json, Value};
use std::sync::Arc;
use stowage_api::constants::{API_PREFIX, OWNER_HEADER};
use stowage_api::setup::{build_state, routes};
use stowage_api::state::AppState;
use stowage_core::{Config, Fingerprint, LedgerBackend, StowageConfig};
use stowage_db::MemoryLedger;
use stowage_services::LocalStorage;
use tempfile::TempDir;

/// API path prefix for tests (e.g. `/api/v0`).
pub fn api_path(path: &str) -> String {
    format!("{}{}", API_PREFIX, path)
}

pub struct TestApp {
    pub server: TestServer,
    pub state: Arc<AppState>,
    pub _temp_dir: TempDir,
}

impl TestApp {
    pub fn client(&self) -> &TestServer {
        &self.server
    }
}

pub async fn setup_test_app() -> TestApp {
    let temp_dir = tempfile::tempdir().expect("tempdir");
    let config = Config::new(StowageConfig {
        ledger_backend: LedgerBackend::Memory,
        storage_path: temp_dir.path().to_path_buf(),
        min_disk_free_gb: 0,
        disk_check_behavior: "warn".to_string(),
        janitor_interval_secs: 0,
        identification_window_bytes: 1024,
        ..StowageConfig::default()
    });

    let storage = LocalStorage::new(temp_dir.path())
        .await
        .expect("local storage");
    let state = build_state(
        config.clone(),
        Arc::new(MemoryLedger::new()),
        Arc::new(storage),
    );
    let router = routes::setup_routes(&config, state.clone()).expect("router");
    let server = TestServer::new(router).expect("test server");

    TestApp {
        server,
        state,
        _temp_dir: temp_dir,
    }
}

/// Deterministic test content
pub fn sample_bytes(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| ((i as u64 * 2_654_435_761 + seed as u64) >> 7) as u8)
        .collect()
}

pub fn split(data: &[u8], count: usize) -> Vec<Vec<u8>> {
    let chunk_size = data.len().div_ceil(count).max(1);
    data.chunks(chunk_size).map(|c| c.to_vec()).collect()
}

pub fn md5_hex(data: &[u8]) -> String {
    Fingerprint::of(data).to_string()
}

pub async fn declare(
    app: &TestApp,
    owner: &str,
    upload_id: &str,
    data: &[u8],
    total_chunks: usize,
) -> TestResponse {
    app.client()
        .post(&api_path("/uploads"))
        .add_header(OWNER_HEADER, owner)
        .json(&json!({
            "upload_id": upload_id,
            "whole_md5": md5_hex(data),
            "name": format!("{}.bin", upload_id),
            "size": data.len(),
            "total_chunks": total_chunks,
        }))
        .await
}

pub async fn put_chunk(
    app: &TestApp,
    owner: &str,
    upload_id: &str,
    index: usize,
    chunk: &[u8],
) -> TestResponse {
    app.client()
        .put(&api_path(&format!("/uploads/{}/chunks/{}", upload_id, index)))
        .add_header(OWNER_HEADER, owner)
        .bytes(Bytes::copy_from_slice(chunk))
        .await
}

pub async fn merge(
    app: &TestApp,
    owner: &str,
    upload_id: &str,
    data: &[u8],
    total_chunks: usize,
) -> TestResponse {
    app.client()
        .post(&api_path(&format!("/uploads/{}/merge", upload_id)))
        .add_header(OWNER_HEADER, owner)
        .json(&json!({
            "whole_md5": md5_hex(data),
            "name": format!("{}.bin", upload_id),
            "size": data.len(),
            "total_chunks": total_chunks,
        }))
        .await
}

/// Declare, upload every chunk and merge; returns the artifact summary
pub async fn upload_all(
    app: &TestApp,
    owner: &str,
    upload_id: &str,
    data: &[u8],
    chunk_count: usize,
) -> Value {
    let chunks = split(data, chunk_count);
    assert_eq!(declare(app, owner, upload_id, data, chunks.len()).await.status_code(), 200);
    for (index, chunk) in chunks.iter().enumerate() {
        assert_eq!(put_chunk(app, owner, upload_id, index, chunk).await.status_code(), 200);
    }
    let response = merge(app, owner, upload_id, data, chunks.len()).await;
    assert_eq!(response.status_code(), 200, "merge: {}", response.text());
    response.json::<Value>()
}
