//! Shared setup for upload core integration tests.
#![allow(dead_code)]

use futures::StreamExt;
use std::sync::Arc;
use stowage_core::models::{
    CompletedArtifact, DeclareUploadRequest, MergeChunksRequest, UploadId,
};
use stowage_core::{Config, Fingerprint, LedgerBackend, StowageConfig};
use stowage_db::{MemoryLedger, UploadLedger};
use stowage_services::{LocalStorage, Storage, UploadCore};
use stowage_storage::ByteStream;
use tempfile::TempDir;

pub struct TestCore {
    pub core: UploadCore,
    pub config: Config,
    pub ledger: Arc<MemoryLedger>,
    pub storage: Arc<LocalStorage>,
    _dir: TempDir,
}

pub mod gated;

pub use gated::GatedStorage;

pub fn test_config(dir: &TempDir) -> Config {
    config_with(dir, |_| {})
}

fn config_with(dir: &TempDir, configure: impl FnOnce(&mut StowageConfig)) -> Config {
    let mut config = StowageConfig {
        ledger_backend: LedgerBackend::Memory,
        storage_path: dir.path().to_path_buf(),
        min_disk_free_gb: 0,
        disk_check_behavior: "warn".to_string(),
        max_concurrent_assemblies: 2,
        upload_retention_hours: 0,
        janitor_interval_secs: 0,
        assembly_stale_after_secs: 0,
        identification_window_bytes: 1024,
        ..StowageConfig::default()
    };
    configure(&mut config);
    Config::new(config)
}

pub async fn setup_core() -> TestCore {
    setup_core_with(|_| {}).await
}

pub async fn setup_core_with(configure: impl FnOnce(&mut StowageConfig)) -> TestCore {
    let (dir, storage) = local_storage().await;
    build_core(dir, storage.clone(), storage as Arc<dyn Storage>, configure)
}

/// Core whose storage can hold a write open; `storage` stays the plain backend
pub async fn setup_gated_core(
    configure: impl FnOnce(&mut StowageConfig),
) -> (TestCore, Arc<GatedStorage>) {
    let (dir, storage) = local_storage().await;
    let gated = Arc::new(GatedStorage::new(storage.clone()));
    let core = build_core(dir, storage, gated.clone() as Arc<dyn Storage>, configure);
    (core, gated)
}

async fn local_storage() -> (TempDir, Arc<LocalStorage>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let storage = Arc::new(
        LocalStorage::new(dir.path())
            .await
            .expect("local storage"),
    );
    (dir, storage)
}

fn build_core(
    dir: TempDir,
    storage: Arc<LocalStorage>,
    core_storage: Arc<dyn Storage>,
    configure: impl FnOnce(&mut StowageConfig),
) -> TestCore {
    let config = config_with(&dir, configure);
    let ledger = Arc::new(MemoryLedger::new());
    let core = UploadCore::new(&config, ledger.clone() as Arc<dyn UploadLedger>, core_storage);

    TestCore {
        core,
        config,
        ledger,
        storage,
        _dir: dir,
    }
}

/// Blob keys under an upload's staging prefix
pub fn staged_files(t: &TestCore, upload_id: &str) -> Vec<String> {
    let dir = t.storage.base_path().join("staging").join(upload_id);
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| format!("staging/{}/{}", upload_id, e.file_name().to_string_lossy()))
        .collect();
    names.sort();
    names
}

/// Deterministic, non-repeating-looking test content
pub fn sample_bytes(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| ((i as u64 * 2_654_435_761 + seed as u64) >> 7) as u8)
        .collect()
}

/// Split into `count` chunks of equal size, the last one taking the remainder
pub fn split(data: &[u8], count: usize) -> Vec<Vec<u8>> {
    let chunk_size = data.len().div_ceil(count).max(1);
    let mut chunks: Vec<Vec<u8>> = data.chunks(chunk_size).map(|c| c.to_vec()).collect();
    if chunks.is_empty() {
        chunks.push(Vec::new());
    }
    chunks
}

pub fn upload_id(value: &str) -> UploadId {
    UploadId::parse(value).expect("valid upload id")
}

pub fn declaration(upload_id: &str, name: &str, data: &[u8], total_chunks: u32) -> DeclareUploadRequest {
    DeclareUploadRequest {
        upload_id: upload_id.to_string(),
        whole_md5: Fingerprint::of(data).to_string(),
        name: name.to_string(),
        size: data.len() as u64,
        total_chunks: Some(total_chunks),
        chunk_size: None,
        chunk_md5s: None,
        category: None,
    }
}

pub fn merge_request(name: &str, data: &[u8], total_chunks: u32) -> MergeChunksRequest {
    MergeChunksRequest {
        whole_md5: Fingerprint::of(data).to_string(),
        name: name.to_string(),
        size: data.len() as u64,
        total_chunks,
        category: None,
    }
}

/// Declare, send every chunk, merge
pub async fn upload_all(
    core: &UploadCore,
    owner: &str,
    id: &str,
    name: &str,
    data: &[u8],
    chunk_count: usize,
) -> CompletedArtifact {
    let chunks = split(data, chunk_count);
    let total = chunks.len() as u32;
    core.dedup
        .declare_upload(owner, declaration(id, name, data, total))
        .await
        .expect("declare");

    let uid = upload_id(id);
    for (index, chunk) in chunks.into_iter().enumerate() {
        core.chunks
            .put_chunk(owner, &uid, index as i64, chunk.into())
            .await
            .expect("put chunk");
    }

    core.assembly
        .merge_chunks(owner, &uid, merge_request(name, data, total))
        .await
        .expect("merge")
}

pub async fn read_all(mut body: ByteStream) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = body.next().await {
        out.extend_from_slice(&chunk.expect("read chunk"));
    }
    out
}
