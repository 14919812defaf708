//! Storage key layout.
//!
//! - `staging/{upload_id}/{chunk_index}.{attempt}.chunk`: one blob per chunk write attempt
//! - `staging/{upload_id}/assembly.{claim}.part`: output of one assembly claim before publication
//! - `artifacts/{artifact_id}`: published artifacts
//! - `thumbnails/{artifact_id}.png`: derived thumbnails

use stowage_core::models::{AssemblyClaim, UploadId};
use uuid::Uuid;

pub fn staging_prefix(upload_id: &UploadId) -> String {
    format!("staging/{}", upload_id)
}

/// Fresh key for one write attempt of a chunk. Concurrent writes to the same
/// index never share a blob.
pub fn chunk_key(upload_id: &UploadId, chunk_index: u32) -> String {
    format!(
        "staging/{}/{}.{}.chunk",
        upload_id,
        chunk_index,
        Uuid::new_v4().simple()
    )
}

pub fn assembly_key(claim: &AssemblyClaim) -> String {
    format!("staging/{}/assembly.{}.part", claim.upload_id, claim.token())
}

pub fn artifact_key(artifact_id: &str) -> String {
    format!("artifacts/{}", artifact_id)
}

pub fn thumbnail_key(artifact_id: &str) -> String {
    format!("thumbnails/{}.png", artifact_id)
}
