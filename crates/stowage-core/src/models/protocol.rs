//! Request and response payloads of the upload protocol.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use super::artifact::ArtifactSummary;
use super::upload::UploadState;

/// DeclareOrCheckInstant request
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct DeclareUploadRequest {
    /// Caller-chosen upload identifier
    #[validate(length(min = 1, max = 128))]
    pub upload_id: String,
    /// Whole-file MD5 (hex)
    pub whole_md5: String,
    /// Declared file name
    #[validate(length(
        min = 1,
        max = 255,
        message = "Name must be between 1 and 255 characters"
    ))]
    pub name: String,
    /// Declared total size in bytes
    pub size: u64,
    /// Declared number of chunks
    #[serde(default)]
    pub total_chunks: Option<u32>,
    /// Chunk size used by the client, if `total_chunks` is not given
    #[serde(default)]
    pub chunk_size: Option<u64>,
    /// Expected per-chunk MD5s, indexed by chunk
    #[serde(default)]
    pub chunk_md5s: Option<Vec<String>>,
    /// Optional category tag
    #[serde(default)]
    #[validate(length(max = 64))]
    pub category: Option<String>,
}

/// Per-chunk verification result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ChunkCheck {
    pub chunk_index: u32,
    /// A CONFIRMED chunk exists for this index
    pub present: bool,
    /// The stored chunk's MD5 equals the expected one
    pub matches: bool,
}

impl ChunkCheck {
    /// Whether the client has to (re)send this chunk
    pub fn needs_upload(&self) -> bool {
        !(self.present && self.matches)
    }
}

/// Result of `checkInstant`
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct InstantCheck {
    pub already_complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<ArtifactSummary>,
    pub per_chunk: Vec<ChunkCheck>,
}

/// DeclareOrCheckInstant response
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DeclareUploadResponse {
    pub upload_id: String,
    /// True when the content already exists and no chunk upload is needed
    pub uploaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<ArtifactSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_check_result: Option<Vec<ChunkCheck>>,
}

/// QueryStatus response
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UploadStatusResponse {
    pub upload_id: String,
    pub state: UploadState,
    pub total_chunks: u32,
    pub confirmed_chunk_indices: Vec<u32>,
    pub uploaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<ArtifactSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// UploadChunk response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChunkUploadResponse {
    pub chunk_index: u32,
    pub chunk_md5: String,
}

/// MergeChunks request
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct MergeChunksRequest {
    pub whole_md5: String,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub size: u64,
    pub total_chunks: u32,
    #[serde(default)]
    #[validate(length(max = 64))]
    pub category: Option<String>,
}

/// Artifact listing entry
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ArtifactListEntry {
    #[serde(flatten)]
    pub artifact: ArtifactSummary,
    /// Fast identification digest, also served as ETag
    pub etag: String,
    pub upload_id: String,
    pub completed_at: chrono::DateTime<chrono::Utc>,
}
