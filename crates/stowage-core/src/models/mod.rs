//! Domain models for uploads, chunks and published artifacts.

pub mod artifact;
pub mod protocol;
#[cfg(feature = "sqlx")]
mod rows;
pub mod upload;

pub use artifact::{ArtifactSummary, CompletedArtifact};
pub use protocol::{
    ArtifactListEntry, ChunkCheck, ChunkUploadResponse, DeclareUploadRequest,
    DeclareUploadResponse, InstantCheck, MergeChunksRequest, UploadStatusResponse,
};
pub use upload::{AssemblyClaim, ChunkRecord, ChunkStatus, NewUploadSession, UploadId, UploadSession, UploadState};
