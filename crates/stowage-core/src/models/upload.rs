use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use utoipa::ToSchema;

use crate::error::AppError;
use crate::hash::Fingerprint;

const MAX_UPLOAD_ID_LEN: usize = 128;

/// Caller-supplied opaque upload identifier.
///
/// Restricted to `[A-Za-z0-9_-]{1,128}` so it can be used as a storage path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "String", into = "String")]
#[schema(value_type = String)]
pub struct UploadId(String);

impl UploadId {
    pub fn parse(value: &str) -> Result<Self, AppError> {
        if value.is_empty() {
            return Err(AppError::MissingParameter("upload_id".to_string()));
        }
        if value.len() > MAX_UPLOAD_ID_LEN
            || !value
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(AppError::InvalidInput(format!(
                "upload_id must match [A-Za-z0-9_-]{{1,{}}}",
                MAX_UPLOAD_ID_LEN
            )));
        }
        Ok(UploadId(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for UploadId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for UploadId {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        UploadId::parse(&value)
    }
}

impl From<UploadId> for String {
    fn from(value: UploadId) -> Self {
        value.0
    }
}

/// Lifecycle state of an upload session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Receiving,
    ReadyToAssemble,
    Assembling,
    Complete,
    Failed,
}

impl UploadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadState::Receiving => "receiving",
            UploadState::ReadyToAssemble => "ready_to_assemble",
            UploadState::Assembling => "assembling",
            UploadState::Complete => "complete",
            UploadState::Failed => "failed",
        }
    }

    /// States in which chunk writes are accepted. FAILED counts: it falls back to RECEIVING.
    pub fn accepts_chunks(&self) -> bool {
        matches!(
            self,
            UploadState::Receiving | UploadState::ReadyToAssemble | UploadState::Failed
        )
    }

    /// States from which an assembly may be claimed
    pub fn can_start_assembly(&self) -> bool {
        self.accepts_chunks()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadState::Complete)
    }
}

impl FromStr for UploadState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "receiving" => Ok(UploadState::Receiving),
            "ready_to_assemble" => Ok(UploadState::ReadyToAssemble),
            "assembling" => Ok(UploadState::Assembling),
            "complete" => Ok(UploadState::Complete),
            "failed" => Ok(UploadState::Failed),
            _ => Err(anyhow::anyhow!("Invalid upload state: {}", s)),
        }
    }
}

impl Display for UploadState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// Status of a single staged chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    Receiving,
    Confirmed,
    Consumed,
}

impl ChunkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStatus::Receiving => "receiving",
            ChunkStatus::Confirmed => "confirmed",
            ChunkStatus::Consumed => "consumed",
        }
    }
}

impl FromStr for ChunkStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "receiving" => Ok(ChunkStatus::Receiving),
            "confirmed" => Ok(ChunkStatus::Confirmed),
            "consumed" => Ok(ChunkStatus::Consumed),
            _ => Err(anyhow::anyhow!("Invalid chunk status: {}", s)),
        }
    }
}

impl Display for ChunkStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// Declared metadata for a new upload session
#[derive(Debug, Clone)]
pub struct NewUploadSession {
    pub upload_id: UploadId,
    pub owner: String,
    pub file_name: String,
    pub total_size: u64,
    pub total_chunks: u32,
    pub fingerprint: Fingerprint,
    pub category: Option<String>,
}

impl NewUploadSession {
    /// Whether `session` was created from an identical declaration
    pub fn matches(&self, session: &UploadSession) -> bool {
        self.owner == session.owner
            && self.total_size == session.total_size
            && self.total_chunks == session.total_chunks
            && self.fingerprint == session.fingerprint
    }
}

/// Ledger entry for an upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub upload_id: UploadId,
    pub owner: String,
    pub file_name: String,
    pub total_size: u64,
    pub total_chunks: u32,
    pub fingerprint: Fingerprint,
    pub state: UploadState,
    pub category: Option<String>,
    pub artifact_id: Option<String>,
    pub last_error: Option<String>,
    pub assembly_started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadSession {
    /// Reject a chunk index outside `[0, total_chunks)`
    pub fn check_chunk_index(&self, index: i64) -> Result<u32, AppError> {
        if index < 0 || index >= i64::from(self.total_chunks) {
            return Err(AppError::ChunkIndexOutOfRange {
                index,
                total: self.total_chunks,
            });
        }
        Ok(index as u32)
    }

    /// Indices in `[0, total_chunks)` absent from `confirmed` (which must be sorted)
    pub fn missing_chunks(&self, confirmed: &[u32]) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|i| confirmed.binary_search(i).is_err())
            .collect()
    }
}

/// One assembly attempt on an upload.
///
/// The claim's start time doubles as a fencing token: ledger writes that end an
/// assembly only apply while the session still carries the same start time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssemblyClaim {
    pub upload_id: UploadId,
    pub started_at: DateTime<Utc>,
}

impl AssemblyClaim {
    /// Claim held by an ASSEMBLING session
    pub fn of(session: &UploadSession) -> Option<Self> {
        if session.state != UploadState::Assembling {
            return None;
        }
        Some(Self {
            upload_id: session.upload_id.clone(),
            started_at: session.assembly_started_at?,
        })
    }

    /// Microsecond token, stable across ledger backends
    pub fn token(&self) -> i64 {
        self.started_at.timestamp_micros()
    }
}

/// One staged chunk of an upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    pub upload_id: UploadId,
    pub chunk_index: u32,
    pub status: ChunkStatus,
    pub owner: String,
    pub fingerprint: Fingerprint,
    pub storage_key: String,
    pub size_bytes: u64,
    pub uploaded_at: DateTime<Utc>,
}
