//! Error types module
//!
//! All failures surfaced by the upload core are unified under [`AppError`]. Each
//! variant describes itself through [`ErrorMetadata`] so transports can render a
//! machine-checkable kind, a human message and a retry hint without matching on
//! variants themselves.
//!
//! The `Database` variant and `From<sqlx::Error>` are gated behind the `sqlx` feature.

use std::io;

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;

/// Severity an error is logged at when it reaches a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Client mistakes: bad parameters, unknown ids
    Debug,
    /// Retryable conditions such as contention or a full disk
    Warn,
    /// Storage and ledger faults
    Error,
}

/// How an error presents itself to a client
pub trait ErrorMetadata {
    /// Status code when served over HTTP
    fn http_status_code(&self) -> u16;

    /// Machine-readable error code (e.g., "CHUNKS_INCOMPLETE")
    fn error_code(&self) -> &'static str;

    /// Whether repeating the same request can succeed
    fn is_recoverable(&self) -> bool;

    /// What the client should do next, if anything useful
    fn suggested_action(&self) -> Option<&'static str>;

    /// Message safe to show a client
    fn client_message(&self) -> String;

    /// Sensitive errors never expose their details
    fn is_sensitive(&self) -> bool;

    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Upload not found: {0}")]
    UploadNotFound(String),

    #[error("Chunk index {index} out of range for upload with {total} chunks")]
    ChunkIndexOutOfRange { index: i64, total: u32 },

    #[error("Chunks incomplete: missing indices {missing:?}")]
    ChunksIncomplete { missing: Vec<u32> },

    #[error("Chunk count mismatch: {declared} declared, {confirmed} confirmed")]
    ChunkCountMismatch { declared: u32, confirmed: u32 },

    #[error("Assembly already in progress for upload {0}")]
    AssemblyInProgress(String),

    #[error("Integrity mismatch: expected {expected}, computed {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    #[error("Storage I/O error: {0}")]
    StorageIO(String),

    #[error("Range not satisfiable: {start}-{end} for {size} bytes")]
    RangeNotSatisfiable { start: u64, end: u64, size: u64 },

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("Declaration conflict: {0}")]
    DeclarationConflict(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Insufficient disk space: {available} bytes available, {required} bytes required")]
    InsufficientDiskSpace { available: u64, required: u64 },

    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    #[cfg(not(feature = "sqlx"))]
    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

#[cfg(feature = "sqlx")]
impl From<SqlxError> for AppError {
    fn from(err: SqlxError) -> Self {
        AppError::Database(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        // Errors raised by the core and wrapped by anyhow keep their kind.
        match err.downcast::<AppError>() {
            Ok(app_error) => app_error,
            Err(err) => AppError::InternalWithSource {
                message: err.to_string(),
                source: err,
            },
        }
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::StorageIO(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidInput(format!("JSON parsing error: {}", err))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::InvalidInput(format!("Validation error: {}", err))
    }
}

/// (status, code, recoverable, action, sensitive, log level) per variant
fn app_error_static_metadata(
    err: &AppError,
) -> (
    u16,
    &'static str,
    bool,
    Option<&'static str>,
    bool,
    LogLevel,
) {
    match err {
        AppError::MissingParameter(_) => (
            400,
            "MISSING_PARAMETER",
            false,
            Some("Supply the missing parameter and retry"),
            false,
            LogLevel::Debug,
        ),
        AppError::UploadNotFound(_) => (
            404,
            "UPLOAD_NOT_FOUND",
            false,
            Some("Declare the upload again and start over"),
            false,
            LogLevel::Debug,
        ),
        AppError::ChunkIndexOutOfRange { .. } => (
            400,
            "CHUNK_INDEX_OUT_OF_RANGE",
            false,
            Some("Use a chunk index below the declared chunk count"),
            false,
            LogLevel::Debug,
        ),
        AppError::ChunksIncomplete { .. } => (
            409,
            "CHUNKS_INCOMPLETE",
            true,
            Some("Upload the missing chunks, then merge again"),
            false,
            LogLevel::Debug,
        ),
        AppError::ChunkCountMismatch { .. } => (
            409,
            "CHUNK_COUNT_MISMATCH",
            false,
            Some("Merge with the chunk count used at declaration"),
            false,
            LogLevel::Debug,
        ),
        AppError::AssemblyInProgress(_) => (
            409,
            "ASSEMBLY_IN_PROGRESS",
            true,
            Some("Wait for the running assembly and query status"),
            false,
            LogLevel::Debug,
        ),
        AppError::IntegrityMismatch { .. } => (
            422,
            "INTEGRITY_MISMATCH",
            true,
            Some("Verify chunk checksums, re-upload corrupt chunks and merge again"),
            false,
            LogLevel::Warn,
        ),
        AppError::StorageIO(_) => (
            503,
            "STORAGE_IO",
            true,
            Some("Retry the same request after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::RangeNotSatisfiable { .. } => (
            416,
            "RANGE_NOT_SATISFIABLE",
            false,
            Some("Request a byte range within the artifact size"),
            false,
            LogLevel::Debug,
        ),
        AppError::ArtifactNotFound(_) => (
            404,
            "ARTIFACT_NOT_FOUND",
            false,
            Some("Verify the artifact identifier"),
            false,
            LogLevel::Debug,
        ),
        AppError::DeclarationConflict(_) => (
            409,
            "DECLARATION_CONFLICT",
            false,
            Some("Use a new upload_id or repeat the original declaration"),
            false,
            LogLevel::Debug,
        ),
        AppError::InvalidInput(_) => (
            400,
            "INVALID_INPUT",
            false,
            Some("Check request parameters and try again"),
            false,
            LogLevel::Debug,
        ),
        AppError::PayloadTooLarge(_) => (
            413,
            "PAYLOAD_TOO_LARGE",
            false,
            Some("Reduce the chunk or file size"),
            false,
            LogLevel::Debug,
        ),
        AppError::InsufficientDiskSpace { .. } => (
            507,
            "INSUFFICIENT_DISK_SPACE",
            true,
            Some("Retry after cleanup or wait for capacity"),
            false,
            LogLevel::Warn,
        ),
        AppError::Database(_) => (
            500,
            "DATABASE_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::Internal(_) | AppError::InternalWithSource { .. } => (
            500,
            "INTERNAL_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
    }
}

impl AppError {
    /// Variant name, used as `error_type` in detailed responses
    pub fn error_type(&self) -> &str {
        match self {
            AppError::MissingParameter(_) => "MissingParameter",
            AppError::UploadNotFound(_) => "UploadNotFound",
            AppError::ChunkIndexOutOfRange { .. } => "ChunkIndexOutOfRange",
            AppError::ChunksIncomplete { .. } => "ChunksIncomplete",
            AppError::ChunkCountMismatch { .. } => "ChunkCountMismatch",
            AppError::AssemblyInProgress(_) => "AssemblyInProgress",
            AppError::IntegrityMismatch { .. } => "IntegrityMismatch",
            AppError::StorageIO(_) => "StorageIO",
            AppError::RangeNotSatisfiable { .. } => "RangeNotSatisfiable",
            AppError::ArtifactNotFound(_) => "ArtifactNotFound",
            AppError::DeclarationConflict(_) => "DeclarationConflict",
            AppError::InvalidInput(_) => "InvalidInput",
            AppError::PayloadTooLarge(_) => "PayloadTooLarge",
            AppError::InsufficientDiskSpace { .. } => "InsufficientDiskSpace",
            AppError::Database(_) => "Database",
            AppError::Internal(_) => "Internal",
            AppError::InternalWithSource { .. } => "Internal",
        }
    }

    /// Missing chunk indices, for errors that carry them
    pub fn missing_chunks(&self) -> Option<&[u32]> {
        match self {
            AppError::ChunksIncomplete { missing } => Some(missing),
            _ => None,
        }
    }

    /// Display text followed by the source chain
    pub fn detailed_message(&self) -> String {
        use std::error::Error;

        let mut details = self.to_string();

        let mut source = self.source();
        let mut depth = 0;
        while let Some(err) = source {
            depth += 1;
            if depth > 5 {
                details.push_str("\n  ... (truncated)");
                break;
            }
            details.push_str(&format!("\n  Caused by: {}", err));
            source = err.source();
        }

        details
    }
}

impl ErrorMetadata for AppError {
    fn http_status_code(&self) -> u16 {
        app_error_static_metadata(self).0
    }

    fn error_code(&self) -> &'static str {
        app_error_static_metadata(self).1
    }

    fn is_recoverable(&self) -> bool {
        app_error_static_metadata(self).2
    }

    fn suggested_action(&self) -> Option<&'static str> {
        app_error_static_metadata(self).3
    }

    fn is_sensitive(&self) -> bool {
        app_error_static_metadata(self).4
    }

    fn log_level(&self) -> LogLevel {
        app_error_static_metadata(self).5
    }

    fn client_message(&self) -> String {
        match self {
            AppError::MissingParameter(ref name) => format!("Missing required parameter: {}", name),
            AppError::UploadNotFound(ref id) => format!("Upload not found: {}", id),
            AppError::ChunkIndexOutOfRange { index, total } => format!(
                "Chunk index {} is out of range; valid indices are 0..{}",
                index, total
            ),
            AppError::ChunksIncomplete { missing } => {
                let listed = missing
                    .iter()
                    .map(|i| i.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("Chunks missing: {}", listed)
            }
            AppError::ChunkCountMismatch {
                declared,
                confirmed,
            } => format!(
                "Declared {} chunks but {} chunks are confirmed",
                declared, confirmed
            ),
            AppError::AssemblyInProgress(ref id) => {
                format!("Assembly already running for upload {}", id)
            }
            AppError::IntegrityMismatch { expected, actual } => format!(
                "Assembled file does not match the declared fingerprint (expected {}, got {})",
                expected, actual
            ),
            AppError::StorageIO(_) => "Storage temporarily unavailable".to_string(),
            AppError::RangeNotSatisfiable { start, end, size } => format!(
                "Requested range {}-{} is not satisfiable for {} bytes",
                start, end, size
            ),
            AppError::ArtifactNotFound(ref id) => format!("Artifact not found: {}", id),
            AppError::DeclarationConflict(ref msg) => msg.clone(),
            AppError::InvalidInput(ref msg) => msg.clone(),
            AppError::PayloadTooLarge(ref msg) => msg.clone(),
            AppError::InsufficientDiskSpace {
                available,
                required,
            } => format!(
                "Insufficient disk space: {} bytes available, {} bytes required",
                available, required
            ),
            AppError::Database(_) => "Failed to access upload ledger".to_string(),
            AppError::Internal(_) => "Internal server error".to_string(),
            AppError::InternalWithSource { .. } => "Internal server error".to_string(),
        }
    }
}
