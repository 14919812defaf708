//! Database repositories for the upload ledger
//
// Upload sessions, chunk records and completed artifacts
pub mod upload;
//
// Transaction utilities
pub mod transaction;

pub use upload::{
    ChunkConfirmation, MemoryLedger, PgUploadLedger, UploadLedger, CHUNK_ACCEPTING_STATES,
};
