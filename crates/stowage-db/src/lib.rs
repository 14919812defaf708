//! Stowage DB Library
//!
//! The durable upload ledger. [`UploadLedger`] is implemented by [`PgUploadLedger`]
//! for deployments and by [`MemoryLedger`] for single-process use and tests.

pub mod db;
pub mod setup;

pub use db::{
    ChunkConfirmation, MemoryLedger, PgUploadLedger, UploadLedger, CHUNK_ACCEPTING_STATES,
};
pub use setup::{create_ledger, setup_database};
