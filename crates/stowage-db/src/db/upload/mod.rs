//! Upload ledger: sessions, chunk records and completed artifacts.

pub mod ledger;
pub mod memory;
pub mod postgres;

pub use ledger::{ChunkConfirmation, UploadLedger, CHUNK_ACCEPTING_STATES};
pub use memory::MemoryLedger;
pub use postgres::PgUploadLedger;
