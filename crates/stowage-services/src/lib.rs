//! Stowage Services Layer
//!
//! The upload core: chunk staging, dedup, assembly, artifact lookup and the
//! background janitor. The API crate depends on [`UploadCore`] only.

pub mod assembly;
pub mod capacity;
pub mod chunk_store;
pub mod dedup;
pub mod janitor;
pub mod lookup;
pub mod thumbnail;
pub mod upload_core;

pub use assembly::{AssemblyConfig, AssemblyEngine, RecoveryReport};
pub use capacity::{CapacityChecker, DiskCheckBehavior};
pub use chunk_store::ChunkStore;
pub use dedup::{derive_total_chunks, DedupGate};
pub use janitor::{JanitorConfig, JanitorReport, JanitorService};
pub use lookup::{ArtifactCache, ArtifactLocation, ArtifactLookup, ArtifactRead, ByteRange, ResolvedRange};
pub use stowage_storage::{create_storage, LocalStorage, Storage, StorageError, StorageResult};
pub use upload_core::UploadCore;
