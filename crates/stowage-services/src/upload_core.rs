//! The upload core wired together from configuration

use std::sync::Arc;
use stowage_core::Config;
use stowage_db::UploadLedger;
use stowage_storage::Storage;

use crate::assembly::{AssemblyConfig, AssemblyEngine};
use crate::capacity::CapacityChecker;
use crate::chunk_store::ChunkStore;
use crate::dedup::DedupGate;
use crate::janitor::{JanitorConfig, JanitorService};
use crate::lookup::ArtifactLookup;

/// Every component of the upload core, sharing one ledger and one storage backend.
#[derive(Clone)]
pub struct UploadCore {
    pub chunks: ChunkStore,
    pub dedup: DedupGate,
    pub assembly: AssemblyEngine,
    pub lookup: ArtifactLookup,
    pub ledger: Arc<dyn UploadLedger>,
    pub storage: Arc<dyn Storage>,
}

impl UploadCore {
    pub fn new(config: &Config, ledger: Arc<dyn UploadLedger>, storage: Arc<dyn Storage>) -> Self {
        let capacity = CapacityChecker::new(config);

        let chunks = ChunkStore::new(
            ledger.clone(),
            storage.clone(),
            Some(capacity.clone()),
            config.max_chunk_size_bytes(),
        );
        let dedup = DedupGate::new(
            ledger.clone(),
            storage.clone(),
            chunks.clone(),
            config.max_upload_size_bytes(),
            config.max_chunk_count(),
        );
        let assembly = AssemblyEngine::new(
            ledger.clone(),
            storage.clone(),
            Some(capacity),
            AssemblyConfig::from_config(config),
        );
        let lookup = ArtifactLookup::new(
            ledger.clone(),
            storage.clone(),
            config.artifact_cache_capacity(),
            config.identification_window_bytes(),
        );

        Self {
            chunks,
            dedup,
            assembly,
            lookup,
            ledger,
            storage,
        }
    }

    /// Janitor over this core's ledger and storage
    pub fn janitor(&self, config: &Config) -> JanitorService {
        JanitorService::new(
            self.ledger.clone(),
            self.storage.clone(),
            self.assembly.clone(),
            JanitorConfig::from_config(config),
        )
    }
}
