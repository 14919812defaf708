use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;
use stowage_core::models::CompletedArtifact;
use stowage_core::IdentificationDigest;
use stowage_storage::BlobMeta;

/// Where an artifact lives and what its blob looked like when the entry was computed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLocation {
    pub artifact: CompletedArtifact,
    pub size: u64,
    pub modified: Option<SystemTime>,
    /// Fast identification digest of the blob, served as ETag
    pub etag: IdentificationDigest,
}

impl ArtifactLocation {
    /// An entry is valid only for the exact blob it was computed from
    pub fn is_current(&self, meta: &BlobMeta) -> bool {
        self.size == meta.size && self.modified == meta.modified
    }
}

/// Per-process LRU of artifact locations, keyed by artifact id.
///
/// Entries are revalidated against the blob's size and modification time on
/// every hit; the cache is never trusted on its own.
pub struct ArtifactCache {
    entries: Mutex<LruCache<String, ArtifactLocation>>,
}

impl ArtifactCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn entries(&self) -> MutexGuard<'_, LruCache<String, ArtifactLocation>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, artifact_id: &str) -> Option<ArtifactLocation> {
        self.entries().get(artifact_id).cloned()
    }

    pub fn insert(&self, location: ArtifactLocation) {
        self.entries()
            .put(location.artifact.artifact_id.clone(), location);
    }

    pub fn invalidate(&self, artifact_id: &str) {
        self.entries().pop(artifact_id);
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
