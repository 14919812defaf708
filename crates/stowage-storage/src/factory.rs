//! Storage factory for creating the configured backend

use crate::local::LocalStorage;
use crate::traits::{Storage, StorageResult};
use std::sync::Arc;
use stowage_core::Config;

/// Create the blob storage backend from configuration
pub async fn create_storage(config: &Config) -> StorageResult<Arc<dyn Storage>> {
    let storage = LocalStorage::new(config.storage_path()).await?;
    tracing::info!(
        path = %config.storage_path().display(),
        "Local storage initialized"
    );
    Ok(Arc::new(storage))
}
