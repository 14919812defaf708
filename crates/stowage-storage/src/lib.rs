//! Stowage Storage Library
//!
//! Blob storage abstraction for staged chunks, assembly output, published artifacts
//! and thumbnails, plus the local filesystem backend.
//!
//! # Storage key format
//!
//! Key generation is centralized in the [`keys`] module. Keys must not contain `..`
//! or a leading `/`.

pub mod factory;
pub mod keys;
pub mod local;
pub mod traits;

// Re-export commonly used types
pub use factory::create_storage;
pub use local::LocalStorage;
pub use traits::{BlobMeta, ByteStream, Storage, StorageError, StorageResult};
