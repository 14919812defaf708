//! Stowage Core Library
//!
//! Domain models, error types, configuration, hashing and content classification
//! shared by every stowage crate.

pub mod config;
pub mod content;
pub mod error;
pub mod hash;
pub mod models;

pub use config::{BaseConfig, Config, LedgerBackend, StowageConfig};
pub use content::{classify, Classification, ContentClass};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use hash::{Fingerprint, IdentificationDigest, StrictHasher};
