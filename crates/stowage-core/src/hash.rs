//! Content hashing.
//!
//! Two digests with two different jobs:
//!
//! - [`Fingerprint`] is the strict whole-content MD5. It is the only digest allowed to
//!   decide integrity and dedup identity.
//! - [`IdentificationDigest`] hashes the size plus a head and tail window. It is cheap
//!   for large files and only labels artifacts (ETag, listings). Two different files
//!   can share one.

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

const MD5_HEX_LEN: usize = 32;

/// Strict whole-content digest, rendered as 32 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Parse a client-supplied hex digest. Case is normalized.
    pub fn parse(value: &str) -> Result<Self, AppError> {
        let value = value.trim();
        if value.len() != MD5_HEX_LEN || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(AppError::InvalidInput(format!(
                "Fingerprint must be {} hex characters, got {:?}",
                MD5_HEX_LEN, value
            )));
        }
        Ok(Fingerprint(value.to_ascii_lowercase()))
    }

    /// Fingerprint of an in-memory payload.
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = StrictHasher::new();
        hasher.update(bytes);
        hasher.finalize()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Fingerprint::parse(s)
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Fingerprint::parse(&value)
    }
}

impl From<Fingerprint> for String {
    fn from(value: Fingerprint) -> Self {
        value.0
    }
}

/// Incremental strict hasher. Feed it a byte stream in any split; the result only
/// depends on the concatenated bytes.
#[derive(Clone, Default)]
pub struct StrictHasher {
    inner: Md5,
    bytes: u64,
}

impl StrictHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
        self.bytes += data.len() as u64;
    }

    /// Number of bytes hashed so far
    pub fn bytes_hashed(&self) -> u64 {
        self.bytes
    }

    pub fn finalize(self) -> Fingerprint {
        Fingerprint(hex::encode(self.inner.finalize()))
    }
}

/// Fast, sampling identification digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentificationDigest(String);

impl IdentificationDigest {
    /// Byte ranges `(start, len)` that feed the digest for a blob of `size` bytes.
    ///
    /// Blobs no larger than two windows contribute their whole content as the head.
    pub fn windows(size: u64, window: u64) -> ((u64, u64), Option<(u64, u64)>) {
        if size <= window.saturating_mul(2) {
            ((0, size), None)
        } else {
            ((0, window), Some((size - window, window)))
        }
    }

    pub fn compute(size: u64, head: &[u8], tail: &[u8]) -> Self {
        let mut hasher = Md5::new();
        hasher.update(size.to_le_bytes());
        hasher.update(head);
        hasher.update(tail);
        IdentificationDigest(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentificationDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
