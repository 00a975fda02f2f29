//! Blob storage handle.
//!
//! # Responsibilities
//! - Positional writes for chunked uploads
//! - Whole-blob reads and directory-like listings for downloads
//! - Availability probe for the injection stage
//!
//! # Design Decisions
//! - Keys are `/`-separated relative paths, validated before use
//! - `write_at` truncates everything past the written range, so replaying
//!   the same chunk after a cancelled write converges to the same bytes
//! - Implementations are shared across requests and internally synchronized

pub mod fs;
pub mod memory;

pub use fs::FsStorage;
pub use memory::MemoryStorage;

use async_trait::async_trait;
use axum::body::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid storage key {0:?}")]
    InvalidKey(String),

    #[error("write at offset {offset} past end of {key:?} ({len} bytes)")]
    Gap { key: String, offset: u64, len: u64 },

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared blob store.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Write `data` at `offset`, dropping anything stored past the range.
    /// `offset` may not exceed the current length. A rejected write leaves
    /// no blob behind.
    async fn write_at(&self, key: &str, offset: u64, data: Bytes) -> Result<(), StorageError>;

    /// Whole blob, or `None` if no blob has this key.
    async fn read(&self, key: &str) -> Result<Option<Bytes>, StorageError>;

    /// Length of the blob, or `None` if no blob has this key.
    async fn size(&self, key: &str) -> Result<Option<u64>, StorageError>;

    /// Direct children of `prefix`, sorted. Directories end with `/`.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Move a blob, replacing any blob at `to`.
    async fn rename(&self, from: &str, to: &str) -> Result<(), StorageError>;

    async fn is_available(&self) -> bool;
}

/// Reject keys that could escape the store or alias another key.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key
            .split('/')
            .any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        Err(StorageError::InvalidKey(key.to_string()))
    } else {
        Ok(())
    }
}
