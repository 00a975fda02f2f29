//! In-memory blob storage.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use dashmap::DashMap;

use crate::storage::{validate_key, Storage, StorageError};

#[derive(Debug, Clone)]
pub struct MemoryStorage {
    blobs: Arc<DashMap<String, Vec<u8>>>,
    available: Arc<AtomicBool>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self {
            blobs: Arc::new(DashMap::new()),
            available: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn put(&self, key: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.blobs.insert(key.into(), data.into());
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn write_at(&self, key: &str, offset: u64, data: Bytes) -> Result<(), StorageError> {
        validate_key(key)?;
        let mut blob = match self.blobs.get_mut(key) {
            Some(blob) => blob,
            None if offset == 0 => self.blobs.entry(key.to_string()).or_default(),
            None => {
                return Err(StorageError::Gap {
                    key: key.to_string(),
                    offset,
                    len: 0,
                })
            }
        };
        let len = blob.len() as u64;
        if offset > len {
            return Err(StorageError::Gap {
                key: key.to_string(),
                offset,
                len,
            });
        }
        blob.truncate(offset as usize);
        blob.extend_from_slice(&data);
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
        validate_key(key)?;
        Ok(self
            .blobs
            .get(key)
            .map(|blob| Bytes::copy_from_slice(blob.value())))
    }

    async fn size(&self, key: &str) -> Result<Option<u64>, StorageError> {
        validate_key(key)?;
        Ok(self.blobs.get(key).map(|blob| blob.len() as u64))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        validate_key(prefix)?;
        let dir = format!("{prefix}/");
        let entries: BTreeSet<String> = self
            .blobs
            .iter()
            .filter_map(|entry| {
                let rest = entry.key().strip_prefix(&dir)?;
                Some(match rest.split_once('/') {
                    Some((child, _)) => format!("{child}/"),
                    None => rest.to_string(),
                })
            })
            .collect();
        Ok(entries.into_iter().collect())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), StorageError> {
        validate_key(from)?;
        validate_key(to)?;
        let (_, data) = self.blobs.remove(from).ok_or_else(|| {
            StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no blob at {from:?}"),
            ))
        })?;
        self.blobs.insert(to.to_string(), data);
        Ok(())
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}
