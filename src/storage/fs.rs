//! Filesystem blob storage rooted at a directory.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use axum::body::Bytes;
use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use crate::storage::{validate_key, Storage, StorageError};

#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    /// Use `root`, creating it if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

fn not_found(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::NotFound
}

#[async_trait]
impl Storage for FsStorage {
    async fn write_at(&self, key: &str, offset: u64, data: Bytes) -> Result<(), StorageError> {
        let path = self.path(key)?;
        if offset == 0 {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
        }

        let opened = fs::OpenOptions::new()
            .create(offset == 0)
            .truncate(false)
            .write(true)
            .open(&path)
            .await;
        let mut file = match opened {
            Ok(file) => file,
            Err(e) if not_found(&e) => {
                return Err(StorageError::Gap {
                    key: key.to_string(),
                    offset,
                    len: 0,
                })
            }
            Err(e) => return Err(e.into()),
        };

        let len = file.metadata().await?.len();
        if offset > len {
            return Err(StorageError::Gap {
                key: key.to_string(),
                offset,
                len,
            });
        }

        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(&data).await?;
        file.set_len(offset + data.len() as u64).await?;
        file.flush().await?;
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
        let path = self.path(key)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(Bytes::from(fs::read(&path).await?))),
            Ok(_) => Ok(None),
            Err(e) if not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn size(&self, key: &str) -> Result<Option<u64>, StorageError> {
        let path = self.path(key)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(e) if not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let path = self.path(prefix)?;
        let mut dir = match fs::read_dir(&path).await {
            Ok(dir) => dir,
            Err(e) if not_found(&e) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await?.is_dir() {
                entries.push(format!("{name}/"));
            } else {
                entries.push(name);
            }
        }
        entries.sort();
        Ok(entries)
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), StorageError> {
        let from = self.path(from)?;
        let to = self.path(to)?;
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(from, to).await?;
        Ok(())
    }

    async fn is_available(&self) -> bool {
        matches!(fs::metadata(&self.root).await, Ok(meta) if meta.is_dir())
    }
}
