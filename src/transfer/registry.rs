//! Live transfer sessions.
//!
//! # Design Decisions
//! - One `tokio::sync::Mutex` per session: appends to the same session are
//!   serialized, appends to different sessions never contend
//! - The map guard is dropped before any lock is awaited
//! - The offset advances only after storage accepted the whole chunk, so a
//!   cancelled append leaves the session where it was
//! - A completion cancelled between the move and the state change is undone
//!   by the next append, which moves the blob back to staging first

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::storage::Storage;
use crate::transfer::session::{TransferError, TransferSession};

/// Undo a completion whose move ran but whose commit never did.
///
/// Staging shorter than the committed offset can only mean the blob already
/// sits at its final key. Moving it back restores the pre-completion layout.
async fn restore_staging(storage: &dyn Storage, session: &TransferSession) -> Result<(), TransferError> {
    let received = session.bytes_received;
    if received == 0 {
        return Ok(());
    }
    let staging = session.staging_key();
    if storage.size(&staging).await?.is_some_and(|len| len >= received) {
        return Ok(());
    }
    let final_key = session.final_key();
    if storage.size(&final_key).await?.is_some_and(|len| len >= received) {
        tracing::warn!(
            session = %session.id,
            offset = received,
            "Resuming upload after an interrupted completion"
        );
        storage.rename(&final_key, &staging).await?;
    }
    Ok(())
}

/// Result of a reaping sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Reaped {
    /// Idle sessions moved to `Aborted`.
    pub aborted: usize,
    /// Terminal sessions dropped from the registry.
    pub evicted: usize,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Mutex<TransferSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Open a session and move it to `Receiving`.
    pub fn create(
        &self,
        owner_id: &str,
        resource: &str,
        total_expected: Option<u64>,
        filename: Option<String>,
    ) -> TransferSession {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let mut session = TransferSession::new(&id, owner_id, resource, total_expected, filename);
        session.begin();
        self.sessions
            .insert(id, Arc::new(Mutex::new(session.clone())));
        session
    }

    fn entry(&self, id: &str) -> Result<Arc<Mutex<TransferSession>>, TransferError> {
        self.sessions
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or(TransferError::UnknownSession)
    }

    /// Snapshot of a session owned by `owner_id`. Other owners see nothing.
    pub async fn status(&self, id: &str, owner_id: &str) -> Result<TransferSession, TransferError> {
        let entry = self.entry(id)?;
        let session = entry.lock().await;
        if session.owner_id != owner_id {
            return Err(TransferError::UnknownSession);
        }
        Ok(session.clone())
    }

    /// Store a chunk and advance the session.
    ///
    /// On completion the staged blob is moved to its final key before the
    /// state changes. A failed or cancelled move leaves the chunk retryable
    /// at the same offset.
    pub async fn append(
        &self,
        storage: &dyn Storage,
        id: &str,
        owner_id: &str,
        offset: u64,
        chunk: Bytes,
        finalize: bool,
    ) -> Result<TransferSession, TransferError> {
        let entry = self.entry(id)?;
        let mut session = entry.lock().await;
        if session.owner_id != owner_id {
            return Err(TransferError::UnknownSession);
        }

        let len = chunk.len() as u64;
        let completes = session.check_append(offset, len, finalize)?;

        restore_staging(storage, &session).await?;
        let staging = session.staging_key();
        storage.write_at(&staging, offset, chunk).await?;
        if completes {
            storage.rename(&staging, &session.final_key()).await?;
        }

        session.commit(len, completes);
        Ok(session.clone())
    }

    /// Cancel a session. Returns false if it is unknown or already terminal.
    pub async fn abort(&self, id: &str) -> bool {
        match self.entry(id) {
            Ok(entry) => entry.lock().await.abort(),
            Err(_) => false,
        }
    }

    /// Abort sessions idle longer than `ttl` and evict terminal ones that
    /// have been idle as long. Sessions locked by an in-flight append are
    /// skipped.
    pub fn reap_idle(&self, ttl: Duration) -> Reaped {
        let mut reaped = Reaped::default();
        self.sessions.retain(|_, entry| {
            let Ok(mut session) = entry.try_lock() else {
                return true;
            };
            if session.idle_for() < ttl {
                return true;
            }
            if session.state.is_terminal() {
                reaped.evicted += 1;
                return false;
            }
            session.abort();
            reaped.aborted += 1;
            true
        });
        reaped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, StorageError};
    use crate::transfer::session::TransferState;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Memory storage whose next write or move can be made to hang halfway.
    #[derive(Default)]
    struct StallingStorage {
        inner: MemoryStorage,
        stall_write: AtomicBool,
        stall_rename: AtomicBool,
    }

    #[async_trait]
    impl Storage for StallingStorage {
        async fn write_at(&self, key: &str, offset: u64, data: Bytes) -> Result<(), StorageError> {
            if self.stall_write.swap(false, Ordering::SeqCst) {
                let half = data.slice(..data.len() / 2);
                self.inner.write_at(key, offset, half).await?;
                std::future::pending::<()>().await;
            }
            self.inner.write_at(key, offset, data).await
        }

        async fn read(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
            self.inner.read(key).await
        }

        async fn size(&self, key: &str) -> Result<Option<u64>, StorageError> {
            self.inner.size(key).await
        }

        async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
            self.inner.list(prefix).await
        }

        async fn rename(&self, from: &str, to: &str) -> Result<(), StorageError> {
            self.inner.rename(from, to).await?;
            if self.stall_rename.swap(false, Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            Ok(())
        }

        async fn is_available(&self) -> bool {
            true
        }
    }

    /// Six-byte upload with the first three bytes committed.
    async fn half_done(storage: &StallingStorage, registry: &SessionRegistry) -> TransferSession {
        let created = registry.create("u1", "datasets/u1/d1", Some(6), Some("f.bin".into()));
        registry
            .append(storage, &created.id, "u1", 0, Bytes::from_static(b"abc"), false)
            .await
            .unwrap();
        created
    }

    /// Starts the final append and drops it once it hangs.
    async fn cancel_final_append(storage: &StallingStorage, registry: &SessionRegistry, id: &str) {
        let attempt = registry.append(storage, id, "u1", 3, Bytes::from_static(b"def"), false);
        let cancelled = tokio::time::timeout(Duration::from_millis(50), attempt).await;
        assert!(cancelled.is_err());
    }

    #[tokio::test]
    async fn test_create_append_status() {
        let storage = MemoryStorage::new();
        let registry = SessionRegistry::new();
        let created = registry.create("u1", "datasets/u1/d1", None, None);
        assert_eq!(created.state, TransferState::Receiving);

        registry
            .append(&storage, &created.id, "u1", 0, Bytes::from_static(b"0123456789"), false)
            .await
            .unwrap();
        let status = registry.status(&created.id, "u1").await.unwrap();
        assert_eq!(status.bytes_received, 10);

        let err = registry
            .append(&storage, &created.id, "u1", 5, Bytes::from_static(b"xx"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::OffsetMismatch { expected: 10, actual: 5 }));
    }

    #[tokio::test]
    async fn test_other_owner_sees_nothing() {
        let storage = MemoryStorage::new();
        let registry = SessionRegistry::new();
        let created = registry.create("u1", "datasets/u1/d1", None, None);

        assert!(matches!(
            registry.status(&created.id, "u2").await,
            Err(TransferError::UnknownSession)
        ));
        assert!(matches!(
            registry
                .append(&storage, &created.id, "u2", 0, Bytes::from_static(b"x"), false)
                .await,
            Err(TransferError::UnknownSession)
        ));
        assert!(matches!(
            registry.status("missing", "u1").await,
            Err(TransferError::UnknownSession)
        ));
    }

    #[tokio::test]
    async fn test_completion_moves_blob() {
        let storage = MemoryStorage::new();
        let registry = SessionRegistry::new();
        let created = registry.create("u1", "datasets/u1/d1", Some(3), Some("f.bin".into()));

        let done = registry
            .append(&storage, &created.id, "u1", 0, Bytes::from_static(b"abc"), false)
            .await
            .unwrap();
        assert_eq!(done.state, TransferState::Complete);
        assert!(storage.read(&created.staging_key()).await.unwrap().is_none());
        assert_eq!(
            &storage.read("datasets/u1/d1/data/f.bin").await.unwrap().unwrap()[..],
            b"abc"
        );

        let err = registry
            .append(&storage, &created.id, "u1", 3, Bytes::new(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Terminal(TransferState::Complete)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_serialize() {
        let storage = Arc::new(MemoryStorage::new());
        let registry = Arc::new(SessionRegistry::new());
        let id = registry.create("u1", "datasets/u1/d1", None, None).id;

        // every task races for offset 0; exactly one may win
        let mut tasks = Vec::new();
        for i in 0..8u8 {
            let storage = storage.clone();
            let registry = registry.clone();
            let id = id.clone();
            tasks.push(tokio::spawn(async move {
                registry
                    .append(storage.as_ref(), &id, "u1", 0, Bytes::from(vec![i; 4]), false)
                    .await
            }));
        }

        let mut won = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => won += 1,
                Err(TransferError::OffsetMismatch { expected: 4, actual: 0 }) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(won, 1);

        let status = registry.status(&id, "u1").await.unwrap();
        assert_eq!(status.bytes_received, 4);
        let blob = storage.read(&status.staging_key()).await.unwrap().unwrap();
        assert_eq!(blob.len(), 4);
        assert!(blob.iter().all(|b| *b == blob[0]));
    }

    #[tokio::test]
    async fn test_cancelled_write_leaves_offset() {
        let storage = StallingStorage::default();
        let registry = SessionRegistry::new();
        let created = half_done(&storage, &registry).await;

        storage.stall_write.store(true, Ordering::SeqCst);
        cancel_final_append(&storage, &registry, &created.id).await;

        let status = registry.status(&created.id, "u1").await.unwrap();
        assert_eq!(status.bytes_received, 3);
        assert_eq!(status.state, TransferState::Receiving);

        let done = registry
            .append(&storage, &created.id, "u1", 3, Bytes::from_static(b"def"), false)
            .await
            .unwrap();
        assert_eq!(done.state, TransferState::Complete);
        assert_eq!(
            &storage.read("datasets/u1/d1/data/f.bin").await.unwrap().unwrap()[..],
            b"abcdef"
        );
    }

    #[tokio::test]
    async fn test_cancelled_completion_recovers() {
        let storage = StallingStorage::default();
        let registry = SessionRegistry::new();
        let created = half_done(&storage, &registry).await;

        storage.stall_rename.store(true, Ordering::SeqCst);
        cancel_final_append(&storage, &registry, &created.id).await;

        // the move ran but the session never heard about it
        let status = registry.status(&created.id, "u1").await.unwrap();
        assert_eq!(status.bytes_received, 3);
        assert_eq!(status.state, TransferState::Receiving);
        assert!(storage.read(&created.staging_key()).await.unwrap().is_none());

        let done = registry
            .append(&storage, &created.id, "u1", 3, Bytes::from_static(b"def"), false)
            .await
            .unwrap();
        assert_eq!(done.state, TransferState::Complete);
        assert_eq!(done.bytes_received, 6);
        assert_eq!(
            &storage.read("datasets/u1/d1/data/f.bin").await.unwrap().unwrap()[..],
            b"abcdef"
        );
        assert!(storage.read(&created.staging_key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retry_after_cancelled_completion_may_differ() {
        let storage = StallingStorage::default();
        let registry = SessionRegistry::new();
        let created = registry.create("u1", "datasets/u1/d1", None, Some("g.bin".into()));
        registry
            .append(&storage, &created.id, "u1", 0, Bytes::from_static(b"abc"), false)
            .await
            .unwrap();

        storage.stall_rename.store(true, Ordering::SeqCst);
        let attempt = registry.append(&storage, &created.id, "u1", 3, Bytes::from_static(b"def"), true);
        assert!(tokio::time::timeout(Duration::from_millis(50), attempt).await.is_err());

        // the client resends without finalizing; the blob goes back to staging
        let resumed = registry
            .append(&storage, &created.id, "u1", 3, Bytes::from_static(b"xy"), false)
            .await
            .unwrap();
        assert_eq!(resumed.state, TransferState::Receiving);
        assert_eq!(resumed.bytes_received, 5);
        assert!(storage.read("datasets/u1/d1/data/g.bin").await.unwrap().is_none());

        registry
            .append(&storage, &created.id, "u1", 5, Bytes::from_static(b"z"), true)
            .await
            .unwrap();
        assert_eq!(
            &storage.read("datasets/u1/d1/data/g.bin").await.unwrap().unwrap()[..],
            b"abcxyz"
        );
    }

    #[tokio::test]
    async fn test_abort_and_reap() {
        let registry = SessionRegistry::new();
        let a = registry.create("u1", "datasets/u1/d1", None, None);
        let b = registry.create("u1", "datasets/u1/d1", None, None);

        assert!(registry.abort(&a.id).await);
        assert!(!registry.abort(&a.id).await);
        assert!(!registry.abort("missing").await);

        let reaped = registry.reap_idle(Duration::ZERO);
        assert_eq!(reaped, Reaped { aborted: 1, evicted: 1 });
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.status(&b.id, "u1").await.unwrap().state,
            TransferState::Aborted
        );

        let untouched = registry.reap_idle(Duration::from_secs(3600));
        assert_eq!(untouched, Reaped::default());
    }
}
