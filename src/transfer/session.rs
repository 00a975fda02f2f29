//! Transfer session state machine.
//!
//! ```text
//! Created ──begin──▶ Receiving ──commit (length reached | finalize)──▶ Complete
//!                        │
//!                        └──abort (cancel | idle timeout)──▶ Aborted
//! ```
//!
//! `Complete` and `Aborted` are terminal. `bytes_received` only moves
//! forward, and only by a whole accepted chunk.

use std::fmt;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::http::response::ApiError;
use crate::storage::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Created,
    Receiving,
    Complete,
    Aborted,
}

impl TransferState {
    pub fn as_str(self) -> &'static str {
        match self {
            TransferState::Created => "created",
            TransferState::Receiving => "receiving",
            TransferState::Complete => "complete",
            TransferState::Aborted => "aborted",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TransferState::Complete | TransferState::Aborted)
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("unknown upload session")]
    UnknownSession,

    #[error("chunk starts at {actual}, expected {expected}")]
    OffsetMismatch { expected: u64, actual: u64 },

    #[error("upload is {0}")]
    Terminal(TransferState),

    #[error("chunk ends at {end}, past declared length {length}")]
    ExceedsLength { length: u64, end: u64 },

    #[error("finalized at {end} bytes, declared length is {length}")]
    LengthNotReached { length: u64, end: u64 },

    #[error("chunk of {size} bytes exceeds limit of {limit}")]
    ChunkTooLarge { size: usize, limit: usize },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<TransferError> for ApiError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::UnknownSession => ApiError::NotFound,
            TransferError::OffsetMismatch { .. } | TransferError::Terminal(_) => {
                ApiError::Conflict(err.to_string())
            }
            TransferError::ExceedsLength { .. } | TransferError::LengthNotReached { .. } => {
                ApiError::BadRequest(err.to_string())
            }
            TransferError::ChunkTooLarge { .. } => ApiError::PayloadTooLarge,
            TransferError::Storage(_) => ApiError::Internal,
        }
    }
}

/// Server-side state of one resumable upload.
#[derive(Debug, Clone)]
pub struct TransferSession {
    pub id: String,
    pub owner_id: String,
    /// Storage prefix of the resource receiving the upload.
    pub resource: String,
    pub filename: Option<String>,
    pub total_expected: Option<u64>,
    pub bytes_received: u64,
    pub state: TransferState,
    last_activity: Instant,
}

impl TransferSession {
    pub fn new(
        id: impl Into<String>,
        owner_id: impl Into<String>,
        resource: impl Into<String>,
        total_expected: Option<u64>,
        filename: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            resource: resource.into(),
            filename,
            total_expected,
            bytes_received: 0,
            state: TransferState::Created,
            last_activity: Instant::now(),
        }
    }

    pub fn begin(&mut self) {
        if self.state == TransferState::Created {
            self.state = TransferState::Receiving;
            self.touch();
        }
    }

    /// Key of the blob accumulating chunks.
    pub fn staging_key(&self) -> String {
        format!("{}/.uploads/{}", self.resource, self.id)
    }

    /// Key of the blob once the upload completes.
    pub fn final_key(&self) -> String {
        match &self.filename {
            Some(name) => format!("{}/data/{}", self.resource, name),
            None => format!("{}/data/upload-{}", self.resource, self.id),
        }
    }

    /// Validate a chunk of `len` bytes at `offset`. Returns whether
    /// committing it completes the upload.
    pub fn check_append(&self, offset: u64, len: u64, finalize: bool) -> Result<bool, TransferError> {
        if self.state.is_terminal() {
            return Err(TransferError::Terminal(self.state));
        }
        if offset != self.bytes_received {
            return Err(TransferError::OffsetMismatch {
                expected: self.bytes_received,
                actual: offset,
            });
        }
        let end = offset + len;
        match self.total_expected {
            Some(length) if end > length => Err(TransferError::ExceedsLength { length, end }),
            Some(length) if finalize && end != length => {
                Err(TransferError::LengthNotReached { length, end })
            }
            Some(length) => Ok(end == length),
            None => Ok(finalize),
        }
    }

    /// Advance past an accepted chunk. Call only after the bytes are stored.
    pub fn commit(&mut self, len: u64, completes: bool) {
        self.bytes_received += len;
        self.state = if completes {
            TransferState::Complete
        } else {
            TransferState::Receiving
        };
        self.touch();
    }

    /// Returns false if the session was already terminal.
    pub fn abort(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = TransferState::Aborted;
        self.touch();
        true
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }
}
