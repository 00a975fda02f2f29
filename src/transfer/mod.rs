//! Resumable transfers.
//!
//! # Data Flow
//! ```text
//! POST  .../upload              → upload.rs   Create   → registry.rs (new session)
//! HEAD  .../upload/{upload-id}  → upload.rs   Status   → registry.rs (snapshot)
//! PATCH .../upload/{upload-id}  → upload.rs   Append   → registry.rs → storage
//! GET   .../data/**             → download.rs          → storage
//! ```
//!
//! # Design Decisions
//! - Sessions live in memory, keyed by an id distinct from the resource id
//! - Chunks are staged under `{resource}/.uploads/` and moved to
//!   `{resource}/data/` on completion
//! - A dropped connection does not abort a session; the client resumes from
//!   the offset reported by Status

pub mod download;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod upload;

pub use download::Download;
pub use registry::{Reaped, SessionRegistry};
pub use session::{TransferError, TransferSession, TransferState};
pub use upload::{CreateUpload, SessionUpload, UploadTarget};
