//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → cors.rs (preflight and response headers, outside the pipeline)
//!     → pipeline (authentication resolves identity)
//!     → access_control.rs (per-route gate: 401 or hiding 404)
//!     → handler
//! ```
//!
//! # Design Decisions
//! - Gate policies are per route, not global
//! - Hidden resources answer exactly like missing ones

pub mod access_control;
pub mod cors;

pub use access_control::{AccessGate, AccessPolicy};
pub use cors::build_cors_layer;
