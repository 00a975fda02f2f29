//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request (method, path below the API prefix)
//!     → router.rs (scan table, rank candidates)
//!     → matcher.rs (segment-wise pattern match, bind params)
//!     → Return: RouteMatch, NoMatch (404) or MethodNotAllowed (405)
//!
//! Route compilation (at startup):
//!     Route[]
//!     → parse patterns, reject duplicate names / exact collisions
//!     → freeze as immutable RouteTable
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in hot path
//! - Deterministic: same input always matches same route

pub mod matcher;
pub mod router;

pub use matcher::{normalize_path, MatchKind, PathMatch, PathParams, PathPattern, PatternError};
pub use router::{Route, RouteDescriptor, RouteMatch, RouteTable, RouteTableError, RoutingError};
