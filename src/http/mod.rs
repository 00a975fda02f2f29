//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup: CORS, timeout, body limit)
//!     → server.rs Dispatcher (strip prefix, route lookup)
//!     → routes.rs table entry (route chain: pipeline + gate + handler)
//!     → response.rs (ApiError → status and JSON body)
//!     → Send to client with X-Request-ID
//! ```

pub mod response;
pub mod routes;
pub mod server;

pub use response::{ApiError, ApiResult};
pub use routes::{standard_routes, standard_table};
pub use server::{Dispatcher, GatewayServer};
