//! API gateway dispatch core.
//!
//! Authenticates, routes, gates and observes every request before handing
//! it to a business handler, and serves resumable uploads and prefix
//! downloads against a shared storage handle.

pub mod config;
pub mod http;
pub mod identity;
pub mod lifecycle;
pub mod observability;
pub mod pipeline;
pub mod resources;
pub mod routing;
pub mod security;
pub mod storage;
pub mod transfer;

pub use config::GatewayConfig;
pub use http::GatewayServer;
pub use lifecycle::Shutdown;
