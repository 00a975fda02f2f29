//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Pipeline stages and handlers produce:
//!     → logging.rs (structured records through a LogSink)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → tracing subscriber (stdout, text or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through every record emitted for a request
//! - Stack traces go to the log record only, never to the client

pub mod logging;
pub mod metrics;

pub use logging::{
    init_tracing, FieldValue, Fields, LogContext, LogLevel, LogRecord, LogSink, MemorySink,
    TracingSink,
};
