//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Provide the structured log sink consumed by the request pipeline
//! - Carry per-request log state as an immutable `LogContext` value
//!
//! # Design Decisions
//! - `LogContext` is never mutated; every `with_*` call returns a new value
//!   that shares the sink through an `Arc`
//! - Field lists are typed (`Fields`), never untyped key/value slices
//! - JSON format for production, pretty format for development

use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("api_gateway={},tower_http=info", config.log_level)));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    if let Err(e) = result {
        eprintln!("tracing subscriber already installed: {e}");
    }
}

/// Severity of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// A typed log field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Str(String),
    U64(u64),
    I64(i64),
    F64(f64),
    Bool(bool),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Str(s) => write!(f, "{s:?}"),
            FieldValue::U64(v) => write!(f, "{v}"),
            FieldValue::I64(v) => write!(f, "{v}"),
            FieldValue::F64(v) => write!(f, "{v}"),
            FieldValue::Bool(v) => write!(f, "{v}"),
        }
    }
}

/// Ordered mapping from field name to value.
///
/// Setting a name that is already present replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields {
    entries: Vec<(&'static str, FieldValue)>,
}

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn str(self, name: &'static str, value: impl Into<String>) -> Self {
        self.with(name, FieldValue::Str(value.into()))
    }

    pub fn u64(self, name: &'static str, value: u64) -> Self {
        self.with(name, FieldValue::U64(value))
    }

    pub fn i64(self, name: &'static str, value: i64) -> Self {
        self.with(name, FieldValue::I64(value))
    }

    pub fn f64(self, name: &'static str, value: f64) -> Self {
        self.with(name, FieldValue::F64(value))
    }

    pub fn bool(self, name: &'static str, value: bool) -> Self {
        self.with(name, FieldValue::Bool(value))
    }

    pub fn with(mut self, name: &'static str, value: FieldValue) -> Self {
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((name, value)),
        }
        self
    }

    /// Append all of `other`, later values winning.
    pub fn merge(mut self, other: &Fields) -> Self {
        for (name, value) in &other.entries {
            self = self.with(*name, value.clone());
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.entries.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &FieldValue)> {
        self.entries.iter().map(|(n, v)| (*n, v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for Fields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{name}={value}")?;
        }
        Ok(())
    }
}

/// One structured log record as handed to a sink.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub fields: Fields,
    pub request_id: Option<String>,
    pub stack_trace: Option<String>,
}

/// Destination for structured log records.
pub trait LogSink: Send + Sync {
    fn emit(&self, record: &LogRecord);
}

/// Forwards records to the global `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, record: &LogRecord) {
        let request_id = record.request_id.as_deref().unwrap_or("-");
        let fields = &record.fields;
        let stack = record.stack_trace.as_deref();
        match record.level {
            LogLevel::Debug => {
                tracing::event!(Level::DEBUG, request_id, %fields, stack, "{}", record.message)
            }
            LogLevel::Info => {
                tracing::event!(Level::INFO, request_id, %fields, stack, "{}", record.message)
            }
            LogLevel::Warn => {
                tracing::event!(Level::WARN, request_id, %fields, stack, "{}", record.message)
            }
            LogLevel::Error => {
                tracing::event!(Level::ERROR, request_id, %fields, stack, "{}", record.message)
            }
        }
    }
}

/// Keeps every record in memory. Useful for tests and diagnostics endpoints.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far.
    pub fn records(&self) -> Vec<LogRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl LogSink for MemorySink {
    fn emit(&self, record: &LogRecord) {
        let mut records = match self.records.lock() {
            Ok(records) => records,
            Err(poisoned) => poisoned.into_inner(),
        };
        records.push(record.clone());
    }
}

/// Per-request logging state.
///
/// Cheap to clone; holds a back-reference to the shared sink.
#[derive(Clone)]
pub struct LogContext {
    sink: Arc<dyn LogSink>,
    request_id: Option<String>,
    fields: Fields,
    stack_trace: Option<String>,
}

impl fmt::Debug for LogContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogContext")
            .field("request_id", &self.request_id)
            .field("fields", &self.fields)
            .field("stack_trace", &self.stack_trace.is_some())
            .finish()
    }
}

impl LogContext {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            sink,
            request_id: None,
            fields: Fields::new(),
            stack_trace: None,
        }
    }

    pub fn with_request_id(&self, request_id: impl Into<String>) -> Self {
        Self {
            request_id: Some(request_id.into()),
            ..self.clone()
        }
    }

    pub fn with_field(&self, name: &'static str, value: FieldValue) -> Self {
        Self {
            fields: self.fields.clone().with(name, value),
            ..self.clone()
        }
    }

    pub fn with_fields(&self, fields: &Fields) -> Self {
        Self {
            fields: self.fields.clone().merge(fields),
            ..self.clone()
        }
    }

    pub fn with_error(&self, err: &dyn std::error::Error) -> Self {
        self.with_field("error", FieldValue::Str(err.to_string()))
    }

    /// Attach a captured stack trace. Traces accumulate.
    pub fn with_stack(&self, trace: impl AsRef<str>) -> Self {
        let stack_trace = match &self.stack_trace {
            Some(existing) => format!("{existing}\n{}", trace.as_ref()),
            None => trace.as_ref().to_string(),
        };
        Self {
            stack_trace: Some(stack_trace),
            ..self.clone()
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn stack_trace(&self) -> Option<&str> {
        self.stack_trace.as_deref()
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.emit(LogLevel::Debug, message.into());
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(LogLevel::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(LogLevel::Warn, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(LogLevel::Error, message.into());
    }

    fn emit(&self, level: LogLevel, message: String) {
        self.sink.emit(&LogRecord {
            level,
            message,
            fields: self.fields.clone(),
            request_id: self.request_id.clone(),
            stack_trace: self.stack_trace.clone(),
        });
    }
}
