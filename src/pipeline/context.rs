//! Per-request context carried through the pipeline.

use std::sync::{Arc, OnceLock};

use crate::http::response::ApiError;
use crate::identity::Identity;
use crate::observability::LogContext;
use crate::pipeline::inject::Services;
use crate::routing::PathParams;

/// Facts recorded by inner stages that outer stages read after `next` returns.
///
/// Each slot is written at most once.
#[derive(Debug, Default)]
pub struct RequestTrace {
    request_id: OnceLock<String>,
    stack_trace: OnceLock<String>,
}

impl RequestTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if an id was already assigned.
    pub fn set_request_id(&self, id: impl Into<String>) -> bool {
        self.request_id.set(id.into()).is_ok()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.get().map(String::as_str)
    }

    pub fn record_stack(&self, trace: impl Into<String>) -> bool {
        self.stack_trace.set(trace.into()).is_ok()
    }

    pub fn stack_trace(&self) -> Option<&str> {
        self.stack_trace.get().map(String::as_str)
    }
}

/// Everything a handler learns about its request besides the raw request.
///
/// Owned by exactly one in-flight request. Stages extend it by value before
/// passing it on; handlers only read it.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub trace: Arc<RequestTrace>,
    pub identity: Identity,
    pub services: Option<Services>,
    pub params: PathParams,
    /// Path below the matched prefix route; empty for exact routes.
    pub remainder: String,
    /// Name of the matched route, `None` when routing failed.
    pub route: Option<String>,
    pub log: LogContext,
}

impl RequestContext {
    pub fn new(log: LogContext) -> Self {
        Self {
            trace: Arc::new(RequestTrace::new()),
            identity: Identity::Anonymous,
            services: None,
            params: PathParams::new(),
            remainder: String::new(),
            route: None,
            log,
        }
    }

    pub fn with_route(mut self, name: impl Into<String>, params: PathParams, remainder: String) -> Self {
        self.route = Some(name.into());
        self.params = params;
        self.remainder = remainder;
        self
    }

    pub fn request_id(&self) -> Option<&str> {
        self.trace.request_id()
    }

    pub fn route_name(&self) -> &str {
        self.route.as_deref().unwrap_or("unmatched")
    }

    /// Injected services. Fails with 503 when injection did not run.
    pub fn services(&self) -> Result<&Services, ApiError> {
        self.services
            .as_ref()
            .ok_or_else(|| ApiError::DependencyUnavailable("services".into()))
    }

    /// A bound path parameter. A missing binding is a table bug, so 500.
    pub fn param(&self, name: &str) -> Result<&str, ApiError> {
        self.params.get(name).ok_or(ApiError::Internal)
    }

    /// The caller's user id, or `Unauthorized` for anonymous callers.
    pub fn user_id(&self) -> Result<&str, ApiError> {
        self.identity.id().ok_or(ApiError::Unauthorized)
    }
}
