//! Request pipeline.
//!
//! # Data Flow
//! ```text
//! RequestContext + Request
//!     → logging.rs      (outermost: times and records the whole request)
//!     → crash.rs        (turns panics below it into 500s)
//!     → request_id.rs   (assigns a fresh request id)
//!     → deadline.rs     (408 once the request outlives its time limit)
//!     → inject.rs       (attaches shared services, 503 if unavailable)
//!     → authenticate.rs (resolves the caller identity, never rejects)
//!     → [route gate]    (security::access_control, per route)
//!     → Handler
//! ```
//!
//! # Design Decisions
//! - One capability interface: `(context, request, next) -> result`
//! - A stage short-circuits by returning without calling `next`; an
//!   `Err(ApiError)` is the usual way to do that
//! - Stages for one request run strictly in order; nothing is shared with
//!   other requests except the injected services

pub mod authenticate;
pub mod context;
pub mod crash;
pub mod deadline;
pub mod inject;
pub mod logging;
pub mod request_id;

pub use authenticate::Authenticate;
pub use context::{RequestContext, RequestTrace};
pub use crash::CrashIsolation;
pub use deadline::RequestDeadline;
pub use inject::{Inject, ServiceProvider, Services, Settings};
pub use logging::RequestLogging;
pub use request_id::{AssignRequestId, X_REQUEST_ID};

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;

use crate::http::response::ApiResult;

/// A business handler at the end of a chain.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, ctx: RequestContext, req: Request<Body>) -> ApiResult;
}

/// One pipeline stage.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, ctx: RequestContext, req: Request<Body>, next: Next<'_>) -> ApiResult;
}

/// The remainder of a chain, handed to each stage.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stages: &'a [Arc<dyn Stage>],
    endpoint: &'a dyn Handler,
}

impl<'a> Next<'a> {
    pub fn new(stages: &'a [Arc<dyn Stage>], endpoint: &'a dyn Handler) -> Self {
        Self { stages, endpoint }
    }

    /// Run the next stage, or the handler when no stages remain.
    pub async fn run(self, ctx: RequestContext, req: Request<Body>) -> ApiResult {
        match self.stages.split_first() {
            Some((stage, rest)) => {
                let next = Next {
                    stages: rest,
                    endpoint: self.endpoint,
                };
                stage.handle(ctx, req, next).await
            }
            None => self.endpoint.call(ctx, req).await,
        }
    }

    /// Stage names still to run, outermost first.
    pub fn remaining(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }
}

/// An ordered, immutable list of stages.
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn stage_arc(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Copy of this pipeline with `stage` appended.
    pub fn append(&self, stage: Arc<dyn Stage>) -> Self {
        let mut stages = self.stages.clone();
        stages.push(stage);
        Self { stages }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run the whole chain ending in `handler`.
    pub async fn run(&self, handler: &dyn Handler, ctx: RequestContext, req: Request<Body>) -> ApiResult {
        Next::new(&self.stages, handler).run(ctx, req).await
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
