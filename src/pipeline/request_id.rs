//! Request identity stage.
//!
//! Assigns a fresh UUID v4 to every request. Incoming `X-Request-ID` values
//! are ignored so ids stay unique within this gateway's logs.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use uuid::Uuid;

use crate::http::response::ApiResult;
use crate::pipeline::{Next, RequestContext, Stage};

/// Header echoing the assigned id back to the client.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Stage that assigns the request id. Never fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssignRequestId;

#[async_trait]
impl Stage for AssignRequestId {
    fn name(&self) -> &'static str {
        "request_id"
    }

    async fn handle(&self, mut ctx: RequestContext, req: Request<Body>, next: Next<'_>) -> ApiResult {
        let id = Uuid::new_v4().to_string();
        ctx.trace.set_request_id(id.clone());
        ctx.log = ctx.log.with_request_id(id);
        next.run(ctx, req).await
    }
}
