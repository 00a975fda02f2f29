//! Access logging stage.
//!
//! Outermost stage. Times the entire downstream chain and writes one record
//! per request, whatever the outcome. It never fails and never aborts.

use std::time::Instant;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;

use crate::http::response::ApiResult;
use crate::observability::{metrics, Fields};
use crate::pipeline::{Next, RequestContext, Stage};

#[derive(Debug, Default, Clone, Copy)]
pub struct RequestLogging;

#[async_trait]
impl Stage for RequestLogging {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn handle(&self, ctx: RequestContext, req: Request<Body>, next: Next<'_>) -> ApiResult {
        let start = Instant::now();
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let route = ctx.route_name().to_string();
        let trace = ctx.trace.clone();
        let log = ctx.log.clone();

        let result = next.run(ctx, req).await;

        let status = match &result {
            Ok(response) => response.status(),
            Err(err) => err.status(),
        };
        let elapsed = start.elapsed();

        let mut log = log.with_fields(
            &Fields::new()
                .str("method", method.as_str())
                .str("path", path)
                .str("route", route.clone())
                .u64("status", u64::from(status.as_u16()))
                .f64("duration_ms", elapsed.as_secs_f64() * 1000.0),
        );
        if let Some(id) = trace.request_id() {
            log = log.with_request_id(id);
        }
        if let Some(stack) = trace.stack_trace() {
            log = log.with_stack(stack);
        }

        if status.is_server_error() {
            log.error("request failed");
        } else {
            log.info("request completed");
        }
        metrics::record_request(method.as_str(), &route, status.as_u16(), start);

        result
    }
}
