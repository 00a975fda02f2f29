//! Request time limit stage.
//!
//! Sits inside the request id and logging stages, so a request that runs
//! out of time still gets an id, an access record and a JSON error body.

use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;

use crate::http::response::{ApiError, ApiResult};
use crate::observability::Fields;
use crate::pipeline::{Next, RequestContext, Stage};

/// Ends the downstream chain with 408 once `limit` has passed.
#[derive(Debug, Clone, Copy)]
pub struct RequestDeadline {
    limit: Duration,
}

impl RequestDeadline {
    pub fn new(limit: Duration) -> Self {
        Self { limit }
    }
}

#[async_trait]
impl Stage for RequestDeadline {
    fn name(&self) -> &'static str {
        "deadline"
    }

    async fn handle(&self, ctx: RequestContext, req: Request<Body>, next: Next<'_>) -> ApiResult {
        let log = ctx.log.clone();
        match tokio::time::timeout(self.limit, next.run(ctx, req)).await {
            Ok(result) => result,
            Err(_) => {
                log.with_fields(&Fields::new().u64("limit_ms", self.limit.as_millis() as u64))
                    .warn("request timed out");
                Err(ApiError::RequestTimeout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::{FieldValue, LogContext, MemorySink};
    use crate::pipeline::{AssignRequestId, Handler, Pipeline, RequestLogging};
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use std::sync::Arc;

    struct Sleeps(Duration);

    #[async_trait]
    impl Handler for Sleeps {
        async fn call(&self, _ctx: RequestContext, _req: Request<Body>) -> ApiResult {
            tokio::time::sleep(self.0).await;
            Ok("done".into_response())
        }
    }

    fn pipeline() -> Pipeline {
        Pipeline::new()
            .stage(RequestLogging)
            .stage(AssignRequestId)
            .stage(RequestDeadline::new(Duration::from_millis(50)))
    }

    #[tokio::test]
    async fn test_slow_handler_times_out_with_record() {
        let sink = Arc::new(MemorySink::new());
        let ctx = RequestContext::new(LogContext::new(sink.clone()));
        let trace = ctx.trace.clone();
        let req = Request::builder().body(Body::empty()).unwrap();

        let err = pipeline()
            .run(&Sleeps(Duration::from_secs(5)), ctx, req)
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::RequestTimeout);
        assert_eq!(err.status(), StatusCode::REQUEST_TIMEOUT);

        let id = trace.request_id().unwrap().to_string();
        let records = sink.records();
        let access = records.last().unwrap();
        assert_eq!(access.request_id.as_deref(), Some(id.as_str()));
        assert_eq!(access.fields.get("status"), Some(&FieldValue::U64(408)));
        assert!(records
            .iter()
            .any(|r| r.message == "request timed out" && r.request_id.as_deref() == Some(id.as_str())));
    }

    #[tokio::test]
    async fn test_fast_handler_passes_through() {
        let ctx = RequestContext::new(LogContext::new(Arc::new(MemorySink::new())));
        let req = Request::builder().body(Body::empty()).unwrap();
        let response = pipeline()
            .run(&Sleeps(Duration::from_millis(1)), ctx, req)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
