//! Response handling and error mapping.
//!
//! # Responsibilities
//! - Define the terminal error type shared by stages and handlers
//! - Map each error to its HTTP status and body
//! - Keep hidden resources indistinguishable from missing ones
//!
//! # Design Decisions
//! - Errors are values returned from stages, never panics
//! - Internal failures carry no detail to the client

use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Every way a request can terminate without a handler-produced response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// No route matches the path.
    #[error("not found")]
    NotFound,

    /// A route matches the path but not the method.
    #[error("method not allowed")]
    MethodNotAllowed { allowed: Vec<Method> },

    /// Anonymous caller on a reject-anonymous route.
    #[error("unauthorized")]
    Unauthorized,

    /// Anonymous caller on a hide-from-anonymous route. Rendered as `NotFound`.
    #[error("not found")]
    Hidden,

    #[error("forbidden")]
    Forbidden,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("payload too large")]
    PayloadTooLarge,

    /// The request outlived the configured time limit.
    #[error("request timed out")]
    RequestTimeout,

    /// A required shared service could not be obtained.
    #[error("service unavailable: {0}")]
    DependencyUnavailable(String),

    /// Unrecovered fault. Details only ever reach the log.
    #[error("internal server error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound | ApiError::Hidden => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::RequestTimeout => StatusCode::REQUEST_TIMEOUT,
            ApiError::DependencyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing reason. `Hidden` deliberately reuses the `NotFound` text.
    fn reason(&self) -> String {
        match self {
            ApiError::Hidden => ApiError::NotFound.to_string(),
            ApiError::DependencyUnavailable(_) => "service unavailable".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    status: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: self.reason(),
            status: status.as_u16(),
        };
        let mut response = (status, Json(body)).into_response();

        if let ApiError::MethodNotAllowed { allowed } = &self {
            let allow = allowed
                .iter()
                .map(Method::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            if let Ok(value) = HeaderValue::from_str(&allow) {
                response.headers_mut().insert(header::ALLOW, value);
            }
        }
        response
    }
}

/// Outcome of any stage or handler.
pub type ApiResult = Result<Response, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn render(err: ApiError) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let response = err.into_response();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, body.to_vec())
    }

    #[tokio::test]
    async fn test_hidden_is_indistinguishable_from_not_found() {
        let hidden = render(ApiError::Hidden).await;
        let missing = render(ApiError::NotFound).await;
        assert_eq!(hidden.0, StatusCode::NOT_FOUND);
        assert_eq!(hidden.0, missing.0);
        assert_eq!(hidden.2, missing.2);
        assert_eq!(
            hidden.1.get(header::CONTENT_TYPE),
            missing.1.get(header::CONTENT_TYPE)
        );
    }

    #[tokio::test]
    async fn test_method_not_allowed_lists_methods() {
        let (status, headers, _) = render(ApiError::MethodNotAllowed {
            allowed: vec![Method::GET, Method::PATCH],
        })
        .await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(headers.get(header::ALLOW).unwrap(), "GET, PATCH");
    }

    #[tokio::test]
    async fn test_dependency_detail_not_exposed() {
        let (status, _, body) =
            render(ApiError::DependencyUnavailable("storage at /mnt/x".into())).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!String::from_utf8(body).unwrap().contains("/mnt/x"));
    }
}
