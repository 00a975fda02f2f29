//! Cross-origin policy.
//!
//! Credentials are allowed, so wildcards are not an option for origins or
//! headers: both mirror the request instead. Exposed headers are the ones
//! this gateway emits.

use std::time::Duration;

use axum::http::{header, HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};

use crate::config::CorsConfig;
use crate::pipeline::X_REQUEST_ID;
use crate::transfer::protocol::{UPLOAD_COMPLETE, UPLOAD_LENGTH, UPLOAD_OFFSET, UPLOAD_STATE};

/// Methods allowed cross-origin.
pub const CORS_METHODS: [Method; 4] = [Method::GET, Method::POST, Method::PATCH, Method::HEAD];

pub fn build_cors_layer(config: &CorsConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let allow_origin = if origins.is_empty() {
        AllowOrigin::mirror_request()
    } else {
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_credentials(true)
        .allow_methods(CORS_METHODS.to_vec())
        .allow_headers(AllowHeaders::mirror_request())
        .expose_headers(exposed_headers())
        .max_age(Duration::from_secs(config.max_age_secs))
}

fn exposed_headers() -> Vec<HeaderName> {
    vec![
        header::LOCATION,
        header::ALLOW,
        header::CONTENT_TYPE,
        header::CONTENT_LENGTH,
        HeaderName::from_static(X_REQUEST_ID),
        HeaderName::from_static(UPLOAD_OFFSET),
        HeaderName::from_static(UPLOAD_LENGTH),
        HeaderName::from_static(UPLOAD_STATE),
        HeaderName::from_static(UPLOAD_COMPLETE),
    ]
}
