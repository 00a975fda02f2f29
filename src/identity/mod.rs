//! Identity and session resolution.
//!
//! # Data Flow
//! ```text
//! Request headers / cookie / query
//!     → Credentials::from_parts (collect the presented API key)
//!     → IdentityResolver::resolve (store lookup)
//!     → Identity (a user, or Anonymous)
//! ```
//!
//! # Design Decisions
//! - Resolution never fails: bad or missing credentials yield `Anonymous`
//! - `Anonymous` is a value, so every later check works on a total identity
//! - Only the authorization gate turns anonymity into a rejection

pub mod resolver;
pub mod store;

pub use resolver::IdentityResolver;
pub use store::{IdentityStore, InMemoryIdentityStore};

use std::fmt;

use axum::http::request::Parts;
use axum::http::{HeaderMap, Uri};

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "x-api-key";
/// Cookie and query parameter name carrying the API key.
pub const API_KEY_PARAM: &str = "api-key";

/// The caller of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum Identity {
    #[default]
    Anonymous,
    User(String),
}

impl Identity {
    pub fn user(id: impl Into<String>) -> Self {
        Identity::User(id.into())
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Identity::Anonymous)
    }

    /// User id, or `None` for the anonymous caller.
    pub fn id(&self) -> Option<&str> {
        match self {
            Identity::Anonymous => None,
            Identity::User(id) => Some(id),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Anonymous => f.write_str("anonymous"),
            Identity::User(id) => f.write_str(id),
        }
    }
}

/// Credentials presented with a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    api_key: Option<String>,
}

impl Credentials {
    pub fn api_key_only(key: impl Into<String>) -> Self {
        Self {
            api_key: Some(key.into()),
        }
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    /// Collect credentials from request parts.
    ///
    /// Priority: `X-API-KEY` header, `Authorization: Bearer`, `api-key`
    /// cookie, `api-key` query parameter. Empty values are ignored.
    pub fn from_parts(parts: &Parts) -> Self {
        Self::extract(&parts.headers, &parts.uri)
    }

    /// Same as [`Credentials::from_parts`], from borrowed headers and URI.
    pub fn extract(headers: &HeaderMap, uri: &Uri) -> Self {
        let from_header = headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let from_bearer = || {
            headers
                .get(axum::http::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|v| v.trim().to_string())
        };

        let from_cookie = || {
            headers
                .get_all(axum::http::header::COOKIE)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .flat_map(|v| v.split(';'))
                .filter_map(|pair| pair.trim().split_once('='))
                .find(|(name, _)| *name == API_KEY_PARAM)
                .map(|(_, value)| value.to_string())
        };

        let from_query = || {
            uri.query().and_then(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .find(|(name, _)| name == API_KEY_PARAM)
                    .map(|(_, value)| value.into_owned())
            })
        };

        let api_key = from_header
            .filter(|k| !k.is_empty())
            .or_else(|| from_bearer().filter(|k| !k.is_empty()))
            .or_else(|| from_cookie().filter(|k| !k.is_empty()))
            .or_else(|| from_query().filter(|k| !k.is_empty()));

        Self { api_key }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(builder: axum::http::request::Builder) -> Parts {
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_header_wins_over_everything() {
        let p = parts(
            Request::builder()
                .uri("/x?api-key=q")
                .header("X-API-KEY", "h")
                .header("Authorization", "Bearer b")
                .header("Cookie", "api-key=c"),
        );
        assert_eq!(Credentials::from_parts(&p).api_key(), Some("h"));
    }

    #[test]
    fn test_fallback_order() {
        let bearer = parts(
            Request::builder()
                .uri("/x?api-key=q")
                .header("Authorization", "Bearer b")
                .header("Cookie", "api-key=c"),
        );
        assert_eq!(Credentials::from_parts(&bearer).api_key(), Some("b"));

        let cookie = parts(
            Request::builder()
                .uri("/x?api-key=q")
                .header("Cookie", "theme=dark; api-key=c"),
        );
        assert_eq!(Credentials::from_parts(&cookie).api_key(), Some("c"));

        let query = parts(Request::builder().uri("/x?other=1&api-key=q%20z"));
        assert_eq!(Credentials::from_parts(&query).api_key(), Some("q z"));
    }

    #[test]
    fn test_no_credentials() {
        let p = parts(Request::builder().uri("/x").header("X-API-KEY", ""));
        assert_eq!(Credentials::from_parts(&p), Credentials::default());
    }
}
