//! Download endpoint for prefix routes.
//!
//! The route pattern names a storage directory; the path remainder below it
//! picks a blob, or lists a directory when it names none.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::response::IntoResponse;
use axum::Json;

use crate::http::response::{ApiError, ApiResult};
use crate::observability::{metrics, Fields};
use crate::pipeline::{Handler, RequestContext};
use crate::resources::Collection;
use crate::storage::StorageError;

/// Serves `{collection}/{first}/{second}/{dir}{remainder}` from storage.
pub struct Download {
    collection: Collection,
    params: [&'static str; 2],
    dir: &'static str,
    listing: bool,
}

impl Download {
    pub fn new(collection: Collection, params: [&'static str; 2], dir: &'static str) -> Self {
        Self {
            collection,
            params,
            dir,
            listing: true,
        }
    }

    /// Serve single blobs only.
    pub fn blob_only(mut self) -> Self {
        self.listing = false;
        self
    }

    fn key(&self, ctx: &RequestContext) -> Result<String, ApiError> {
        let mut key = format!(
            "{}/{}/{}/{}",
            self.collection.as_str(),
            ctx.param(self.params[0])?,
            ctx.param(self.params[1])?,
            self.dir
        );
        let rest = ctx.remainder.trim_matches('/');
        if !rest.is_empty() {
            key.push('/');
            key.push_str(rest);
        }
        Ok(key)
    }
}

fn storage_error(ctx: &RequestContext, err: StorageError) -> ApiError {
    match err {
        StorageError::InvalidKey(_) => ApiError::NotFound,
        other => {
            ctx.log.with_error(&other).error("download failed");
            ApiError::Internal
        }
    }
}

#[async_trait]
impl Handler for Download {
    async fn call(&self, ctx: RequestContext, _req: Request<Body>) -> ApiResult {
        if ctx.identity.is_anonymous() {
            return Err(ApiError::NotFound);
        }
        let services = ctx.services()?;
        let key = self.key(&ctx)?;

        if let Some(blob) = services
            .storage
            .read(&key)
            .await
            .map_err(|e| storage_error(&ctx, e))?
        {
            metrics::record_transfer_bytes("download", blob.len() as u64);
            ctx.log
                .with_fields(&Fields::new().str("key", key).u64("bytes", blob.len() as u64))
                .debug("blob served");
            let mut response = (StatusCode::OK, blob).into_response();
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            );
            return Ok(response);
        }

        if !self.listing {
            return Err(ApiError::NotFound);
        }
        let entries = services
            .storage
            .list(&key)
            .await
            .map_err(|e| storage_error(&ctx, e))?;
        if entries.is_empty() {
            return Err(ApiError::NotFound);
        }
        Ok(Json(entries).into_response())
    }
}
