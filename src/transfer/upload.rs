//! Upload endpoints: Create, Status and Append.
//!
//! The routes are public; identity is checked here. Anonymous callers,
//! callers without write access to the resource, and callers asking about
//! another identity's session all get 404.

use async_trait::async_trait;
use axum::body::{self, Body, Bytes};
use axum::http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode};
use axum::response::IntoResponse;

use crate::http::response::{ApiError, ApiResult};
use crate::observability::{metrics, Fields};
use crate::pipeline::{Handler, RequestContext, Services};
use crate::resources::Collection;
use crate::transfer::protocol::{self, UPLOAD_LENGTH, UPLOAD_OFFSET, UPLOAD_STATE};
use crate::transfer::session::{TransferError, TransferSession};

/// Identifies the resource an upload route targets.
#[derive(Debug, Clone, Copy)]
pub struct UploadTarget {
    pub collection: Collection,
    /// Path parameter holding the resource id (`dataset-id`, `module-id`).
    pub id_param: &'static str,
}

impl UploadTarget {
    pub const fn new(collection: Collection, id_param: &'static str) -> Self {
        Self { collection, id_param }
    }

    /// Resolves `(caller, resource storage prefix)` for the request.
    fn resolve<'a>(&self, ctx: &'a RequestContext, services: &Services) -> Result<(&'a str, String), ApiError> {
        let caller = ctx.identity.id().ok_or(ApiError::NotFound)?;
        let owner = ctx.param("user-id")?;
        let id = ctx.param(self.id_param)?;

        if caller != owner && caller != services.settings.root_user {
            return Err(ApiError::NotFound);
        }
        let key = format!("{owner}/{id}");
        if services.resources.get(self.collection, &key).is_none() {
            return Err(ApiError::NotFound);
        }
        Ok((caller, format!("{}/{}", self.collection.as_str(), key)))
    }
}

fn session_headers(headers: &mut HeaderMap, session: &TransferSession) {
    headers.insert(UPLOAD_OFFSET, HeaderValue::from(session.bytes_received));
    headers.insert(UPLOAD_STATE, HeaderValue::from_static(session.state.as_str()));
    if let Some(length) = session.total_expected {
        headers.insert(UPLOAD_LENGTH, HeaderValue::from(length));
    }
}

/// `POST .../upload`
pub struct CreateUpload {
    target: UploadTarget,
}

impl CreateUpload {
    pub fn new(target: UploadTarget) -> Self {
        Self { target }
    }
}

#[async_trait]
impl Handler for CreateUpload {
    async fn call(&self, ctx: RequestContext, req: Request<Body>) -> ApiResult {
        let services = ctx.services()?;
        let (caller, resource) = self.target.resolve(&ctx, services)?;

        let length = protocol::length(req.headers())?;
        let filename = protocol::filename(req.headers())?;
        let session = services.transfers.create(caller, &resource, length, filename);

        let location = format!("{}/{}/upload/{}", services.settings.api_prefix, resource, session.id);
        let location = HeaderValue::from_str(&location).map_err(|_| ApiError::Internal)?;

        ctx.log
            .with_fields(
                &Fields::new()
                    .str("upload_id", session.id.clone())
                    .str("resource", resource),
            )
            .info("upload session created");

        let mut response = StatusCode::CREATED.into_response();
        response.headers_mut().insert(header::LOCATION, location);
        session_headers(response.headers_mut(), &session);
        Ok(response)
    }
}

/// `HEAD` and `PATCH .../upload/{upload-id}`
pub struct SessionUpload {
    target: UploadTarget,
}

impl SessionUpload {
    pub fn new(target: UploadTarget) -> Self {
        Self { target }
    }

    async fn status(&self, ctx: &RequestContext) -> ApiResult {
        let services = ctx.services()?;
        let session = self.owned_session(ctx, services).await?;

        let mut response = StatusCode::OK.into_response();
        session_headers(response.headers_mut(), &session);
        response
            .headers_mut()
            .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        Ok(response)
    }

    async fn append(&self, ctx: &RequestContext, req: Request<Body>) -> ApiResult {
        let services = ctx.services()?;
        let session = self.owned_session(ctx, services).await?;

        let offset = protocol::offset(req.headers())?;
        let finalize = protocol::complete(req.headers())?;
        let chunk = read_chunk(req, services.settings.max_chunk_bytes).await?;
        let len = chunk.len() as u64;

        let updated = services
            .transfers
            .append(
                services.storage.as_ref(),
                &session.id,
                &session.owner_id,
                offset,
                chunk,
                finalize,
            )
            .await
            .map_err(|err| {
                if let TransferError::Storage(source) = &err {
                    ctx.log.with_error(source).error("upload chunk not stored");
                }
                ApiError::from(err)
            })?;

        metrics::record_transfer_bytes("upload", len);
        ctx.log
            .with_fields(
                &Fields::new()
                    .str("upload_id", updated.id.clone())
                    .u64("offset", offset)
                    .u64("bytes", len)
                    .str("state", updated.state.as_str()),
            )
            .debug("upload chunk accepted");

        let mut response = StatusCode::NO_CONTENT.into_response();
        session_headers(response.headers_mut(), &updated);
        Ok(response)
    }

    async fn owned_session(&self, ctx: &RequestContext, services: &Services) -> Result<TransferSession, ApiError> {
        let (caller, resource) = self.target.resolve(ctx, services)?;
        let upload_id = ctx.param("upload-id")?;
        let session = services.transfers.status(upload_id, caller).await?;
        if session.resource != resource {
            return Err(ApiError::NotFound);
        }
        Ok(session)
    }
}

#[async_trait]
impl Handler for SessionUpload {
    async fn call(&self, ctx: RequestContext, req: Request<Body>) -> ApiResult {
        if req.method() == Method::HEAD {
            self.status(&ctx).await
        } else if req.method() == Method::PATCH {
            self.append(&ctx, req).await
        } else {
            Err(ApiError::MethodNotAllowed {
                allowed: vec![Method::HEAD, Method::PATCH],
            })
        }
    }
}

/// Buffers the whole chunk before any session state is touched.
async fn read_chunk(req: Request<Body>, limit: usize) -> Result<Bytes, ApiError> {
    let declared = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    if declared.is_some_and(|len| len > limit as u64) {
        return Err(ApiError::PayloadTooLarge);
    }

    body::to_bytes(req.into_body(), limit).await.map_err(|_| match declared {
        // length was within bounds, so the body itself failed
        Some(_) => ApiError::BadRequest("incomplete request body".into()),
        None => ApiError::PayloadTooLarge,
    })
}
