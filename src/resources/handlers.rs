//! Collection and account handlers.

use async_trait::async_trait;
use axum::body::{self, Body};
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Map, Value};

use crate::http::response::{ApiError, ApiResult};
use crate::identity::{Credentials, API_KEY_PARAM};
use crate::observability::Fields;
use crate::pipeline::{Handler, RequestContext};
use crate::resources::store::Collection;

/// How a document key is spelled in the path.
#[derive(Debug, Clone, Copy)]
pub enum KeyShape {
    /// `/{collection}/{id}`
    Single,
    /// `/{collection}/{scope}/{id}`, scope being e.g. `user-id` or `job-id`.
    Scoped(&'static str),
}

impl KeyShape {
    fn key(self, ctx: &RequestContext) -> Result<String, ApiError> {
        let id = ctx.param("id")?;
        Ok(match self {
            KeyShape::Single => id.to_string(),
            KeyShape::Scoped(scope) => format!("{}/{}", ctx.param(scope)?, id),
        })
    }
}

/// Body as a JSON object. An empty body is an empty object.
async fn json_object(req: Request<Body>, limit: usize) -> Result<Map<String, Value>, ApiError> {
    let declared = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared.is_some_and(|len| len > limit as u64) {
        return Err(ApiError::PayloadTooLarge);
    }

    let bytes = body::to_bytes(req.into_body(), limit)
        .await
        .map_err(|_| match declared {
            Some(_) => ApiError::BadRequest("unreadable request body".into()),
            None => ApiError::PayloadTooLarge,
        })?;
    if bytes.is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ApiError::BadRequest("body must be a JSON object".into())),
        Err(e) => Err(ApiError::BadRequest(format!("invalid JSON: {e}"))),
    }
}

fn take_string(fields: &mut Map<String, Value>, name: &str) -> Result<Option<String>, ApiError> {
    match fields.remove(name) {
        None => Ok(None),
        Some(Value::String(s)) if !s.is_empty() && !s.contains('/') => Ok(Some(s)),
        Some(_) => Err(ApiError::BadRequest(format!(
            "{name} must be a non-empty string without '/'"
        ))),
    }
}

/// `GET /`
pub struct Index;

#[async_trait]
impl Handler for Index {
    async fn call(&self, _ctx: RequestContext, _req: Request<Body>) -> ApiResult {
        Ok("API gateway is running.\n".into_response())
    }
}

/// `GET /{collection}`
pub struct ListResources {
    collection: Collection,
}

impl ListResources {
    pub fn new(collection: Collection) -> Self {
        Self { collection }
    }
}

#[async_trait]
impl Handler for ListResources {
    async fn call(&self, ctx: RequestContext, _req: Request<Body>) -> ApiResult {
        let services = ctx.services()?;
        let docs: Vec<Value> = services
            .resources
            .list(self.collection)
            .iter()
            .map(|r| r.to_json())
            .collect();
        Ok(Json(docs).into_response())
    }
}

/// `POST /{collection}`
///
/// Key rules: users need an explicit `id` and are created by root only;
/// datasets and modules are keyed under the caller; tasks are keyed under
/// the existing job named by `job`. Other collections generate an id when
/// none is given.
pub struct CreateResource {
    collection: Collection,
}

impl CreateResource {
    pub fn new(collection: Collection) -> Self {
        Self { collection }
    }
}

#[async_trait]
impl Handler for CreateResource {
    async fn call(&self, ctx: RequestContext, req: Request<Body>) -> ApiResult {
        let services = ctx.services()?;
        let caller = ctx.user_id()?;
        let mut fields = json_object(req, services.settings.max_body_bytes).await?;

        let id = take_string(&mut fields, "id")?;
        let generated = || uuid::Uuid::new_v4().simple().to_string();

        let (key, owner) = match self.collection {
            Collection::Users => {
                if caller != services.settings.root_user {
                    return Err(ApiError::Forbidden);
                }
                let id = id.ok_or_else(|| ApiError::BadRequest("id is required".into()))?;
                (id.clone(), id)
            }
            Collection::Datasets | Collection::Modules => {
                (format!("{caller}/{}", id.unwrap_or_else(generated)), caller.to_string())
            }
            Collection::Tasks => {
                let job = fields
                    .get("job")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ApiError::BadRequest("job is required".into()))?
                    .to_string();
                if services.resources.get(Collection::Jobs, &job).is_none() {
                    return Err(ApiError::BadRequest(format!("unknown job {job:?}")));
                }
                (format!("{job}/{}", id.unwrap_or_else(generated)), caller.to_string())
            }
            Collection::Processes | Collection::Jobs => {
                (id.unwrap_or_else(generated), caller.to_string())
            }
        };

        let created = services
            .resources
            .insert(self.collection, key, owner, fields)?;

        ctx.log
            .with_fields(
                &Fields::new()
                    .str("collection", self.collection.as_str())
                    .str("key", created.key.clone()),
            )
            .info("resource created");

        let location = format!(
            "{}/{}/{}",
            services.settings.api_prefix, self.collection, created.key
        );
        let location = HeaderValue::from_str(&location).map_err(|_| ApiError::Internal)?;
        let mut response = (StatusCode::CREATED, Json(created.to_json())).into_response();
        response.headers_mut().insert(header::LOCATION, location);
        Ok(response)
    }
}

/// `GET /{collection}/.../{id}`
pub struct GetResource {
    collection: Collection,
    shape: KeyShape,
}

impl GetResource {
    pub fn new(collection: Collection, shape: KeyShape) -> Self {
        Self { collection, shape }
    }
}

#[async_trait]
impl Handler for GetResource {
    async fn call(&self, ctx: RequestContext, _req: Request<Body>) -> ApiResult {
        let services = ctx.services()?;
        let key = self.shape.key(&ctx)?;
        let doc = services
            .resources
            .get(self.collection, &key)
            .ok_or(ApiError::NotFound)?;
        Ok(Json(doc.to_json()).into_response())
    }
}

/// `PATCH /{collection}/.../{id}`. Owner or root only.
pub struct PatchResource {
    collection: Collection,
    shape: KeyShape,
}

impl PatchResource {
    pub fn new(collection: Collection, shape: KeyShape) -> Self {
        Self { collection, shape }
    }
}

#[async_trait]
impl Handler for PatchResource {
    async fn call(&self, ctx: RequestContext, req: Request<Body>) -> ApiResult {
        let services = ctx.services()?;
        let caller = ctx.user_id()?;
        let key = self.shape.key(&ctx)?;

        let current = services
            .resources
            .get(self.collection, &key)
            .ok_or(ApiError::NotFound)?;
        if current.owner != caller && caller != services.settings.root_user {
            return Err(ApiError::Forbidden);
        }

        let fields = json_object(req, services.settings.max_body_bytes).await?;
        let patched = services.resources.patch(self.collection, &key, fields)?;
        Ok(Json(patched.to_json()).into_response())
    }
}

/// `GET /users/login`: issues a fresh key for the caller.
pub struct Login;

#[async_trait]
impl Handler for Login {
    async fn call(&self, ctx: RequestContext, _req: Request<Body>) -> ApiResult {
        let services = ctx.services()?;
        let caller = ctx.user_id()?;
        let key = services.keys.issue_key(caller);

        let cookie = format!("{API_KEY_PARAM}={key}; Path=/; HttpOnly; SameSite=Lax");
        let cookie = HeaderValue::from_str(&cookie).map_err(|_| ApiError::Internal)?;

        ctx.log.info("api key issued");
        let mut response = Json(json!({ "api_key": key })).into_response();
        response.headers_mut().insert(header::SET_COOKIE, cookie);
        Ok(response)
    }
}

/// `GET /users/logout`: revokes the key the request was made with.
pub struct Logout;

#[async_trait]
impl Handler for Logout {
    async fn call(&self, ctx: RequestContext, req: Request<Body>) -> ApiResult {
        let services = ctx.services()?;
        ctx.user_id()?;
        let credentials = Credentials::extract(req.headers(), req.uri());
        let revoked = credentials
            .api_key()
            .is_some_and(|key| services.keys.revoke(key));

        ctx.log
            .with_fields(&Fields::new().bool("revoked", revoked))
            .info("logout");

        let mut response = StatusCode::NO_CONTENT.into_response();
        response.headers_mut().insert(
            header::SET_COOKIE,
            HeaderValue::from_static("api-key=; Path=/; Max-Age=0"),
        );
        Ok(response)
    }
}
