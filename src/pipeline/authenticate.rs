//! Authentication stage.
//!
//! Resolves the caller and stores the identity in the context. It never
//! rejects: anonymous callers continue, and the per-route gate decides.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;

use crate::http::response::ApiResult;
use crate::identity::{Credentials, IdentityResolver};
use crate::observability::FieldValue;
use crate::pipeline::{Next, RequestContext, Stage};

pub struct Authenticate {
    resolver: IdentityResolver,
}

impl Authenticate {
    pub fn new(resolver: IdentityResolver) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl Stage for Authenticate {
    fn name(&self) -> &'static str {
        "authenticate"
    }

    async fn handle(&self, mut ctx: RequestContext, req: Request<Body>, next: Next<'_>) -> ApiResult {
        let credentials = Credentials::extract(req.headers(), req.uri());
        ctx.identity = self.resolver.resolve(&credentials);
        ctx.log = ctx
            .log
            .with_field("user", FieldValue::Str(ctx.identity.to_string()));
        next.run(ctx, req).await
    }
}
