//! Dependency injection stage.
//!
//! Attaches the shared, pre-initialized services to the request context.
//! When a service cannot be obtained the request ends with 503.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;

use crate::config::GatewayConfig;
use crate::http::response::{ApiError, ApiResult};
use crate::identity::InMemoryIdentityStore;
use crate::pipeline::{Next, RequestContext, Stage};
use crate::resources::ResourceStore;
use crate::storage::Storage;
use crate::transfer::SessionRegistry;

/// Handler-facing settings derived from configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Mount prefix, used to build `Location` headers.
    pub api_prefix: String,
    /// User allowed to modify any resource.
    pub root_user: String,
    /// Largest single upload chunk.
    pub max_chunk_bytes: usize,
    /// Largest JSON document body.
    pub max_body_bytes: usize,
    /// Whole-request time limit. `None` when disabled.
    pub request_timeout: Option<Duration>,
}

impl Settings {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            api_prefix: config.api.prefix.clone(),
            root_user: config.identity.root_user.clone(),
            max_chunk_bytes: config.transfer.max_chunk_bytes,
            max_body_bytes: config.limits.max_body_bytes,
            request_timeout: match config.timeouts.request_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_config(&GatewayConfig::default())
    }
}

/// Shared services. Every member is safe for concurrent use.
#[derive(Clone)]
pub struct Services {
    pub storage: Arc<dyn Storage>,
    pub keys: Arc<InMemoryIdentityStore>,
    pub transfers: Arc<SessionRegistry>,
    pub resources: Arc<ResourceStore>,
    pub settings: Arc<Settings>,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("keys", &self.keys.len())
            .field("transfers", &self.transfers.len())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Services {
    pub fn new(storage: Arc<dyn Storage>, keys: InMemoryIdentityStore, settings: Settings) -> Self {
        Self {
            storage,
            keys: Arc::new(keys),
            transfers: Arc::new(SessionRegistry::new()),
            resources: Arc::new(ResourceStore::new()),
            settings: Arc::new(settings),
        }
    }
}

/// Source of services for each request.
#[async_trait]
pub trait ServiceProvider: Send + Sync {
    async fn provide(&self) -> Result<Services, ApiError>;
}

#[async_trait]
impl ServiceProvider for Services {
    /// Hands out the shared services after checking storage is reachable.
    async fn provide(&self) -> Result<Services, ApiError> {
        if !self.storage.is_available().await {
            return Err(ApiError::DependencyUnavailable("storage".into()));
        }
        Ok(self.clone())
    }
}

/// Stage attaching services to the context.
pub struct Inject {
    provider: Arc<dyn ServiceProvider>,
}

impl Inject {
    pub fn new(provider: Arc<dyn ServiceProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Stage for Inject {
    fn name(&self) -> &'static str {
        "inject"
    }

    async fn handle(&self, mut ctx: RequestContext, req: Request<Body>, next: Next<'_>) -> ApiResult {
        match self.provider.provide().await {
            Ok(services) => {
                ctx.services = Some(services);
                next.run(ctx, req).await
            }
            Err(err) => {
                ctx.log.with_error(&err).warn("service injection failed");
                Err(err)
            }
        }
    }
}
