//! HTTP server setup and request dispatch.
//!
//! # Responsibilities
//! - Build the Axum router with the dispatcher as its only handler
//! - Wire up transport layers (CORS, body limit)
//! - Strip the API prefix, look up the route, run its chain
//! - Run the idle-session reaper alongside the server
//! - Serve until the shutdown signal, then drain
//!
//! # Design Decisions
//! - Per-route chains (common stages + optional gate) are built once at
//!   startup and shared read-only
//! - Routing failures run through the common stages too, so they are
//!   logged and carry a request id like every other response

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request},
    response::{IntoResponse, Response},
    Router,
};
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;

use crate::config::GatewayConfig;
use crate::http::response::{ApiError, ApiResult};
use crate::identity::{IdentityResolver, IdentityStore};
use crate::lifecycle::ShutdownSignal;
use crate::observability::{LogContext, LogSink, TracingSink};
use crate::pipeline::{
    AssignRequestId, Authenticate, CrashIsolation, Handler, Inject, Pipeline, RequestContext,
    RequestDeadline, RequestLogging, Services, X_REQUEST_ID,
};
use crate::routing::{RouteTable, RoutingError};
use crate::security::build_cors_layer;

/// Terminal handler for requests no route accepted.
struct Unrouted(RoutingError);

#[async_trait::async_trait]
impl Handler for Unrouted {
    async fn call(&self, _ctx: RequestContext, _req: Request<Body>) -> ApiResult {
        Err(ApiError::from(self.0.clone()))
    }
}

/// Immutable dispatch state shared by all requests.
pub struct Dispatcher {
    prefix: String,
    table: RouteTable,
    common: Pipeline,
    chains: HashMap<String, Pipeline>,
    sink: Arc<dyn LogSink>,
}

impl Dispatcher {
    pub fn new(prefix: &str, table: RouteTable, common: Pipeline, sink: Arc<dyn LogSink>) -> Self {
        let chains = table
            .routes()
            .iter()
            .map(|route| {
                let chain = match route.policy.gate() {
                    Some(gate) => common.append(Arc::new(gate)),
                    None => common.clone(),
                };
                (route.name.clone(), chain)
            })
            .collect();

        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
            table,
            common,
            chains,
            sink,
        }
    }

    /// Path below the mount prefix, or `None` when outside it.
    fn relative<'p>(&self, path: &'p str) -> Option<&'p str> {
        let rest = path.strip_prefix(self.prefix.as_str())?;
        if rest.is_empty() {
            Some("/")
        } else if rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }

    pub async fn dispatch(&self, req: Request<Body>) -> Response {
        let ctx = RequestContext::new(LogContext::new(self.sink.clone()));
        let trace = ctx.trace.clone();
        let path = req.uri().path().to_string();

        let lookup = match self.relative(&path) {
            Some(relative) => self.table.lookup(req.method(), relative),
            None => Err(RoutingError::NoMatch),
        };

        let result = match lookup {
            Ok(matched) => {
                let route = matched.route;
                let ctx = ctx.with_route(route.name.clone(), matched.params, matched.remainder);
                let chain = self.chains.get(&route.name).unwrap_or(&self.common);
                chain.run(route.handler.as_ref(), ctx, req).await
            }
            Err(err) => self.common.run(&Unrouted(err), ctx, req).await,
        };

        let mut response = result.unwrap_or_else(IntoResponse::into_response);
        if let Some(id) = trace.request_id() {
            if let Ok(value) = HeaderValue::from_str(id) {
                response.headers_mut().insert(X_REQUEST_ID, value);
            }
        }
        response
    }
}

async fn dispatch_handler(State(dispatcher): State<Arc<Dispatcher>>, req: Request<Body>) -> Response {
    dispatcher.dispatch(req).await
}

/// The stages every request passes through, in order.
pub fn common_pipeline(services: &Services) -> Pipeline {
    let store: Arc<dyn IdentityStore> = services.keys.clone();
    let mut pipeline = Pipeline::new()
        .stage(RequestLogging)
        .stage(CrashIsolation)
        .stage(AssignRequestId);
    if let Some(limit) = services.settings.request_timeout {
        pipeline = pipeline.stage(RequestDeadline::new(limit));
    }
    pipeline
        .stage(Inject::new(Arc::new(services.clone())))
        .stage(Authenticate::new(IdentityResolver::new(store)))
}

/// HTTP server for the API gateway.
pub struct GatewayServer {
    router: Router,
    config: GatewayConfig,
    services: Services,
}

impl GatewayServer {
    /// Create a server logging through `tracing`.
    pub fn new(config: GatewayConfig, services: Services, table: RouteTable) -> Self {
        Self::with_sink(config, services, table, Arc::new(TracingSink))
    }

    /// Create a server writing request records to `sink`.
    pub fn with_sink(
        config: GatewayConfig,
        services: Services,
        table: RouteTable,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        crate::pipeline::crash::install_panic_hook();

        let dispatcher = Arc::new(Dispatcher::new(
            &config.api.prefix,
            table,
            common_pipeline(&services),
            sink,
        ));
        let router = Self::build_router(&config, dispatcher);
        Self {
            router,
            config,
            services,
        }
    }

    /// Build the Axum router with all transport layers.
    fn build_router(config: &GatewayConfig, dispatcher: Arc<Dispatcher>) -> Router {
        let body_limit = config.limits.max_body_bytes.max(config.transfer.max_chunk_bytes);
        Router::new()
            .fallback(dispatch_handler)
            .with_state(dispatcher)
            .layer(RequestBodyLimitLayer::new(body_limit))
            .layer(build_cors_layer(&config.cors))
    }

    /// The fully layered router, for in-process use.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Serve on `listener` until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: ShutdownSignal,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, prefix = %self.config.api.prefix, "HTTP server starting");

        if self.config.transfer.session_ttl_secs > 0 {
            let reaper = reap_sessions(
                self.services.clone(),
                Duration::from_secs(self.config.transfer.session_ttl_secs),
                Duration::from_secs(self.config.transfer.reap_interval_secs.max(1)),
                shutdown.resubscribe(),
            );
            tokio::spawn(reaper);
        }

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                shutdown.fired().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn reap_sessions(
    services: Services,
    ttl: Duration,
    every: Duration,
    mut shutdown: ShutdownSignal,
) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let reaped = services.transfers.reap_idle(ttl);
                if reaped.aborted > 0 || reaped.evicted > 0 {
                    tracing::info!(
                        aborted = reaped.aborted,
                        evicted = reaped.evicted,
                        "Reaped idle upload sessions"
                    );
                }
            }
            _ = shutdown.fired() => break,
        }
    }
}
