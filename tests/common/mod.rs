//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::sync::Arc;

use api_gateway::config::{ApiKeyConfig, GatewayConfig};
use api_gateway::http::{standard_routes, GatewayServer};
use api_gateway::lifecycle::{build_services, Shutdown};
use api_gateway::observability::MemorySink;
use api_gateway::pipeline::Services;
use api_gateway::routing::{Route, RouteTable};
use tokio::net::TcpListener;

pub const ROOT_KEY: &str = "root-key";
pub const KEY_42: &str = "key-42";
#[allow(dead_code)]
pub const KEY_7: &str = "key-7";

/// A gateway running on an ephemeral port.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub services: Services,
    pub sink: Arc<MemorySink>,
    shutdown: Shutdown,
}

#[allow(dead_code)]
impl TestGateway {
    /// URL of `path` below the API prefix.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}/api/v1{}", self.addr, path)
    }

    pub fn stop(&self) {
        self.shutdown.trigger();
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.identity.keys = [("root", ROOT_KEY), ("42", KEY_42), ("7", "key-7")]
        .into_iter()
        .map(|(user, key)| ApiKeyConfig {
            user_id: user.into(),
            api_key: key.into(),
        })
        .collect();
    config
}

/// Start a gateway with the standard table.
#[allow(dead_code)]
pub async fn spawn_gateway(config: GatewayConfig) -> TestGateway {
    spawn_with_routes(config, Vec::new()).await
}

/// Start a gateway with the standard table plus `extra` routes.
pub async fn spawn_with_routes(config: GatewayConfig, extra: Vec<Route>) -> TestGateway {
    let services = build_services(&config).await.unwrap();
    let mut routes = standard_routes();
    routes.extend(extra);
    let table = RouteTable::new(routes, config.api.strict_slash).unwrap();

    let sink = Arc::new(MemorySink::new());
    let server = GatewayServer::with_sink(config, services.clone(), table, sink.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        server.run(listener, rx).await.unwrap();
    });

    TestGateway {
        addr,
        services,
        sink,
        shutdown,
    }
}

/// Client that authenticates with `key`.
#[allow(dead_code)]
pub fn client_with_key(key: &str) -> reqwest::Client {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert("x-api-key", key.parse().unwrap());
    reqwest::Client::builder()
        .default_headers(headers)
        .build()
        .unwrap()
}
