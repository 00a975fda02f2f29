//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Build storage, identity store and route table in dependency order
//! - Assemble the server ready to accept traffic
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - The route table is validated here, before the listener binds

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::config::{load_config, ConfigError, GatewayConfig};
use crate::http::{standard_table, GatewayServer};
use crate::identity::InMemoryIdentityStore;
use crate::pipeline::{Services, Settings};
use crate::routing::RouteTableError;
use crate::storage::{FsStorage, MemoryStorage, Storage, StorageError};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("route table: {0}")]
    Routes(#[from] RouteTableError),

    #[error("storage: {0}")]
    Storage(#[from] StorageError),
}

/// Configuration from `path`, or defaults when no path is given.
pub fn load(path: Option<&Path>) -> Result<GatewayConfig, StartupError> {
    match path {
        Some(path) => Ok(load_config(path)?),
        None => Ok(GatewayConfig::default()),
    }
}

/// Shared services described by `config`.
pub async fn build_services(config: &GatewayConfig) -> Result<Services, StartupError> {
    let storage: Arc<dyn Storage> = match &config.transfer.storage_root {
        Some(root) => Arc::new(FsStorage::open(root).await?),
        None => Arc::new(MemoryStorage::new()),
    };
    let keys = InMemoryIdentityStore::from_config(&config.identity);

    let backend = if config.transfer.storage_root.is_some() {
        "filesystem"
    } else {
        "memory"
    };
    tracing::info!(
        storage = backend,
        api_keys = keys.len(),
        "Services initialized"
    );

    Ok(Services::new(storage, keys, Settings::from_config(config)))
}

/// Server with the standard route table.
pub async fn build_server(config: GatewayConfig) -> Result<GatewayServer, StartupError> {
    let services = build_services(&config).await?;
    let table = standard_table(config.api.strict_slash)?;
    tracing::info!(routes = table.len(), "Route table compiled");
    Ok(GatewayServer::new(config, services, table))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_defaults_build() {
        let config = load(None).unwrap();
        let server = build_server(config).await.unwrap();
        assert_eq!(server.config().api.prefix, "/api/v1");
    }

    #[tokio::test]
    async fn test_filesystem_storage_root_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = GatewayConfig::default();
        config.transfer.storage_root = Some(dir.path().join("blobs").display().to_string());

        let services = build_services(&config).await.unwrap();
        assert!(services.storage.is_available().await);
        assert!(dir.path().join("blobs").is_dir());
    }
}
