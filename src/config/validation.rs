//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (chunk sizes > 0, addresses parse)
//! - Reject ambiguous identity seeds (duplicate keys)

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::GatewayConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener.bind_address {0:?} is not a socket address")]
    BindAddress(String),

    #[error("api.prefix {0:?} must start with '/' and must not end with '/'")]
    Prefix(String),

    #[error("transfer.max_chunk_bytes must be greater than zero")]
    ChunkLimit,

    #[error("limits.max_body_bytes must be greater than zero")]
    BodyLimit,

    #[error("identity key for user {0:?} is empty")]
    EmptyKey(String),

    #[error("identity key entry has an empty user id")]
    EmptyUser,

    #[error("identity key {0:?} is assigned more than once")]
    DuplicateKey(String),

    #[error("observability.metrics_address {0:?} is not a socket address")]
    MetricsAddress(String),
}

/// Validate a parsed configuration, collecting every problem found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.listener.bind_address.clone()));
    }

    let prefix = &config.api.prefix;
    if !prefix.is_empty() && (!prefix.starts_with('/') || prefix.ends_with('/')) {
        errors.push(ValidationError::Prefix(prefix.clone()));
    }

    if config.transfer.max_chunk_bytes == 0 {
        errors.push(ValidationError::ChunkLimit);
    }
    if config.limits.max_body_bytes == 0 {
        errors.push(ValidationError::BodyLimit);
    }

    let mut seen = HashSet::new();
    for entry in &config.identity.keys {
        if entry.user_id.is_empty() {
            errors.push(ValidationError::EmptyUser);
        }
        if entry.api_key.is_empty() {
            errors.push(ValidationError::EmptyKey(entry.user_id.clone()));
        } else if !seen.insert(entry.api_key.as_str()) {
            errors.push(ValidationError::DuplicateKey(entry.api_key.clone()));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ApiKeyConfig;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(validate_config(&GatewayConfig::default()), Ok(()));
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = GatewayConfig::default();
        config.api.prefix = "api/".into();
        config.transfer.max_chunk_bytes = 0;
        config.identity.keys = vec![
            ApiKeyConfig { user_id: "a".into(), api_key: "k".into() },
            ApiKeyConfig { user_id: "b".into(), api_key: "k".into() },
        ];

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::Prefix("api/".into()),
                ValidationError::ChunkLimit,
                ValidationError::DuplicateKey("k".into()),
            ]
        );
    }

    #[test]
    fn test_empty_prefix_allowed() {
        let mut config = GatewayConfig::default();
        config.api.prefix = String::new();
        assert!(validate_config(&config).is_ok());
    }
}
