//! Identity store collaborator.
//!
//! The gateway only needs `lookup`; key issuing and revocation back the
//! login/logout endpoints.

use std::sync::Arc;

use dashmap::DashMap;

use crate::config::IdentityConfig;
use crate::identity::{Credentials, Identity};

/// Read-only credential lookup.
pub trait IdentityStore: Send + Sync {
    /// Resolve credentials to a user. `None` for missing or unknown keys.
    fn lookup(&self, credentials: &Credentials) -> Option<Identity>;
}

/// API-key store held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryIdentityStore {
    keys: Arc<DashMap<String, String>>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store seeded from configuration.
    pub fn from_config(config: &IdentityConfig) -> Self {
        let store = Self::new();
        for entry in &config.keys {
            store.insert(entry.api_key.clone(), entry.user_id.clone());
        }
        store
    }

    pub fn insert(&self, api_key: impl Into<String>, user_id: impl Into<String>) {
        self.keys.insert(api_key.into(), user_id.into());
    }

    /// Mint a new key for `user_id`.
    pub fn issue_key(&self, user_id: &str) -> String {
        let key = uuid::Uuid::new_v4().simple().to_string();
        self.insert(key.clone(), user_id);
        key
    }

    /// Invalidate a key. Returns whether it existed.
    pub fn revoke(&self, api_key: &str) -> bool {
        self.keys.remove(api_key).is_some()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl IdentityStore for InMemoryIdentityStore {
    fn lookup(&self, credentials: &Credentials) -> Option<Identity> {
        let key = credentials.api_key()?;
        self.keys
            .get(key)
            .map(|user| Identity::user(user.value().clone()))
    }
}
