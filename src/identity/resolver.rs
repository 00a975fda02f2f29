//! Credentials to identity resolution.

use std::sync::Arc;

use crate::identity::{Credentials, Identity, IdentityStore};

/// Resolves credentials against an identity store.
#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<dyn IdentityStore>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self { store }
    }

    /// Never fails. Missing or unknown credentials resolve to `Anonymous`.
    pub fn resolve(&self, credentials: &Credentials) -> Identity {
        if credentials.api_key().is_none() {
            return Identity::Anonymous;
        }
        self.store.lookup(credentials).unwrap_or(Identity::Anonymous)
    }
}
