//! Authorization gate.
//!
//! Per-route policy applied after authentication and before the handler.
//! `RejectAnonymous` answers 401. `HideFromAnonymous` answers 404 so an
//! anonymous caller cannot tell a forbidden resource from a missing one.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;

use crate::http::response::{ApiError, ApiResult};
use crate::identity::Identity;
use crate::pipeline::{Next, RequestContext, Stage};

/// Visibility policy of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AccessPolicy {
    /// No gate.
    #[default]
    Public,
    /// Anonymous callers get 401. For collection endpoints.
    RejectAnonymous,
    /// Anonymous callers get 404. For single-resource endpoints.
    HideFromAnonymous,
}

impl AccessPolicy {
    /// Check `identity` against this policy.
    pub fn check(self, identity: &Identity) -> Result<(), ApiError> {
        match (self, identity.is_anonymous()) {
            (AccessPolicy::RejectAnonymous, true) => Err(ApiError::Unauthorized),
            (AccessPolicy::HideFromAnonymous, true) => Err(ApiError::Hidden),
            _ => Ok(()),
        }
    }

    /// The stage enforcing this policy, or `None` for public routes.
    pub fn gate(self) -> Option<AccessGate> {
        match self {
            AccessPolicy::Public => None,
            policy => Some(AccessGate { policy }),
        }
    }
}

/// Stage enforcing one `AccessPolicy`.
#[derive(Debug, Clone, Copy)]
pub struct AccessGate {
    policy: AccessPolicy,
}

#[async_trait]
impl Stage for AccessGate {
    fn name(&self) -> &'static str {
        match self.policy {
            AccessPolicy::Public => "gate_public",
            AccessPolicy::RejectAnonymous => "gate_reject_anonymous",
            AccessPolicy::HideFromAnonymous => "gate_hide_from_anonymous",
        }
    }

    async fn handle(&self, ctx: RequestContext, req: Request<Body>, next: Next<'_>) -> ApiResult {
        if let Err(err) = self.policy.check(&ctx.identity) {
            ctx.log.debug("anonymous caller stopped at gate");
            return Err(err);
        }
        next.run(ctx, req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_matrix() {
        let anon = Identity::Anonymous;
        let user = Identity::user("42");

        assert_eq!(AccessPolicy::Public.check(&anon), Ok(()));
        assert_eq!(AccessPolicy::RejectAnonymous.check(&anon), Err(ApiError::Unauthorized));
        assert_eq!(AccessPolicy::HideFromAnonymous.check(&anon), Err(ApiError::Hidden));

        for policy in [
            AccessPolicy::Public,
            AccessPolicy::RejectAnonymous,
            AccessPolicy::HideFromAnonymous,
        ] {
            assert_eq!(policy.check(&user), Ok(()));
        }
    }

    #[test]
    fn test_hidden_renders_as_not_found() {
        assert_eq!(ApiError::Hidden.status(), ApiError::NotFound.status());
        assert_ne!(ApiError::Hidden.status(), ApiError::Unauthorized.status());
    }

    #[test]
    fn test_public_has_no_gate() {
        assert!(AccessPolicy::Public.gate().is_none());
        assert!(AccessPolicy::HideFromAnonymous.gate().is_some());
    }
}
