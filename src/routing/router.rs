//! Route table and lookup.
//!
//! # Responsibilities
//! - Store compiled routes
//! - Look up the matching route for a method and path
//! - Return the matched route or an explicit routing error
//!
//! # Design Decisions
//! - Immutable after construction (shared without locks)
//! - O(n) scan over routes (acceptable for a static API table)
//! - Exact beats prefix; more literal text beats less; earlier beats later
//! - A path that matches but with the wrong method yields 405 plus the allowed set

use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::Arc;

use axum::http::Method;
use thiserror::Error;

use crate::http::response::ApiError;
use crate::pipeline::Handler;
use crate::routing::matcher::{normalize_path, MatchKind, PathParams, PathPattern, PatternError};
use crate::security::access_control::AccessPolicy;

/// Route definition as written in a table, before compilation.
pub struct Route {
    name: String,
    methods: Vec<Method>,
    pattern: String,
    kind: MatchKind,
    policy: AccessPolicy,
    handler: Arc<dyn Handler>,
}

impl Route {
    pub fn exact(
        name: impl Into<String>,
        methods: &[Method],
        pattern: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> Self {
        Self::new(name, methods, pattern, MatchKind::Exact, handler)
    }

    pub fn prefix(
        name: impl Into<String>,
        methods: &[Method],
        pattern: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> Self {
        Self::new(name, methods, pattern, MatchKind::Prefix, handler)
    }

    fn new(
        name: impl Into<String>,
        methods: &[Method],
        pattern: impl Into<String>,
        kind: MatchKind,
        handler: Arc<dyn Handler>,
    ) -> Self {
        Self {
            name: name.into(),
            methods: methods.to_vec(),
            pattern: pattern.into(),
            kind,
            policy: AccessPolicy::Public,
            handler,
        }
    }

    /// Attach an authorization policy.
    pub fn policy(mut self, policy: AccessPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// A compiled, immutable route.
pub struct RouteDescriptor {
    pub name: String,
    pub methods: Vec<Method>,
    pub pattern: PathPattern,
    pub kind: MatchKind,
    pub policy: AccessPolicy,
    pub handler: Arc<dyn Handler>,
}

impl std::fmt::Debug for RouteDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteDescriptor")
            .field("name", &self.name)
            .field("methods", &self.methods)
            .field("pattern", &self.pattern.as_str())
            .field("kind", &self.kind)
            .field("policy", &self.policy)
            .finish()
    }
}

/// Errors detected while building a table. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteTableError {
    #[error("route name {0:?} is used more than once")]
    DuplicateName(String),

    #[error("routes {first:?} and {second:?} both serve {method} {shape} exactly")]
    DuplicateExact {
        first: String,
        second: String,
        method: Method,
        shape: String,
    },

    #[error("route {0:?} has no methods")]
    NoMethods(String),

    #[error("route {route:?}: {source}")]
    Pattern {
        route: String,
        #[source]
        source: PatternError,
    },
}

/// Why a lookup produced no route.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    #[error("no route matches the path")]
    NoMatch,

    #[error("method not allowed")]
    MethodNotAllowed { allowed: Vec<Method> },
}

impl From<RoutingError> for ApiError {
    fn from(err: RoutingError) -> Self {
        match err {
            RoutingError::NoMatch => ApiError::NotFound,
            RoutingError::MethodNotAllowed { allowed } => ApiError::MethodNotAllowed { allowed },
        }
    }
}

/// A successful lookup.
#[derive(Debug)]
pub struct RouteMatch<'a> {
    pub route: &'a RouteDescriptor,
    pub params: PathParams,
    /// Path below a prefix route; empty for exact routes.
    pub remainder: String,
}

/// The static route table.
#[derive(Debug)]
pub struct RouteTable {
    routes: Vec<RouteDescriptor>,
    strict_slash: bool,
}

impl RouteTable {
    /// Compile and validate a table.
    pub fn new(routes: Vec<Route>, strict_slash: bool) -> Result<Self, RouteTableError> {
        let mut names = HashSet::new();
        let mut exact_owners: Vec<(Method, String, String)> = Vec::new();
        let mut compiled = Vec::with_capacity(routes.len());

        for route in routes {
            if !names.insert(route.name.clone()) {
                return Err(RouteTableError::DuplicateName(route.name));
            }
            if route.methods.is_empty() {
                return Err(RouteTableError::NoMethods(route.name));
            }

            let pattern =
                PathPattern::parse(&route.pattern).map_err(|source| RouteTableError::Pattern {
                    route: route.name.clone(),
                    source,
                })?;

            if route.kind == MatchKind::Exact {
                let shape = pattern.shape();
                for method in &route.methods {
                    if let Some((_, _, first)) = exact_owners
                        .iter()
                        .find(|(m, s, _)| m == method && *s == shape)
                    {
                        return Err(RouteTableError::DuplicateExact {
                            first: first.clone(),
                            second: route.name.clone(),
                            method: method.clone(),
                            shape,
                        });
                    }
                    exact_owners.push((method.clone(), shape.clone(), route.name.clone()));
                }
            }

            compiled.push(RouteDescriptor {
                name: route.name,
                methods: route.methods,
                pattern,
                kind: route.kind,
                policy: route.policy,
                handler: route.handler,
            });
        }

        Ok(Self {
            routes: compiled,
            strict_slash,
        })
    }

    pub fn routes(&self) -> &[RouteDescriptor] {
        &self.routes
    }

    pub fn get(&self, name: &str) -> Option<&RouteDescriptor> {
        self.routes.iter().find(|r| r.name == name)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Find the route for `method` and `path` (path relative to the mount prefix).
    pub fn lookup(&self, method: &Method, path: &str) -> Result<RouteMatch<'_>, RoutingError> {
        let path = normalize_path(path, self.strict_slash);

        let mut best: Option<((bool, usize, usize, Reverse<usize>), RouteMatch<'_>)> = None;
        let mut allowed: Vec<Method> = Vec::new();

        for (index, route) in self.routes.iter().enumerate() {
            let Some(found) = route.pattern.matches(path, route.kind) else {
                continue;
            };

            for m in &route.methods {
                if !allowed.contains(m) {
                    allowed.push(m.clone());
                }
            }
            if !route.methods.contains(method) {
                continue;
            }

            let is_exact = route.kind == MatchKind::Exact;
            let specificity = if is_exact {
                route.pattern.literal_segments()
            } else {
                route.pattern.literal_len()
            };
            let rank = (
                is_exact,
                specificity,
                route.pattern.segment_count(),
                Reverse(index),
            );

            if best.as_ref().map_or(true, |(current, _)| rank > *current) {
                best = Some((
                    rank,
                    RouteMatch {
                        route,
                        params: found.params,
                        remainder: found.remainder,
                    },
                ));
            }
        }

        match best {
            Some((_, matched)) => Ok(matched),
            None if allowed.is_empty() => Err(RoutingError::NoMatch),
            None => Err(RoutingError::MethodNotAllowed { allowed }),
        }
    }
}
