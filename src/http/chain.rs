//! Middleware chain builder.
//!
//! # Responsibilities
//! - Hold the ordered filter lists of the open and trusted handler graphs
//! - Wrap a base router with each list, innermost filter first
//!
//! # Data Flow
//! ```text
//! open:    base → cors? → context
//! trusted: base → cors? → authz → authn? → context
//! ```
//! Each arrow wraps the left side; at request time the rightmost filter runs first.
//!
//! # Design Decisions
//! - The order is data, not nested closures, so it can be asserted directly
//! - The open graph never contains authn or authz; it belongs on a trusted network only

use std::sync::Arc;

use axum::{middleware, Router};

use crate::http::context::RequestContextMapper;
use crate::http::middleware::{
    authn_middleware, authz_middleware, context_middleware, cors_middleware, AuthnState, AuthzState, CorsPolicy,
};

/// One graph-level filter.
#[derive(Clone)]
pub enum Filter {
    Cors(CorsPolicy),
    Authorization(AuthzState),
    Authentication(AuthnState),
    ContextBinding(Arc<RequestContextMapper>),
}

impl Filter {
    pub fn name(&self) -> &'static str {
        match self {
            Filter::Cors(_) => "cors",
            Filter::Authorization(_) => "authorization",
            Filter::Authentication(_) => "authentication",
            Filter::ContextBinding(_) => "context",
        }
    }

    /// Wrap `inner` with this filter.
    pub fn apply(&self, inner: Router) -> Router {
        match self.clone() {
            Filter::Cors(policy) => inner.layer(middleware::from_fn_with_state(policy, cors_middleware)),
            Filter::Authorization(state) => inner.layer(middleware::from_fn_with_state(state, authz_middleware)),
            Filter::Authentication(state) => inner.layer(middleware::from_fn_with_state(state, authn_middleware)),
            Filter::ContextBinding(mapper) => inner.layer(middleware::from_fn_with_state(mapper, context_middleware)),
        }
    }
}

/// The two filter lists, innermost first.
#[derive(Clone)]
pub struct HandlerChain {
    open: Vec<Filter>,
    trusted: Vec<Filter>,
}

impl HandlerChain {
    pub fn new(
        cors: Option<CorsPolicy>,
        authz: AuthzState,
        authn: Option<AuthnState>,
        mapper: Arc<RequestContextMapper>,
    ) -> Self {
        let mut open = Vec::new();
        if let Some(policy) = cors {
            open.push(Filter::Cors(policy));
        }

        let mut trusted = open.clone();
        trusted.push(Filter::Authorization(authz));
        if let Some(authn) = authn {
            trusted.push(Filter::Authentication(authn));
        }

        open.push(Filter::ContextBinding(mapper.clone()));
        trusted.push(Filter::ContextBinding(mapper));

        Self { open, trusted }
    }

    pub fn open_stages(&self) -> Vec<&'static str> {
        self.open.iter().map(Filter::name).collect()
    }

    pub fn trusted_stages(&self) -> Vec<&'static str> {
        self.trusted.iter().map(Filter::name).collect()
    }

    /// Graph for the plaintext listener: no authentication, no authorization.
    pub fn build_open(&self, base: Router) -> Router {
        wrap(&self.open, base)
    }

    /// Graph for the TLS listener.
    pub fn build_trusted(&self, base: Router) -> Router {
        wrap(&self.trusted, base)
    }
}

fn wrap(filters: &[Filter], base: Router) -> Router {
    filters.iter().fold(base, |router, filter| filter.apply(router))
}
