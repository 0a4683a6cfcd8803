//! Request filters.
//!
//! Graph filters (composed by `chain.rs`):
//! - `cors`: origin-matched CORS headers
//! - `authz`: request attributes → authorizer
//! - `authn`: credentials → user on the request context
//! - `context`: binds and releases the request context
//!
//! Serving filters (composed by `net::listener`):
//! - `inflight`: bounded concurrency gate
//! - `recover`: panic → 500 Status
//! - `timeout`: fixed per-request timeout with the long-running exemption

pub mod authn;
pub mod authz;
pub mod context;
pub mod cors;
pub mod inflight;
pub mod recover;
pub mod timeout;

pub use authn::{authn_middleware, AuthnState};
pub use authz::{authz_middleware, AuthzState};
pub use context::context_middleware;
pub use cors::{cors_middleware, CorsPolicy};
pub use inflight::{inflight_middleware, InFlightGate};
pub use recover::recovery_layer;
pub use timeout::{timeout_middleware, LongRunningCheck, TimeoutPolicy};
