//! HTTP request handling subsystem.
//!
//! # Data Flow
//! ```text
//! Request (from net::listener serving stack)
//!     → chain.rs (open or trusted filter list)
//!         → middleware/ (cors, authz, authn, context binding)
//!     → server.rs (base router: installed groups, discovery, health, index)
//!     → api::installer (resource dispatch)
//! ```

pub mod chain;
pub mod context;
pub mod middleware;
pub mod request;
pub mod server;

pub use chain::{Filter, HandlerChain};
pub use context::{ContextGuard, RequestContext, RequestContextMapper};
pub use request::{RequestInfo, RequestInfoResolver};
pub use server::GenericApiServer;
