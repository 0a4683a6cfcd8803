//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request (trusted listener only):
//!     → authenticator.rs (who is calling)
//!     → authorizer.rs (may they do this)
//!     → Pass to routing
//!     → admission.rs (mutating calls, right before the resource handler)
//! ```
//!
//! # Design Decisions
//! - Decision algorithms are collaborators behind traits
//! - Fail closed: reject on any security check failure
//! - The open listener never consults any of these

pub mod admission;
pub mod authenticator;
pub mod authorizer;
pub mod user;

pub use admission::{AdmissionAttributes, AdmissionChain, AdmissionControl, AdmissionError, AlwaysAdmit, Operation};
pub use authenticator::{AuthenticationError, Authenticator, TokenAuthenticator};
pub use authorizer::{AlwaysAllow, AlwaysDeny, Attributes, AuthorizationError, Authorizer};
pub use user::UserInfo;
