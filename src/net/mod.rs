//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Insecure port
//!     → listener.rs (plain TCP, fatal on failure)
//!     → serving stack → open graph
//!
//! Secure port
//!     → tls.rs (certificate bootstrap, rustls config per attempt)
//!     → listener.rs (retry loop, never fatal)
//!     → serving stack → trusted graph
//!
//! Outbound
//!     → transport.rs (proxy client for cluster members)
//! ```

pub mod listener;
pub mod tls;
pub mod transport;

pub use listener::{SecureListener, ServeError, ServingStack};
pub use tls::{TlsError, TlsSettings};
pub use transport::build_proxy_transport;
