//! Generic API server library.
//!
//! Storage registry, group/version installer with discovery, open and
//! trusted handler graphs, and the dual-listener runtime.

pub mod api;
pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod security;
pub mod storage;

pub use config::assembly::Config;
pub use config::schema::ServerOptions;
pub use http::GenericApiServer;
