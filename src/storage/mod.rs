//! Storage registry subsystem.
//!
//! # Data Flow
//! ```text
//! StorageConfig / embedder
//!     → destinations.rs (group default + per-resource overrides)
//!     → resource handlers resolve (group, resource) at assembly
//!     → health checks read the deduplicated backend list
//! ```

pub mod backend;
pub mod destinations;

pub use backend::{StaticStorage, Storage, StorageDecorator, StorageHandle};
pub use destinations::{GroupDestinations, StorageDestinations};
