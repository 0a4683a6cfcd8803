//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! GET /healthz/storage
//!     → StorageDestinations::backends() (sorted, deduplicated)
//!     → active.rs (probe each backend)
//!     → JSON report, 200 when all healthy, 503 otherwise
//! ```

pub mod active;

pub use active::{BackendHealth, StorageHealthChecker};
