//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! unstarted (assembly: install groups, add paths)
//!     → run()
//!         → secure loop spawned (notify.rs: READY=1, then retry forever)
//!         → insecure listener served on the calling task
//!     → serving
//!     → insecure listener fails → error returned → process exits
//! ```

pub mod notify;
pub mod startup;

pub use notify::notify_ready;
pub use startup::run;
