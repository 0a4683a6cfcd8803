//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerOptions (validated)
//!     → assembly.rs (Config: options + collaborators)
//!     → GenericApiServer::new
//!         → network.rs (cluster defaults, filled exactly once)
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation reports every problem at once, not just the first
//! - Config is immutable once the server is assembled; there is no reload

pub mod assembly;
pub mod loader;
pub mod network;
pub mod schema;
pub mod validation;

pub use assembly::Config;
pub use loader::{load_config, ConfigError};
pub use network::{ClusterInfo, NetworkError, PortRange};
pub use schema::{
    ApiConfig, ClusterConfig, FeatureConfig, HealthCheckConfig, ObservabilityConfig, ProxyTransportConfig,
    SecurityConfig, ServerOptions, ServingConfig, StorageConfig,
};
pub use validation::{validate_config, ValidationError};
