//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::network::NetworkError;
use crate::config::schema::ServerOptions;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading and assembly.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),

    #[error("Invalid cluster network: {0}")]
    Network(#[from] NetworkError),

    #[error("Invalid CORS allowed origin, cors_allowed_origins was set to {origins:?}: {source}")]
    Cors {
        origins: Vec<String>,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid long-running request pattern: {0}")]
    LongRunning(#[source] regex::Error),

    #[error("Unable to build proxy transport: {0}")]
    ProxyTransport(String),
}

fn join(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// Load and validate options from a TOML file.
pub fn load_config(path: &Path) -> Result<ServerOptions, ConfigError> {
    let content = fs::read_to_string(path)?;
    let options: ServerOptions = toml::from_str(&content)?;

    validate_config(&options).map_err(ConfigError::Validation)?;

    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp(contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("apiserver-{}.toml", uuid::Uuid::new_v4()));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn loads_valid_file() {
        let path = write_temp("[serving]\ninsecure_port = 18080\n");
        let options = load_config(&path).unwrap();
        assert_eq!(options.serving.insecure_port, 18080);
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn reports_validation_failures() {
        let path = write_temp("[cluster]\nservice_cluster_ip_range = \"nonsense\"\n");
        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref errors) if errors.len() == 1));
        assert!(err.to_string().starts_with("Validation failed: cluster: invalid CIDR"));
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config(Path::new("/nonexistent/apiserver.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
