//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate network ranges, regular expressions and value ranges
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerOptions → Result<(), Vec<ValidationError>>
//! - Runs before options are accepted into the system

use regex::Regex;
use thiserror::Error;

use crate::config::network::NetworkError;
use crate::config::schema::ServerOptions;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("cluster: {0}")]
    Network(#[from] NetworkError),

    #[error("invalid CORS allowed origin {pattern:?}: {source}")]
    CorsOrigin {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid long-running request pattern: {0}")]
    LongRunningPattern(#[source] regex::Error),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("{0} must start with '/' and name at least one segment, got {1:?}")]
    Prefix(&'static str, String),

    #[error("api prefix and api group prefix must differ")]
    SamePrefix,
}

pub fn validate_config(options: &ServerOptions) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Err(e) = options.cluster.complete() {
        errors.push(ValidationError::Network(e));
    }

    for pattern in &options.security.cors_allowed_origins {
        if let Err(source) = Regex::new(pattern) {
            errors.push(ValidationError::CorsOrigin { pattern: pattern.clone(), source });
        }
    }

    if let Err(e) = Regex::new(&options.serving.long_running_request_re) {
        errors.push(ValidationError::LongRunningPattern(e));
    }

    if options.serving.request_timeout_secs == 0 {
        errors.push(ValidationError::Zero("serving.request_timeout_secs"));
    }
    if options.serving.secure_retry_interval_secs == 0 {
        errors.push(ValidationError::Zero("serving.secure_retry_interval_secs"));
    }
    if options.health_check.timeout_secs == 0 {
        errors.push(ValidationError::Zero("health_check.timeout_secs"));
    }

    for (name, prefix) in [
        ("api.api_prefix", &options.api.api_prefix),
        ("api.api_group_prefix", &options.api.api_group_prefix),
    ] {
        if !prefix.starts_with('/') || prefix.trim_matches('/').is_empty() {
            errors.push(ValidationError::Prefix(name, prefix.clone()));
        }
    }
    if options.api.api_prefix.trim_matches('/') == options.api.api_group_prefix.trim_matches('/') {
        errors.push(ValidationError::SamePrefix);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&ServerOptions::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut options = ServerOptions::default();
        options.cluster.service_cluster_ip_range = Some("10.0.0.0/33".into());
        options.security.cors_allowed_origins = vec!["(unclosed".into(), "^ok$".into()];
        options.serving.long_running_request_re = "[".into();
        options.serving.request_timeout_secs = 0;

        let errors = validate_config(&options).unwrap_err();
        assert_eq!(errors.len(), 4, "{errors:?}");
        assert!(matches!(errors[0], ValidationError::Network(NetworkError::InvalidCidr(..))));
        assert!(matches!(&errors[1], ValidationError::CorsOrigin { pattern, .. } if pattern == "(unclosed"));
        assert!(matches!(errors[2], ValidationError::LongRunningPattern(_)));
        assert!(matches!(errors[3], ValidationError::Zero("serving.request_timeout_secs")));
    }

    #[test]
    fn rejects_bad_prefixes() {
        let mut options = ServerOptions::default();
        options.api.api_prefix = "api".into();
        options.api.api_group_prefix = "/".into();
        let errors = validate_config(&options).unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}
