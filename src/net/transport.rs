//! Outbound transport used when proxying to cluster members.

use std::fs;
use std::time::Duration;

use crate::config::loader::ConfigError;
use crate::config::schema::ProxyTransportConfig;

/// Build the shared proxy client from its TLS dial options.
pub fn build_proxy_transport(config: &ProxyTransportConfig) -> Result<reqwest::Client, ConfigError> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(config.dial_timeout_secs))
        .danger_accept_invalid_certs(config.insecure_skip_tls_verify);

    if let Some(ca_file) = &config.ca_file {
        let pem = fs::read(ca_file)?;
        let ca = reqwest::Certificate::from_pem(&pem).map_err(|e| ConfigError::ProxyTransport(e.to_string()))?;
        builder = builder.add_root_certificate(ca);
    }

    if config.insecure_skip_tls_verify {
        tracing::warn!("Proxy transport skips TLS verification");
    }

    builder.build().map_err(|e| ConfigError::ProxyTransport(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_ca_file_is_an_error() {
        let config = ProxyTransportConfig {
            ca_file: Some("/nonexistent/ca.pem".into()),
            ..Default::default()
        };
        assert!(matches!(build_proxy_transport(&config), Err(ConfigError::Io(_))));
    }

    #[test]
    fn defaults_build() {
        assert!(build_proxy_transport(&ProxyTransportConfig::default()).is_ok());
    }
}
