//! Storage backend probing.
//!
//! # Responsibilities
//! - Probe every backend address the storage registry knows about
//! - Report per-backend results and record the health gauge

use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use serde::Serialize;
use tokio::time;
use url::Url;

use crate::config::schema::HealthCheckConfig;
use crate::observability::metrics;

/// Result of probing one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendHealth {
    pub address: String,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct StorageHealthChecker {
    config: HealthCheckConfig,
    client: Client<HttpConnector, Body>,
}

impl StorageHealthChecker {
    pub fn new(config: HealthCheckConfig) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { config, client }
    }

    /// Probe all addresses concurrently, preserving input order.
    pub async fn check_all(&self, addresses: &[String]) -> Vec<BackendHealth> {
        let probes = addresses.iter().map(|address| self.check(address));
        futures_util::future::join_all(probes).await
    }

    pub async fn check(&self, address: &str) -> BackendHealth {
        let result = self.probe(address).await;
        let healthy = result.is_ok();
        metrics::record_backend_health(address, healthy);
        BackendHealth {
            address: address.to_string(),
            healthy,
            error: result.err(),
        }
    }

    async fn probe(&self, address: &str) -> Result<(), String> {
        let url = Url::parse(address)
            .and_then(|base| base.join(&self.config.path))
            .map_err(|e| format!("invalid backend address: {e}"))?;

        let request = Request::builder()
            .method("GET")
            .uri(url.as_str())
            .header("user-agent", "apiserver-storage-health-check")
            .body(Body::empty())
            .map_err(|e| format!("failed to build health check request: {e}"))?;

        let timeout = Duration::from_secs(self.config.timeout_secs);
        match time::timeout(timeout, self.client.request(request)).await {
            Ok(Ok(response)) if response.status().is_success() => Ok(()),
            Ok(Ok(response)) => {
                tracing::warn!(backend = %address, status = %response.status(), "Storage health check failed: non-success status");
                Err(format!("unexpected status {}", response.status()))
            }
            Ok(Err(e)) => {
                tracing::warn!(backend = %address, error = %e, "Storage health check failed: connection error");
                Err(e.to_string())
            }
            Err(_) => {
                tracing::warn!(backend = %address, "Storage health check failed: timeout");
                Err("timeout".to_string())
            }
        }
    }
}
