//! Metrics collection and exposition.
//!
//! # Metrics
//! - `apiserver_request_total` (counter): resource requests by verb, resource, code
//! - `apiserver_request_duration_seconds` (histogram): resource request latency
//! - `apiserver_requests_in_flight` (gauge): requests holding a gate slot
//! - `apiserver_rejected_requests_total` (counter): rejections by reason
//! - `apiserver_secure_listener_restarts_total` (counter): secure serve attempts that ended
//! - `apiserver_storage_backend_health` (gauge): 1=healthy, 0=unhealthy
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade and is a no-op until an
//!   exporter is installed
//! - The Prometheus exporter runs its own scrape listener

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter with a scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_request(verb: &str, resource: &str, code: u16, started: Instant) {
    let labels = [
        ("verb", verb.to_string()),
        ("resource", resource.to_string()),
        ("code", code.to_string()),
    ];
    counter!("apiserver_request_total", &labels).increment(1);
    histogram!("apiserver_request_duration_seconds", &labels[..2]).record(started.elapsed().as_secs_f64());
}

pub fn record_rejection(reason: &'static str) {
    counter!("apiserver_rejected_requests_total", "reason" => reason).increment(1);
}

pub fn in_flight_increment() {
    gauge!("apiserver_requests_in_flight").increment(1.0);
}

pub fn in_flight_decrement() {
    gauge!("apiserver_requests_in_flight").decrement(1.0);
}

pub fn record_secure_listener_restart() {
    counter!("apiserver_secure_listener_restarts_total").increment(1);
}

pub fn record_backend_health(backend: &str, healthy: bool) {
    gauge!("apiserver_storage_backend_health", "backend" => backend.to_string()).set(if healthy { 1.0 } else { 0.0 });
}
