//! Listener runtime.
//!
//! # Responsibilities
//! - Wrap a handler graph with the serving filters shared by both listeners
//! - Serve the insecure graph over plain TCP
//! - Keep the secure listener alive, rebuilding TLS on every attempt
//!
//! # Data Flow
//! ```text
//! request
//!     → request id → trace span → propagate id
//!     → in-flight gate (shared by both listeners)
//!     → panic recovery
//!     → timeout (long-running requests exempt)
//!     → handler graph
//! ```
//!
//! # Design Decisions
//! - The secure loop never gives up: failures and panics are logged, counted
//!   and retried after a fixed interval
//! - Readiness is signalled once, before the first secure attempt

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{middleware, Router};
use axum_server::tls_rustls::RustlsConfig;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::http::middleware::{
    inflight_middleware, recovery_layer, timeout_middleware, InFlightGate, LongRunningCheck, TimeoutPolicy,
};
use crate::lifecycle::notify;
use crate::net::tls::{TlsError, TlsSettings};
use crate::observability::metrics;

pub const X_REQUEST_ID: &str = "x-request-id";

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("unable to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),

    #[error("TLS setup failed: {0}")]
    Tls(#[from] TlsError),

    #[error("listener on {0} stopped")]
    Stopped(SocketAddr),
}

/// Filters applied around every handler graph, outside the chain.
#[derive(Clone)]
pub struct ServingStack {
    gate: InFlightGate,
    timeout: TimeoutPolicy,
}

impl ServingStack {
    /// `max_in_flight == 0` leaves the gate unbounded. A saturated gate rejects
    /// a request after it has waited `timeout`.
    pub fn new(check: Arc<LongRunningCheck>, timeout: Duration, max_in_flight: usize) -> Self {
        Self {
            gate: InFlightGate::new(max_in_flight, timeout, check.clone()),
            timeout: TimeoutPolicy { check, timeout },
        }
    }

    pub fn gate(&self) -> &InFlightGate {
        &self.gate
    }

    /// Layers run outermost last: the request id is set before anything else sees the request.
    pub fn wrap(&self, graph: Router) -> Router {
        graph
            .layer(middleware::from_fn_with_state(self.timeout.clone(), timeout_middleware))
            .layer(recovery_layer())
            .layer(middleware::from_fn_with_state(self.gate.clone(), inflight_middleware))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }
}

pub async fn bind(addr: SocketAddr) -> Result<TcpListener, ServeError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServeError::Bind { addr, source })
}

/// Serve plaintext until the listener fails. Returning at all is an error.
pub async fn serve_insecure(listener: TcpListener, app: Router) -> Result<Infallible, ServeError> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "Serving insecurely");
    axum::serve(listener, app).await?;
    Err(ServeError::Stopped(addr))
}

/// Serve TLS on an already bound listener.
pub async fn serve_secure(
    listener: std::net::TcpListener,
    tls: RustlsConfig,
    app: Router,
) -> Result<Infallible, ServeError> {
    listener.set_nonblocking(true)?;
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "Serving securely");
    axum_server::from_tcp_rustls(listener, tls)
        .serve(app.into_make_service())
        .await?;
    Err(ServeError::Stopped(addr))
}

/// The secure listener and its restart policy.
pub struct SecureListener {
    pub addr: SocketAddr,
    pub tls: TlsSettings,
    pub retry: Duration,
    pub app: Router,
}

impl SecureListener {
    /// Run the secure serve loop on its own task. The task never completes.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let SecureListener { addr, tls, retry, app } = self;

        match notify::notify_ready() {
            Ok(true) => tracing::debug!("Notified service manager of readiness"),
            Ok(false) => {}
            Err(e) => tracing::warn!(error = %e, "Unable to notify service manager"),
        }

        loop {
            let attempt = tokio::spawn(serve_tls_once(addr, tls.clone(), app.clone()));
            match attempt.await {
                Ok(Ok(never)) => match never {},
                Ok(Err(e)) => tracing::error!(address = %addr, error = %e, "Unable to serve securely"),
                Err(e) if e.is_panic() => tracing::error!(address = %addr, "Secure listener panicked"),
                Err(e) => tracing::error!(address = %addr, error = %e, "Secure listener task failed"),
            }
            metrics::record_secure_listener_restart();
            tokio::time::sleep(retry).await;
        }
    }
}

/// One secure attempt: TLS material is reloaded and the port bound afresh.
async fn serve_tls_once(addr: SocketAddr, tls: TlsSettings, app: Router) -> Result<Infallible, ServeError> {
    let config = tls.rustls_config()?;
    let listener = bind(addr)
        .await?
        .into_std()
        .map_err(|source| ServeError::Bind { addr, source })?;
    serve_secure(listener, config, app).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::DEFAULT_LONG_RUNNING_REQUEST_RE;
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::routing::get;
    use tower::ServiceExt;

    fn stack(timeout: Duration, max_in_flight: usize) -> ServingStack {
        let check = Arc::new(LongRunningCheck::new(DEFAULT_LONG_RUNNING_REQUEST_RE).unwrap());
        ServingStack::new(check, timeout, max_in_flight)
    }

    #[tokio::test]
    async fn request_id_is_set_and_echoed() {
        let app = stack(Duration::from_secs(5), 0).wrap(Router::new().route("/", get(|| async { "ok" })));
        let response = app
            .oneshot(axum::http::Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let id = response.headers()[X_REQUEST_ID].to_str().unwrap();
        assert!(uuid::Uuid::parse_str(id).is_ok());
    }

    #[tokio::test]
    async fn slow_handler_times_out_but_watch_does_not() {
        let slow = || async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            "done"
        };
        let app = stack(Duration::from_millis(50), 0)
            .wrap(Router::new().route("/slow", get(slow)).route("/api/v1/watch/pods", get(slow)));

        let response = app
            .clone()
            .oneshot(axum::http::Request::get("/slow").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);

        let response = app
            .oneshot(axum::http::Request::get("/api/v1/watch/pods").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn panics_are_recovered_inside_the_gate() {
        let stack = stack(Duration::from_secs(5), 1);
        let app = stack.wrap(Router::new().route("/", get(|| async { panic!("boom") as () })));
        let response = app
            .oneshot(axum::http::Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(stack.gate().available(), Some(1));
    }

    #[tokio::test]
    async fn occupied_port_is_a_bind_error() {
        let occupant = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = occupant.local_addr().unwrap();
        let dir = std::env::temp_dir().join(format!("apiserver-bind-{}", uuid::Uuid::new_v4()));
        let tls = TlsSettings {
            cert_file: None,
            key_file: None,
            client_ca_file: None,
            cert_directory: dir.clone(),
            host: "localhost".into(),
            alternate_ips: Vec::new(),
            alternate_dns: Vec::new(),
        };

        let result = serve_tls_once(addr, tls, Router::new()).await;
        assert!(matches!(result, Err(ServeError::Bind { addr: a, .. }) if a == addr));
        std::fs::remove_dir_all(dir).unwrap();
    }
}
