//! Startup orchestration.
//!
//! # Responsibilities
//! - Build both handler graphs and the shared serving stack
//! - Start the secure listener loop when a secure port is configured
//! - Serve the insecure listener on the calling task
//!
//! # Design Decisions
//! - The insecure listener failing or stopping is fatal; the caller exits
//! - The secure listener is never fatal; it retries on its own task

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::http::server::GenericApiServer;
use crate::net::listener::{self, SecureListener, ServeError, ServingStack};

/// Serve until the insecure listener fails.
pub async fn run(server: GenericApiServer) -> Result<Infallible, ServeError> {
    let serving = server.options().serving.clone();
    let stack = ServingStack::new(
        server.long_running_check(),
        Duration::from_secs(serving.request_timeout_secs),
        serving.max_requests_in_flight,
    );

    tracing::info!(
        open = ?server.chain().open_stages(),
        trusted = ?server.chain().trusted_stages(),
        max_requests_in_flight = serving.max_requests_in_flight,
        request_timeout_secs = serving.request_timeout_secs,
        "Starting listeners"
    );

    if serving.secure_port != 0 {
        let secure = SecureListener {
            addr: SocketAddr::new(serving.bind_address, serving.secure_port),
            tls: server.tls_settings(),
            retry: Duration::from_secs(serving.secure_retry_interval_secs),
            app: stack.wrap(server.handler()),
        };
        // Detached: the loop outlives every attempt and never returns.
        drop(secure.spawn());
    } else {
        tracing::info!("Secure port disabled");
    }

    let insecure_addr = SocketAddr::new(serving.insecure_bind_address, serving.insecure_port);
    let app = stack.wrap(server.insecure_handler());
    let mapper = Arc::clone(server.context_mapper());
    drop(server);

    let listener = listener::bind(insecure_addr).await?;
    let result = listener::serve_insecure(listener, app).await;
    tracing::error!(in_flight = mapper.len(), "Insecure listener exited");
    result
}
