//! Bounded in-flight request gate.
//!
//! Long-running requests bypass the gate so open streams cannot starve it.
//! A waiting request gives up after `wait` and is told to retry.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::api::status::ApiError;
use crate::http::middleware::timeout::LongRunningCheck;
use crate::observability::metrics;

#[derive(Debug, Clone)]
pub struct InFlightGate {
    /// `None` means unbounded.
    permits: Option<Arc<Semaphore>>,
    wait: Duration,
    check: Arc<LongRunningCheck>,
}

impl InFlightGate {
    /// `capacity == 0` disables the gate.
    pub fn new(capacity: usize, wait: Duration, check: Arc<LongRunningCheck>) -> Self {
        Self {
            permits: (capacity > 0).then(|| Arc::new(Semaphore::new(capacity))),
            wait,
            check,
        }
    }

    /// Free slots, or `None` when unbounded.
    pub fn available(&self) -> Option<usize> {
        self.permits.as_ref().map(|s| s.available_permits())
    }
}

/// A held slot. Releases on drop, including when the client disconnects.
struct Slot {
    _permit: OwnedSemaphorePermit,
}

impl Slot {
    fn new(permit: OwnedSemaphorePermit) -> Self {
        metrics::in_flight_increment();
        Self { _permit: permit }
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        metrics::in_flight_decrement();
    }
}

pub async fn inflight_middleware(State(gate): State<InFlightGate>, request: Request, next: Next) -> Response {
    let Some(permits) = gate.permits.as_ref() else {
        return next.run(request).await;
    };
    if gate.check.is_long_running(request.uri()) {
        return next.run(request).await;
    }

    let permit = match tokio::time::timeout(gate.wait, permits.clone().acquire_owned()).await {
        Ok(Ok(permit)) => permit,
        Ok(Err(_)) => {
            return ApiError::ServiceUnavailable("request gate is closed".into()).into_response();
        }
        Err(_) => {
            tracing::warn!(path = %request.uri().path(), "Too many requests in flight");
            metrics::record_rejection("too_many_requests");
            return ApiError::TooManyRequests("Too many requests, please try again later.".into()).into_response();
        }
    };

    let _slot = Slot::new(permit);
    next.run(request).await
}
