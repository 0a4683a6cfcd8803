//! Per-request timeout with the long-running exemption.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::Uri;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use regex::Regex;

use crate::api::status::ApiError;
use crate::observability::metrics;

/// Recognizes requests that may legitimately run forever.
#[derive(Debug, Clone)]
pub struct LongRunningCheck {
    pattern: Regex,
}

impl LongRunningCheck {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    /// Path matches the pattern, or the first `watch` query value is `true`.
    pub fn is_long_running(&self, uri: &Uri) -> bool {
        if self.pattern.is_match(uri.path()) {
            return true;
        }
        uri.query().is_some_and(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .find(|(key, _)| key == "watch")
                .is_some_and(|(_, value)| value == "true")
        })
    }
}

#[derive(Debug, Clone)]
pub struct TimeoutPolicy {
    pub check: Arc<LongRunningCheck>,
    /// Fixed; any caller-supplied value is ignored.
    pub timeout: Duration,
}

pub async fn timeout_middleware(State(policy): State<TimeoutPolicy>, request: Request, next: Next) -> Response {
    if policy.check.is_long_running(request.uri()) {
        return next.run(request).await;
    }

    let path = request.uri().path().to_string();
    match tokio::time::timeout(policy.timeout, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            tracing::warn!(path = %path, timeout = ?policy.timeout, "Request timed out");
            metrics::record_rejection("timeout");
            ApiError::Timeout(format!(
                "the request did not complete within the allowed duration of {:?}",
                policy.timeout
            ))
            .into_response()
        }
    }
}
