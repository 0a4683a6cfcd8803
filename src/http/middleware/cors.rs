//! CORS filter.
//!
//! Adds CORS headers when the `Origin` header matches an allowed pattern.
//! Other origins pass through untouched; the browser enforces the absence
//! of headers.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use regex::Regex;

const ALLOWED_METHODS: &str = "POST, GET, OPTIONS, PUT, DELETE, PATCH";
const ALLOWED_HEADERS: &str = "Content-Type, Content-Length, Accept-Encoding, X-CSRF-Token, Authorization";

/// Compiled allowed-origin patterns.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    allowed: Arc<Vec<Regex>>,
}

impl CorsPolicy {
    /// `None` when no patterns are configured.
    pub fn compile(origins: &[String]) -> Result<Option<Self>, regex::Error> {
        if origins.is_empty() {
            return Ok(None);
        }
        let allowed = origins.iter().map(|o| Regex::new(o)).collect::<Result<Vec<_>, _>>()?;
        Ok(Some(Self {
            allowed: Arc::new(allowed),
        }))
    }

    pub fn allows(&self, origin: &str) -> bool {
        self.allowed.iter().any(|re| re.is_match(origin))
    }
}

pub async fn cors_middleware(State(policy): State<CorsPolicy>, request: Request, next: Next) -> Response {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .filter(|origin| policy.allows(origin))
        .and_then(|origin| HeaderValue::from_str(origin).ok());

    let Some(origin) = origin else {
        return next.run(request).await;
    };

    // Preflight never reaches the wrapped handler.
    let mut response = if request.method() == Method::OPTIONS {
        (StatusCode::NO_CONTENT, Body::empty()).into_response()
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOWED_METHODS));
    headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(ALLOWED_HEADERS));
    headers.insert(header::ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
    response
}
