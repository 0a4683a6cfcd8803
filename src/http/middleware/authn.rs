//! Authentication filter.
//!
//! Short-circuits with 401 before authorization or routing ever run. On
//! success the user is attached to the bound request context.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::api::status::ApiError;
use crate::http::context::{RequestContext, RequestContextMapper};
use crate::observability::metrics;
use crate::security::authenticator::Authenticator;

const BASIC_CHALLENGE: &str = "Basic realm=\"kubernetes-master\"";

#[derive(Clone)]
pub struct AuthnState {
    pub authenticator: Arc<dyn Authenticator>,
    pub mapper: Arc<RequestContextMapper>,
    /// Answer failures with a basic-auth challenge.
    pub supports_basic_auth: bool,
}

pub async fn authn_middleware(State(state): State<AuthnState>, request: Request, next: Next) -> Response {
    let (mut parts, body) = request.into_parts();

    let user = match state.authenticator.authenticate(&parts).await {
        Ok(Some(user)) => user,
        Ok(None) => return unauthorized(&state, parts.uri.path()),
        Err(error) => {
            tracing::warn!(path = %parts.uri.path(), error = %error, "Unable to authenticate the request");
            return unauthorized(&state, parts.uri.path());
        }
    };

    tracing::trace!(user = %user.name, path = %parts.uri.path(), "Request authenticated");
    let context = parts
        .extensions
        .remove::<RequestContext>()
        .unwrap_or_default()
        .with_user(user);
    state.mapper.update(&context);
    parts.extensions.insert(context);

    next.run(Request::from_parts(parts, body)).await
}

fn unauthorized(state: &AuthnState, path: &str) -> Response {
    tracing::debug!(path = %path, "Rejecting unauthenticated request");
    metrics::record_rejection("unauthorized");
    let mut response = ApiError::Unauthorized("Unauthorized".into()).into_response();
    if state.supports_basic_auth {
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static(BASIC_CHALLENGE));
    }
    response
}
