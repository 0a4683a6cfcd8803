//! Authorization filter.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::api::status::ApiError;
use crate::http::context::RequestContext;
use crate::http::request::RequestInfoResolver;
use crate::observability::metrics;
use crate::security::authorizer::Authorizer;

#[derive(Clone)]
pub struct AuthzState {
    pub authorizer: Arc<dyn Authorizer>,
    pub resolver: Arc<RequestInfoResolver>,
}

pub async fn authz_middleware(State(state): State<AuthzState>, request: Request, next: Next) -> Response {
    let info = state.resolver.resolve(request.method(), request.uri());
    let user = request
        .extensions()
        .get::<RequestContext>()
        .and_then(|ctx| ctx.user().cloned());
    let attributes = info.into_attributes(user);

    if let Err(error) = state.authorizer.authorize(&attributes) {
        let target = if attributes.is_resource_request {
            attributes.resource.as_str()
        } else {
            attributes.path.as_str()
        };
        tracing::debug!(
            user = %attributes.user_name(),
            verb = %attributes.verb,
            target = %target,
            error = %error,
            "Request forbidden"
        );
        metrics::record_rejection("forbidden");
        return ApiError::Forbidden(format!(
            "User {:?} cannot {} {}: {}",
            attributes.user_name(),
            attributes.verb,
            target,
            error
        ))
        .into_response();
    }

    next.run(request).await
}
