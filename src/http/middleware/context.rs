//! Context-binding filter.
//!
//! Outermost layer of both handler graphs. Binds a fresh `RequestContext`
//! before anything else runs and releases it when the response is done,
//! including streamed bodies, which keep the context alive until the last
//! chunk is sent or the client goes away.

use std::sync::Arc;

use axum::body::{Body, HttpBody};
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use futures_util::StreamExt;

use crate::http::context::{ContextGuard, RequestContext, RequestContextMapper};

pub async fn context_middleware(
    State(mapper): State<Arc<RequestContextMapper>>,
    mut request: Request,
    next: Next,
) -> Response {
    let context = RequestContext::new();
    let guard = mapper.bind(context.clone());
    request.extensions_mut().insert(context);

    let response = next.run(request).await;
    hold_until_complete(response, guard)
}

fn hold_until_complete(response: Response, guard: ContextGuard) -> Response {
    if response.body().size_hint().exact().is_some() {
        return response;
    }

    let (parts, body) = response.into_parts();
    let stream = body.into_data_stream().map(move |chunk| {
        let _held = &guard;
        chunk
    });
    Response::from_parts(parts, Body::from_stream(stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{middleware, Extension, Router};
    use tower::ServiceExt;

    #[tokio::test]
    async fn context_is_visible_inside_and_released_after() {
        let mapper = Arc::new(RequestContextMapper::new());
        let seen = mapper.clone();
        let app = Router::new()
            .route(
                "/",
                get(move |Extension(ctx): Extension<RequestContext>| {
                    let seen = seen.clone();
                    async move {
                        assert!(seen.get(ctx.id()).is_some());
                        "ok"
                    }
                }),
            )
            .layer(middleware::from_fn_with_state(mapper.clone(), context_middleware));

        let response = app
            .oneshot(axum::http::Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(mapper.is_empty());
    }

    #[tokio::test]
    async fn streamed_body_holds_the_context() {
        let mapper = Arc::new(RequestContextMapper::new());
        let app = Router::new()
            .route(
                "/",
                get(|| async {
                    let chunks = futures_util::stream::iter(vec![Ok::<_, std::io::Error>("a"), Ok("b")]);
                    Body::from_stream(chunks)
                }),
            )
            .layer(middleware::from_fn_with_state(mapper.clone(), context_middleware));

        let response = app
            .oneshot(axum::http::Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(mapper.len(), 1);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"ab");
        assert!(mapper.is_empty());
    }
}
