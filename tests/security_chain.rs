//! Open versus trusted handler graphs.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use generic_apiserver::config::schema::TokenConfig;
use generic_apiserver::security::{AlwaysDeny, TokenAuthenticator};
use generic_apiserver::Config;
use tower::ServiceExt;

mod common;
use common::{apps_group, get, send, server, test_options, MemoryStorage};

fn token_config() -> Config {
    let mut options = test_options();
    options.security.supports_basic_auth = true;
    options.security.tokens.push(TokenConfig {
        token: "secret".into(),
        user: "alice".into(),
        uid: String::new(),
        groups: vec!["system:masters".into()],
    });
    Config::from_options(options)
}

fn authorized(path: &str) -> Request<Body> {
    Request::get(path)
        .header(header::AUTHORIZATION, "Bearer secret")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn trusted_graph_requires_credentials() {
    let mut server = server(token_config());
    server.install_api_groups(&[apps_group(MemoryStorage::new("Widget"))]).unwrap();

    let response = server
        .handler()
        .oneshot(Request::get("/apis/apps/v1/widgets").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Basic realm=\"kubernetes-master\"");

    let (status, _) = send(server.handler(), authorized("/apis/apps/v1/widgets")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn open_graph_skips_authentication_and_authorization() {
    let config = token_config().with_authorizer(Arc::new(AlwaysDeny));
    let mut server = server(config);
    server.install_api_groups(&[apps_group(MemoryStorage::new("Widget"))]).unwrap();

    let (status, _) = get(server.insecure_handler(), "/apis/apps/v1/widgets").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(server.handler(), authorized("/apis/apps/v1/widgets")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["reason"], "Forbidden");
    assert!(body["message"].as_str().unwrap().starts_with("User \"alice\" cannot list widgets"));
}

#[tokio::test]
async fn authenticated_user_reaches_the_resource_handler() {
    let mut server = server(token_config());
    server.install_api_groups(&[apps_group(MemoryStorage::new("Widget"))]).unwrap();

    let request = Request::post("/apis/apps/v1/widgets")
        .header(header::AUTHORIZATION, "Bearer secret")
        .body(Body::from(r#"{"metadata":{"name":"w1"}}"#))
        .unwrap();
    let (status, body) = send(server.handler(), request).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["metadata"]["annotations"]["createdBy"], "alice");
    assert_eq!(server.context_mapper().len(), 0);
}

#[tokio::test]
async fn authentication_is_omitted_without_an_authenticator() {
    let server = server(Config::new(test_options()));
    assert_eq!(server.chain().trusted_stages(), vec!["authorization", "context"]);

    let (status, body) = get(server.handler(), "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_null());
}

#[tokio::test]
async fn extra_paths_are_behind_the_trusted_chain() {
    let config = token_config().with_authenticator(Arc::new(TokenAuthenticator::default()));
    let mut server = server(config);
    server
        .handle_func_with_auth("/custom", || async { "custom" })
        .unwrap();

    let (status, _) = send(server.handler(), authorized("/custom")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let response = server
        .insecure_handler()
        .oneshot(Request::get("/custom").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn cors_preflight_is_answered_on_both_graphs() {
    let mut options = test_options();
    options.security.cors_allowed_origins = vec![r"^https://dash\.example\.com$".into()];
    let server = server(Config::from_options(options));
    assert_eq!(server.chain().open_stages(), vec!["cors", "context"]);

    for app in [server.handler(), server.insecure_handler()] {
        let response = app
            .oneshot(
                Request::options("/apis")
                    .header(header::ORIGIN, "https://dash.example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://dash.example.com"
        );
    }
}
