//! Functional tests for API key authentication

use axum::{
    body::{to_bytes, Body},
    http::{header::AUTHORIZATION, Request, StatusCode},
    Router,
};
use imagegen_gateway::config::AuthConfig;
use imagegen_gateway::middleware::AuthLayer;
use tower::ServiceExt;

fn create_test_app(keys: &[&str]) -> Router {
    Router::new()
        .route("/health", axum::routing::get(|| async { "healthy" }))
        .route("/v1/images/generations", axum::routing::post(|| async { "OK" }))
        .layer(AuthLayer::new(keys.iter().map(|k| k.to_string()).collect()))
}

async fn status_of(app: &Router, request: Request<Body>) -> StatusCode {
    app.clone().oneshot(request).await.unwrap().status()
}

fn generate(header: Option<(&str, &str)>) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri("/v1/images/generations");
    if let Some((name, value)) = header {
        builder = builder.header(name, value);
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_auth_with_valid_bearer_token() {
    let app = create_test_app(&["valid-key-1", "valid-key-2"]);

    assert_eq!(
        status_of(&app, generate(Some((AUTHORIZATION.as_str(), "Bearer valid-key-1")))).await,
        StatusCode::OK
    );
    assert_eq!(
        status_of(&app, generate(Some((AUTHORIZATION.as_str(), "Bearer valid-key-2")))).await,
        StatusCode::OK
    );
}

#[tokio::test]
async fn test_auth_with_raw_authorization_value() {
    let app = create_test_app(&["valid-key-1"]);

    assert_eq!(
        status_of(&app, generate(Some((AUTHORIZATION.as_str(), "valid-key-1")))).await,
        StatusCode::OK
    );
}

#[tokio::test]
async fn test_auth_with_api_key_header() {
    let app = create_test_app(&["valid-key-1"]);

    assert_eq!(
        status_of(&app, generate(Some(("X-API-Key", "valid-key-1")))).await,
        StatusCode::OK
    );
    assert_eq!(
        status_of(&app, generate(Some(("X-API-Key", "nope")))).await,
        StatusCode::UNAUTHORIZED
    );
}

#[tokio::test]
async fn test_auth_with_invalid_key() {
    let app = create_test_app(&["valid-key-1"]);

    let response = app
        .oneshot(generate(Some((AUTHORIZATION.as_str(), "Bearer invalid-key"))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"]["type"], "authentication_error");
    assert_eq!(body["error"]["code"], "invalid_api_key");
}

#[tokio::test]
async fn test_auth_without_header() {
    let app = create_test_app(&["valid-key-1"]);

    assert_eq!(status_of(&app, generate(None)).await, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_auth_health_endpoint_bypass() {
    let app = create_test_app(&["valid-key-1"]);

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    assert_eq!(status_of(&app, request).await, StatusCode::OK);
}

#[tokio::test]
async fn test_auth_empty_keys_allows_all() {
    let app = create_test_app(&[]);

    assert_eq!(status_of(&app, generate(None)).await, StatusCode::OK);
}

#[test]
fn test_auth_layer_from_config() {
    let disabled = AuthConfig {
        enabled: false,
        api_keys: vec!["k".to_string()],
    };
    assert!(AuthLayer::from_config(&disabled).is_none());

    let enabled = AuthConfig {
        enabled: true,
        api_keys: vec!["k".to_string()],
    };
    assert!(AuthLayer::from_config(&enabled).is_some());
}
