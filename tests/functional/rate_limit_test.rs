//! Functional tests for rate limiting

use axum::{
    body::Body,
    http::{header::RETRY_AFTER, Request, StatusCode},
    Router,
};
use imagegen_gateway::config::RateLimitConfig;
use imagegen_gateway::middleware::RateLimitLayer;
use tower::ServiceExt;

fn create_test_app(rps: u32, burst: u32) -> Router {
    Router::new()
        .route("/health", axum::routing::get(|| async { "healthy" }))
        .route("/v1/stats", axum::routing::get(|| async { "OK" }))
        .layer(RateLimitLayer::new(rps, burst))
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_rate_limit_allows_within_limit() {
    let app = create_test_app(100, 100);

    let response = app.oneshot(get("/v1/stats")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_rate_limit_burst_capacity() {
    let app = create_test_app(1, 5);

    for _ in 0..5 {
        let response = app.clone().oneshot(get("/v1/stats")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_rate_limit_exceeded_sets_retry_after() {
    let app = create_test_app(1, 1);

    let response = app.clone().oneshot(get("/v1/stats")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.clone().oneshot(get("/v1/stats")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let retry_after: u64 = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap();
    assert!(retry_after >= 1);
}

#[tokio::test]
async fn test_rate_limit_health_bypass() {
    let app = create_test_app(1, 1);

    // Exhaust the bucket, then health must still answer
    app.clone().oneshot(get("/v1/stats")).await.unwrap();
    for _ in 0..3 {
        let response = app.clone().oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[test]
fn test_rate_limit_layer_from_config() {
    let disabled = RateLimitConfig {
        enabled: false,
        requests_per_second: 10,
        burst_size: 20,
    };
    assert!(RateLimitLayer::from_config(&disabled).is_none());

    let enabled = RateLimitConfig {
        enabled: true,
        ..disabled
    };
    assert!(RateLimitLayer::from_config(&enabled).is_some());
}
