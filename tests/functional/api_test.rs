//! End-to-end tests of the HTTP surface with in-process backends

#[path = "../common/mod.rs"]
mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use common::{registry_with, MockBackend};
use imagegen_gateway::api::create_router;
use imagegen_gateway::config::Settings;
use imagegen_gateway::error::ErrorKind;
use imagegen_gateway::AppState;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn open_settings() -> Settings {
    let mut settings = Settings::default();
    settings.auth.enabled = false;
    settings.rate_limit.enabled = false;
    settings
}

fn app(backends: Vec<MockBackend>) -> (Router, Vec<Arc<MockBackend>>) {
    let (registry, handles) = registry_with(backends);
    let state = AppState::new(open_settings(), registry).unwrap();
    (create_router(Arc::new(state)), handles)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health_reports_backend_availability() {
    let (app, _) = app(vec![MockBackend::new("a"), MockBackend::new("b").disabled()]);

    let (status, body) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["backends"]["total"], 2);
    assert_eq!(body["backends"]["enabled"], 1);
    assert_eq!(body["backends"]["eligible"], 1);
}

#[tokio::test]
async fn test_generate_image_fails_over() {
    let (app, backends) = app(vec![
        MockBackend::new("a").priority(2).failing(ErrorKind::BackendError),
        MockBackend::new("b").priority(1),
    ]);

    let (status, body) = send(
        &app,
        "POST",
        "/v1/images/generations",
        Some(json!({"prompt": "a lighthouse at dusk", "size": "512x512"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["backend"], "b");
    assert_eq!(body["attempts"], 2);
    assert_eq!(body["data"][0]["url"], "https://img.test/b/0.png");
    assert_eq!(backends[0].submit_calls(), 1);
}

#[tokio::test]
async fn test_generate_image_rejects_bad_input() {
    let (app, backends) = app(vec![MockBackend::new("a")]);

    let (status, body) = send(
        &app,
        "POST",
        "/v1/images/generations",
        Some(json!({"prompt": "a cat", "size": "huge"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "invalid_request_error");

    let (status, _) = send(
        &app,
        "POST",
        "/v1/images/generations",
        Some(json!({"prompt": "a cat", "n": 0})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(backends[0].submit_calls(), 0);
}

#[tokio::test]
async fn test_exhausted_generation_lists_attempts() {
    let (app, _) = app(vec![
        MockBackend::new("a").priority(2).failing(ErrorKind::AuthError),
        MockBackend::new("b").priority(1).failing(ErrorKind::BackendError),
    ]);

    let (status, body) = send(
        &app,
        "POST",
        "/v1/images/generations",
        Some(json!({"prompt": "a cat"})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["type"], "generation_error");
    assert_eq!(body["error"]["code"], "backend_error");
    let attempts = body["error"]["attempts"].as_array().unwrap();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0]["backend"], "a");
    assert_eq!(attempts[0]["kind"], "auth_error");
}

#[tokio::test]
async fn test_no_available_backend_is_503() {
    let (app, backends) = app(vec![MockBackend::new("a").disabled()]);

    let (status, body) = send(
        &app,
        "POST",
        "/v1/images/generations",
        Some(json!({"prompt": "a cat"})),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "no_provider_available");
    assert_eq!(backends[0].submit_calls(), 0);
}

#[tokio::test]
async fn test_prompt_endpoint_parses_free_text() {
    let (app, _) = app(vec![MockBackend::new("a")]);

    let (status, body) = send(
        &app,
        "POST",
        "/v1/prompt",
        Some(json!({"text": "a red fox in snow, 2 images, landscape --no blurry"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["parsed"]["count"], 2);
    assert_eq!(body["parsed"]["negative_prompt"], "blurry");
    assert_eq!(body["backend"], "a");
}

#[tokio::test]
async fn test_backend_admin_endpoints() {
    let (app, backends) = app(vec![MockBackend::new("a").priority(2), MockBackend::new("b").priority(1)]);

    let (status, body) = send(&app, "GET", "/v1/backends", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["strategy"], "priority");
    assert_eq!(body["backends"][0]["id"], "a");
    assert_eq!(body["backends"][0]["circuit"], "closed");

    let (status, _) = send(&app, "POST", "/v1/backends/a/disable", None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(
        &app,
        "POST",
        "/v1/images/generations",
        Some(json!({"prompt": "a cat"})),
    )
    .await;
    assert_eq!(body["backend"], "b");
    assert_eq!(backends[0].submit_calls(), 0);

    let (_, body) = send(&app, "GET", "/v1/backends", None).await;
    assert_eq!(body["backends"][0]["success_rate"], Value::Null);
    assert_eq!(body["backends"][1]["success_rate"], 100.0);

    let (status, _) = send(&app, "POST", "/v1/backends/a/enable", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, "POST", "/v1/backends/zzz/enable", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "backend_not_found");
}

#[tokio::test]
async fn test_backend_probe() {
    let (app, backends) = app(vec![MockBackend::new("a"), MockBackend::new("b").failing(ErrorKind::Timeout)]);

    let (status, body) = send(&app, "POST", "/v1/backends/a/test", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["images"], 1);

    let (status, body) = send(&app, "POST", "/v1/backends/b/test", Some(json!({"prompt": "ping"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(backends[1].submit_calls(), 1);

    let (status, _) = send(&app, "POST", "/v1/backends/zzz/test", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stats_and_reset() {
    let (app, _) = app(vec![MockBackend::new("a")]);

    send(&app, "POST", "/v1/images/generations", Some(json!({"prompt": "a cat"}))).await;

    let (status, body) = send(&app, "GET", "/v1/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["summary"]["total_requests"], 1);
    assert_eq!(body["backends"][0]["successes"], 1);
    assert_eq!(body["queue"]["processed"], 1);

    let (status, _) = send(&app, "POST", "/v1/stats/reset", Some(json!({"backend": "zzz"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "POST", "/v1/stats/reset", None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&app, "GET", "/v1/stats", None).await;
    assert_eq!(body["summary"]["total_requests"], 0);
}

#[tokio::test]
async fn test_strategy_switch() {
    let (app, _) = app(vec![MockBackend::new("a"), MockBackend::new("b")]);

    let (status, _) = send(&app, "POST", "/v1/strategy", Some(json!({"strategy": "round_robin"}))).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&app, "GET", "/v1/backends", None).await;
    assert_eq!(body["strategy"], "round_robin");

    let (status, _) = send(&app, "POST", "/v1/strategy", Some(json!({"strategy": "cheapest"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
