//! HTTP route definitions

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::api::handlers;
use crate::middleware::{AuthLayer, RateLimitLayer};
use crate::AppState;

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/images/generations", post(handlers::generate_image))
        .route("/prompt", post(handlers::generate_from_prompt))
        .route("/backends", get(handlers::list_backends))
        .route("/backends/:id/enable", post(handlers::enable_backend))
        .route("/backends/:id/disable", post(handlers::disable_backend))
        .route("/backends/:id/test", post(handlers::test_backend))
        .route("/strategy", post(handlers::set_strategy))
        .route("/stats", get(handlers::stats))
        .route("/stats/reset", post(handlers::reset_stats));

    let api_routes = match RateLimitLayer::from_config(&state.settings.rate_limit) {
        Some(layer) => api_routes.layer(layer),
        None => api_routes,
    };

    let api_routes = match AuthLayer::from_config(&state.settings.auth) {
        Some(layer) => api_routes.layer(layer),
        None => api_routes,
    };

    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/v1", api_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
