//! HTTP request handlers

use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::info;

use crate::api::models::{
    BackendHealthSummary, BackendListResponse, GenerateImageRequest, GenerateImageResponse,
    HealthResponse, PromptRequest, PromptResponse, ResetStatsRequest, StatsResponse, StrategyRequest,
    SuccessResponse, TestBackendRequest, TestBackendResponse,
};
use crate::backend::traits::NormalizedRequest;
use crate::error::AppError;
use crate::AppState;

const PROBE_PROMPT: &str = "a small red cube on a plain white background";

/// Generate images from a structured request
pub async fn generate_image(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GenerateImageRequest>,
) -> Result<Json<GenerateImageResponse>, AppError> {
    info!(n = request.n, backend = ?request.backend, "Received image generation request");

    let request = request.into_normalized(&state.router)?;
    let output = state.request_queue.submit(request).await?;

    info!(backend = %output.backend, images = output.images.len(), "Image generation completed");
    Ok(Json(GenerateImageResponse::from_output(output)))
}

/// Generate images from free-form text
pub async fn generate_from_prompt(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PromptRequest>,
) -> Result<Json<PromptResponse>, AppError> {
    let parsed = state.router.parse(&request.text)?;
    info!(
        size = %parsed.size(),
        count = parsed.count(),
        backend = ?parsed.preferred_backend(),
        "Parsed prompt"
    );

    let output = state.request_queue.submit(parsed.clone()).await?;
    Ok(Json(PromptResponse {
        parsed,
        result: GenerateImageResponse::from_output(output),
    }))
}

/// List backends with their circuit state and counters
pub async fn list_backends(State(state): State<Arc<AppState>>) -> Json<BackendListResponse> {
    Json(BackendListResponse {
        strategy: state.manager.strategy(),
        backends: state.manager.backend_statuses(),
    })
}

pub async fn enable_backend(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    if !state.manager.enable_backend(&id) {
        return Err(AppError::BackendNotFound(id));
    }
    info!(backend = %id, "Backend enabled");

    Ok(Json(SuccessResponse {
        success: true,
        message: format!("Backend '{}' enabled", id),
    }))
}

pub async fn disable_backend(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    if !state.manager.disable_backend(&id) {
        return Err(AppError::BackendNotFound(id));
    }
    info!(backend = %id, "Backend disabled");

    Ok(Json(SuccessResponse {
        success: true,
        message: format!("Backend '{}' disabled", id),
    }))
}

/// Probe one backend directly with a small request
pub async fn test_backend(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<TestBackendRequest>>,
) -> Result<Json<TestBackendResponse>, AppError> {
    if !state.manager.registry().contains(&id) {
        return Err(AppError::BackendNotFound(id));
    }

    let prompt = body
        .and_then(|Json(b)| b.prompt)
        .unwrap_or_else(|| PROBE_PROMPT.to_string());
    let size = state.router.default_size();
    let probe = NormalizedRequest::builder(prompt)
        .size(size.width, size.height)
        .build()?;

    let started = Instant::now();
    let result = state.manager.test_backend(&id, &probe).await;
    let latency_ms = started.elapsed().as_millis() as u64;

    Ok(Json(match result {
        Ok(output) => TestBackendResponse {
            backend: id,
            success: true,
            latency_ms,
            error: None,
            images: output.images.len(),
        },
        Err(failure) => TestBackendResponse {
            backend: id,
            success: false,
            latency_ms,
            error: Some(failure.to_string()),
            images: 0,
        },
    }))
}

pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        summary: state.manager.summary(),
        backends: state.manager.health_snapshot(),
        queue: state.request_queue.stats(),
    })
}

pub async fn reset_stats(
    State(state): State<Arc<AppState>>,
    body: Option<Json<ResetStatsRequest>>,
) -> Result<Json<SuccessResponse>, AppError> {
    let backend = body.and_then(|Json(b)| b.backend);

    if !state.manager.reset_stats(backend.as_deref()) {
        return Err(AppError::BackendNotFound(backend.unwrap_or_default()));
    }
    info!(backend = ?backend, "Statistics reset");

    Ok(Json(SuccessResponse {
        success: true,
        message: match backend {
            Some(id) => format!("Statistics for '{}' reset", id),
            None => "All statistics reset".to_string(),
        },
    }))
}

pub async fn set_strategy(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StrategyRequest>,
) -> Result<Json<SuccessResponse>, AppError> {
    let strategy = request.parse()?;
    state.manager.set_strategy(strategy);

    Ok(Json(SuccessResponse {
        success: true,
        message: format!("Selection strategy set to {:?}", strategy),
    }))
}

/// Liveness plus a coarse view of backend availability
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let backends = state.manager.registry().get_all();
    let enabled: Vec<_> = backends.iter().filter(|b| b.is_enabled()).collect();
    let eligible = enabled
        .iter()
        .filter(|b| state.manager.health().is_eligible(b.id()))
        .count();

    Json(HealthResponse {
        status: if eligible > 0 { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        backends: BackendHealthSummary {
            total: backends.len(),
            enabled: enabled.len(),
            eligible,
        },
    })
}
