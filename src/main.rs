//! Main entry point for the image generation gateway

use imagegen_gateway::{api, config::Settings, init_tracing, AppState};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    init_tracing(&settings.logging);
    settings.validate()?;

    info!(
        host = %settings.server.host,
        port = settings.server.port,
        backends = settings.backends.len(),
        strategy = ?settings.orchestrator.strategy,
        "Starting image generation gateway"
    );

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let state = Arc::new(AppState::from_settings(settings)?);

    for backend in state.manager.list_backends() {
        info!(
            backend = %backend.id,
            label = %backend.label,
            priority = backend.priority,
            enabled = backend.enabled,
            is_async = backend.capabilities.is_async,
            "Backend registered"
        );
    }

    let app = api::create_router(state);

    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
