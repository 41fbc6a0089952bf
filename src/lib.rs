//! Image generation gateway
//!
//! Orchestrates a pool of text-to-image providers behind one interface:
//! per-request backend selection, failover, circuit-breaking health
//! tracking, and polling of job-based providers.

pub mod api;
pub mod backend;
pub mod config;
pub mod error;
pub mod gateway;
pub mod middleware;
pub mod queue;

pub use error::{AppError, Result};

use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use backend::registry::BackendRegistry;
use config::{LoggingConfig, Settings};
use gateway::{HealthTracker, JobPoller, ManagerConfig, PollSchedule, ProviderManager, RequestRouter};
use queue::{QueueConfig, RequestQueue};

/// Application state shared across all handlers
pub struct AppState {
    pub settings: Arc<Settings>,
    pub manager: Arc<ProviderManager>,
    pub router: Arc<RequestRouter>,
    pub request_queue: Arc<RequestQueue>,
}

impl AppState {
    /// Wire the orchestration core around an already populated registry.
    /// Spawns the queue worker, so it must run inside a Tokio runtime.
    pub fn new(settings: Settings, registry: Arc<BackendRegistry>) -> Result<Self> {
        let health = Arc::new(HealthTracker::new(&settings.health));
        let manager = Arc::new(ProviderManager::new(
            registry,
            health,
            settings.orchestrator.strategy,
            JobPoller::new(PollSchedule::from(&settings.poller)),
            ManagerConfig::from(&settings.orchestrator),
        ));
        let router = Arc::new(RequestRouter::new(settings.parser.clone(), &settings.backends)?);
        let request_queue = Arc::new(RequestQueue::new(manager.clone(), QueueConfig::from(&settings.queue)));

        Ok(Self {
            settings: Arc::new(settings),
            manager,
            router,
            request_queue,
        })
    }

    /// Build everything, including the backends, from configuration
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let registry = Arc::new(BackendRegistry::new());
        registry.initialize_from_config(&settings.backends)?;
        Self::new(settings, registry)
    }
}

/// Install the global tracing subscriber. `RUST_LOG` overrides the configured level.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let registry = tracing_subscriber::registry().with(filter);

    if config.format.eq_ignore_ascii_case("json") {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().pretty()).init();
    }
}
