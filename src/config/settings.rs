//! Application settings and configuration management

use crate::backend::traits::ImageSize;
use crate::error::{AppError, Result};
use crate::gateway::load_balancer::SelectionStrategy;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub parser: ParserConfig,
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Authentication configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub api_keys: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// Rate limiting configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_rps")]
    pub requests_per_second: u32,
    #[serde(default = "default_burst")]
    pub burst_size: u32,
}

fn default_rps() -> u32 {
    10
}

fn default_burst() -> u32 {
    20
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Backend selection and failover
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub strategy: SelectionStrategy,
    #[serde(default = "default_true")]
    pub failover_enabled: bool,
    /// Ceiling on total wall-clock time across all failover attempts. Off when unset.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            strategy: SelectionStrategy::default(),
            failover_enabled: true,
            request_timeout_secs: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

/// Circuit breaker and statistics
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthConfig {
    /// Consecutive failures that open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Weight of the newest sample in the latency average
    #[serde(default = "default_latency_smoothing")]
    pub latency_smoothing: f64,
    #[serde(default = "default_true")]
    pub open_on_rate_limit: bool,
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_cooldown_secs() -> u64 {
    60
}

fn default_latency_smoothing() -> f64 {
    0.3
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
            latency_smoothing: default_latency_smoothing(),
            open_on_rate_limit: true,
        }
    }
}

impl HealthConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Polling schedule for job-based backends
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollerConfig {
    #[serde(default = "default_short_interval_ms")]
    pub short_interval_ms: u64,
    #[serde(default = "default_short_attempts")]
    pub short_attempts: u32,
    #[serde(default = "default_long_interval_ms")]
    pub long_interval_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
}

fn default_short_interval_ms() -> u64 {
    5000
}

fn default_short_attempts() -> u32 {
    6
}

fn default_long_interval_ms() -> u64 {
    10000
}

fn default_max_attempts() -> u32 {
    12
}

fn default_deadline_secs() -> u64 {
    120
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            short_interval_ms: default_short_interval_ms(),
            short_attempts: default_short_attempts(),
            long_interval_ms: default_long_interval_ms(),
            max_attempts: default_max_attempts(),
            deadline_secs: default_deadline_secs(),
        }
    }
}

/// Request queue limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueSettings {
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_max_queue_size() -> usize {
    1000
}

fn default_max_concurrent() -> usize {
    3
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

/// Free-text request parsing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ParserConfig {
    #[serde(default = "default_size")]
    pub default_size: String,
    #[serde(default = "default_min_dimension")]
    pub min_dimension: u32,
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,
    #[serde(default = "default_max_count")]
    pub max_count: u32,
    /// Words that introduce the negative prompt
    #[serde(default = "default_negative_markers")]
    pub negative_markers: Vec<String>,
    #[serde(default)]
    pub default_backend: Option<String>,
    /// Extra `alias -> backend id` hints
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

fn default_size() -> String {
    "1024x1024".to_string()
}

fn default_min_dimension() -> u32 {
    256
}

fn default_max_dimension() -> u32 {
    2048
}

fn default_max_count() -> u32 {
    10
}

fn default_negative_markers() -> Vec<String> {
    ["--no", "不要", "避免"].iter().map(|s| s.to_string()).collect()
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            default_size: default_size(),
            min_dimension: default_min_dimension(),
            max_dimension: default_max_dimension(),
            max_count: default_max_count(),
            negative_markers: default_negative_markers(),
            default_backend: None,
            aliases: HashMap::new(),
        }
    }
}

/// Adapter implementations known at compile time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Synchronous OpenAI-style `/v1/images/generations`
    OpenaiCompatible,
    /// Submit-then-poll task API
    AsyncTask,
}

/// Backend configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    pub kind: BackendKind,
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
    /// Extra submit attempts on network errors
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub supported_sizes: Vec<String>,
    #[serde(default = "default_true")]
    pub supports_negative_prompt: bool,
    #[serde(default = "default_true")]
    pub supports_seed: bool,
    #[serde(default = "default_max_images")]
    pub max_images_per_request: u32,
    #[serde(default)]
    pub aliases: Vec<String>,
}

fn default_timeout() -> u64 {
    60000
}

fn default_retry_delay() -> u64 {
    1000
}

fn default_max_images() -> u32 {
    1
}

impl BackendConfig {
    pub fn label(&self) -> String {
        self.label.clone().unwrap_or_else(|| self.id.clone())
    }

    pub fn parsed_sizes(&self) -> Result<Vec<ImageSize>> {
        self.supported_sizes.iter().map(|s| s.parse()).collect()
    }
}

fn invalid(message: String) -> AppError {
    AppError::Config(config::ConfigError::Message(message))
}

impl Settings {
    /// Load settings from configuration files and environment variables
    pub fn load() -> Result<Self> {
        let path = std::env::var("IMAGEGEN_CONFIG").unwrap_or_else(|_| "config/default.toml".to_string());
        Self::load_from_path(path)
    }

    /// Load settings from a specific configuration file path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("auth.enabled", true)?
            .set_default("rate_limit.enabled", true)?
            .set_default("rate_limit.requests_per_second", 10)?
            .set_default("rate_limit.burst_size", 20)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")?
            .add_source(File::from(path.as_ref()).required(false))
            // Override with environment variables (IMAGEGEN__SECTION__KEY)
            .add_source(
                Environment::with_prefix("IMAGEGEN")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(invalid("Server port cannot be 0".to_string()));
        }

        if self.health.failure_threshold == 0 {
            return Err(invalid("health.failure_threshold must be at least 1".to_string()));
        }
        if !(self.health.latency_smoothing > 0.0 && self.health.latency_smoothing <= 1.0) {
            return Err(invalid("health.latency_smoothing must be in (0, 1]".to_string()));
        }

        if self.poller.max_attempts == 0 {
            return Err(invalid("poller.max_attempts must be at least 1".to_string()));
        }
        if self.poller.short_attempts > self.poller.max_attempts {
            return Err(invalid("poller.short_attempts cannot exceed poller.max_attempts".to_string()));
        }
        if self.poller.short_interval_ms == 0 || self.poller.long_interval_ms == 0 {
            return Err(invalid("poller intervals must be positive".to_string()));
        }

        if self.queue.max_concurrent == 0 || self.queue.max_queue_size == 0 {
            return Err(invalid("queue limits must be positive".to_string()));
        }

        self.parser.default_size.parse::<ImageSize>().map_err(|_| {
            invalid(format!("parser.default_size '{}' is not WIDTHxHEIGHT", self.parser.default_size))
        })?;

        let mut seen = HashSet::new();
        for backend in &self.backends {
            if backend.id.is_empty() {
                return Err(invalid("Backend id cannot be empty".to_string()));
            }
            if !seen.insert(backend.id.as_str()) {
                return Err(invalid(format!("Duplicate backend id '{}'", backend.id)));
            }
            if backend.endpoint.is_empty() {
                return Err(invalid(format!("Backend '{}' must have an endpoint", backend.id)));
            }
            backend.parsed_sizes().map_err(|e| {
                invalid(format!("Backend '{}' has an invalid supported size: {}", backend.id, e))
            })?;
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
            },
            auth: AuthConfig {
                enabled: true,
                api_keys: vec![],
            },
            rate_limit: RateLimitConfig {
                enabled: true,
                requests_per_second: default_rps(),
                burst_size: default_burst(),
            },
            logging: LoggingConfig {
                level: default_log_level(),
                format: default_log_format(),
            },
            orchestrator: OrchestratorConfig::default(),
            health: HealthConfig::default(),
            poller: PollerConfig::default(),
            queue: QueueSettings::default(),
            parser: ParserConfig::default(),
            backends: vec![],
        }
    }
}
