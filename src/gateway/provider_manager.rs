//! Provider manager: picks backends per request, fails over, records outcomes

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::backend::registry::{BackendRegistry, RegisteredBackend};
use crate::backend::traits::{
    BackendDescriptor, GenerationOutput, GenerationResult, ImageRef, NormalizedRequest, SubmitOutcome,
};
use crate::config::OrchestratorConfig;
use crate::error::{AttemptFailure, ErrorKind, GenerationFailure};
use crate::gateway::health_tracker::{CircuitState, HealthRecord, HealthTracker};
use crate::gateway::job_poller::{JobOutcome, JobPoller};
use crate::gateway::load_balancer::{LoadBalancer, SelectionStrategy};

type AttemptResult = std::result::Result<Vec<ImageRef>, (ErrorKind, String)>;

/// Failover behaviour
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    pub failover_enabled: bool,
    /// Ceiling across all candidates of one request
    pub request_timeout: Option<Duration>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            failover_enabled: true,
            request_timeout: None,
        }
    }
}

impl From<&OrchestratorConfig> for ManagerConfig {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            failover_enabled: config.failover_enabled,
            request_timeout: config.request_timeout(),
        }
    }
}

/// One backend as seen by the status surface
#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    #[serde(flatten)]
    pub descriptor: BackendDescriptor,
    pub circuit: CircuitState,
    /// Percentage of successful requests, `null` before any traffic
    pub success_rate: Option<f64>,
    pub health: HealthRecord,
}

/// Manager-wide totals
#[derive(Debug, Clone, Serialize)]
pub struct ManagerSummary {
    pub total_backends: usize,
    pub enabled_backends: Vec<String>,
    pub strategy: SelectionStrategy,
    pub failover_enabled: bool,
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub success_rate: Option<f64>,
}

/// Provider manager, the sole entry point into orchestration
pub struct ProviderManager {
    registry: Arc<BackendRegistry>,
    health: Arc<HealthTracker>,
    balancer: LoadBalancer,
    poller: JobPoller,
    config: ManagerConfig,
}

impl ProviderManager {
    pub fn new(
        registry: Arc<BackendRegistry>,
        health: Arc<HealthTracker>,
        strategy: SelectionStrategy,
        poller: JobPoller,
        config: ManagerConfig,
    ) -> Self {
        for backend in registry.get_all() {
            health.register(backend.id());
        }

        Self {
            registry,
            health,
            balancer: LoadBalancer::new(strategy),
            poller,
            config,
        }
    }

    /// Produce exactly one result for the request, trying candidates in
    /// strategy order until one succeeds or all have failed.
    ///
    /// Cancellation is by dropping the future: submission or polling stops at
    /// the next suspension point and no further backends are tried. Jobs
    /// already accepted remotely are not cancelled there.
    pub async fn generate(&self, request: &NormalizedRequest) -> GenerationResult {
        let request_id = Uuid::new_v4();
        let span = info_span!("generate", %request_id);
        self.orchestrate(request).instrument(span).await
    }

    async fn orchestrate(&self, request: &NormalizedRequest) -> GenerationResult {
        if let Some(preferred) = request.preferred_backend() {
            if !self.registry.contains(preferred) {
                return Err(GenerationFailure::new(
                    ErrorKind::InvalidRequest,
                    format!("unknown backend '{}'", preferred),
                ));
            }
        }

        let candidates = self.balancer.candidate_order(
            &self.registry.get_all(),
            &self.health,
            request.preferred_backend(),
        );

        if candidates.is_empty() {
            warn!("No enabled and eligible backend for request");
            return Err(GenerationFailure::new(
                ErrorKind::NoProviderAvailable,
                "no enabled and eligible backend available",
            ));
        }

        let ceiling = self.config.request_timeout.map(|limit| (Instant::now() + limit, limit));
        let mut failures: Vec<AttemptFailure> = Vec::new();

        for candidate in &candidates {
            let id = candidate.id();

            if let Some((at, limit)) = ceiling {
                if Instant::now() >= at {
                    return Err(Self::ceiling_exceeded(failures, limit));
                }
            }

            if !self.health.try_acquire(id) {
                debug!(backend = %id, "Half-open trial already in flight, skipping");
                continue;
            }

            let started = Instant::now();
            let mut ceiling_hit = false;
            let result = match ceiling {
                Some((at, _)) => match tokio::time::timeout_at(at, self.attempt(candidate, request)).await {
                    Ok(result) => result,
                    Err(_) => {
                        ceiling_hit = true;
                        Err((ErrorKind::Timeout, "request timeout exceeded".to_string()))
                    }
                },
                None => self.attempt(candidate, request).await,
            };
            let latency = started.elapsed();

            match result {
                Ok(images) => {
                    self.health.record_outcome(id, latency, None);
                    info!(
                        backend = %id,
                        images = images.len(),
                        latency_ms = latency.as_millis() as u64,
                        attempts = failures.len() + 1,
                        "Generation succeeded"
                    );
                    return Ok(GenerationOutput {
                        backend: id.to_string(),
                        images,
                        attempts: failures.len() as u32 + 1,
                    });
                }
                Err((kind, message)) => {
                    self.health.record_outcome(id, latency, Some((kind, &message)));
                    warn!(backend = %id, kind = %kind, error = %message, "Backend attempt failed");

                    failures.push(AttemptFailure {
                        backend: id.to_string(),
                        kind,
                        message: message.clone(),
                    });

                    if !kind.allows_failover() {
                        return Err(GenerationFailure {
                            kind,
                            message,
                            backend: Some(id.to_string()),
                            attempts: failures,
                        });
                    }

                    if let (true, Some((_, limit))) = (ceiling_hit, ceiling) {
                        return Err(Self::ceiling_exceeded(failures, limit));
                    }

                    if !self.config.failover_enabled {
                        break;
                    }
                }
            }
        }

        if failures.is_empty() {
            return Err(GenerationFailure::new(
                ErrorKind::NoProviderAvailable,
                "every eligible backend is busy with a recovery trial",
            ));
        }

        warn!(attempted = failures.len(), "All candidate backends failed");
        Err(GenerationFailure::exhausted(failures))
    }

    fn ceiling_exceeded(failures: Vec<AttemptFailure>, limit: Duration) -> GenerationFailure {
        let tried = failures.len();
        let mut failure = GenerationFailure::exhausted(failures);
        failure.kind = ErrorKind::Timeout;
        failure.message = format!(
            "request timeout of {}s exceeded after {} attempted backends",
            limit.as_secs_f64(),
            tried
        );
        failure
    }

    /// Run one backend to a terminal answer, polling if it is job-based
    async fn attempt(&self, candidate: &RegisteredBackend, request: &NormalizedRequest) -> AttemptResult {
        let backend = candidate.backend();
        let descriptor = candidate.descriptor();

        let warnings = descriptor.capabilities.validate(request);
        if !warnings.is_empty() {
            warn!(backend = %descriptor.id, warnings = %warnings.join("; "), "Request exceeds backend capabilities");
        }

        let retry = candidate.retry_policy();
        let mut retries = 0;
        let outcome = loop {
            match backend.submit(request).await {
                SubmitOutcome::Rejected(ErrorKind::NetworkError, message) if retries < retry.max_retries => {
                    retries += 1;
                    debug!(backend = %descriptor.id, retry = retries, error = %message, "Retrying submit");
                    tokio::time::sleep(retry.retry_delay * retries).await;
                }
                outcome => break outcome,
            }
        };

        let images = match outcome {
            SubmitOutcome::Completed(images) => images,
            SubmitOutcome::Rejected(kind, message) => return Err((kind, message)),
            SubmitOutcome::Accepted(handle) => {
                debug!(backend = %descriptor.id, job_id = %handle.job_id(), "Job accepted, polling");
                match self.poller.drive(backend.as_ref(), handle).await {
                    JobOutcome::Succeeded(images) => images,
                    JobOutcome::Failed(kind, message) => return Err((kind, message)),
                    JobOutcome::TimedOut { attempts } => {
                        return Err((
                            ErrorKind::Timeout,
                            format!("job did not complete after {} polls", attempts),
                        ))
                    }
                }
            }
        };

        if images.is_empty() {
            return Err((ErrorKind::BackendError, "backend returned no images".to_string()));
        }
        Ok(images)
    }

    /// Probe one backend directly, bypassing selection and the circuit breaker.
    /// The outcome is recorded like any other attempt.
    pub async fn test_backend(&self, id: &str, probe: &NormalizedRequest) -> GenerationResult {
        let Some(candidate) = self.registry.get(id) else {
            return Err(GenerationFailure::new(
                ErrorKind::InvalidRequest,
                format!("unknown backend '{}'", id),
            ));
        };

        info!(backend = %id, "Testing backend");
        let started = Instant::now();
        let result = self.attempt(&candidate, probe).await;
        let latency = started.elapsed();

        match result {
            Ok(images) => {
                self.health.record_outcome(id, latency, None);
                Ok(GenerationOutput {
                    backend: id.to_string(),
                    images,
                    attempts: 1,
                })
            }
            Err((kind, message)) => {
                self.health.record_outcome(id, latency, Some((kind, &message)));
                Err(GenerationFailure {
                    kind,
                    message: message.clone(),
                    backend: Some(id.to_string()),
                    attempts: vec![AttemptFailure {
                        backend: id.to_string(),
                        kind,
                        message,
                    }],
                })
            }
        }
    }

    /// Every registered backend in registration order
    pub fn list_backends(&self) -> Vec<BackendDescriptor> {
        self.registry.descriptors()
    }

    /// Health records in registration order
    pub fn health_snapshot(&self) -> Vec<HealthRecord> {
        self.registry
            .get_all()
            .iter()
            .map(|b| self.health.snapshot(b.id()))
            .collect()
    }

    pub fn backend_statuses(&self) -> Vec<BackendStatus> {
        self.registry
            .get_all()
            .iter()
            .map(|b| {
                let health = self.health.snapshot(b.id());
                BackendStatus {
                    descriptor: b.descriptor(),
                    circuit: self.health.circuit_state(b.id()),
                    success_rate: health.success_rate(),
                    health,
                }
            })
            .collect()
    }

    pub fn enable_backend(&self, id: &str) -> bool {
        self.registry.set_enabled(id, true)
    }

    pub fn disable_backend(&self, id: &str) -> bool {
        self.registry.set_enabled(id, false)
    }

    /// Admin reset of statistics, for one backend or all of them
    pub fn reset_stats(&self, id: Option<&str>) -> bool {
        match id {
            Some(id) => self.health.reset(id),
            None => {
                self.health.reset_all();
                true
            }
        }
    }

    pub fn set_strategy(&self, strategy: SelectionStrategy) {
        info!(strategy = ?strategy, "Selection strategy changed");
        self.balancer.set_strategy(strategy);
    }

    pub fn strategy(&self) -> SelectionStrategy {
        self.balancer.strategy()
    }

    pub fn summary(&self) -> ManagerSummary {
        let records = self.health_snapshot();
        let total_requests: u64 = records.iter().map(|r| r.total_requests).sum();
        let successes: u64 = records.iter().map(|r| r.successes).sum();
        let failures: u64 = records.iter().map(|r| r.failures).sum();

        ManagerSummary {
            total_backends: self.registry.len(),
            enabled_backends: self.registry.enabled_ids(),
            strategy: self.strategy(),
            failover_enabled: self.config.failover_enabled,
            total_requests,
            successes,
            failures,
            success_rate: if total_requests == 0 {
                None
            } else {
                Some(successes as f64 / total_requests as f64 * 100.0)
            },
        }
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }
}
