//! Per-backend health statistics and circuit breaker

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::HealthConfig;
use crate::error::ErrorKind;

/// Why the most recent failure happened
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureReason {
    pub kind: ErrorKind,
    pub message: String,
}

/// Rolling statistics for one backend
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthRecord {
    pub backend_id: String,
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    /// Exponentially weighted average of successful attempt latency
    pub avg_latency_ms: Option<f64>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_failure_reason: Option<FailureReason>,
}

impl HealthRecord {
    fn new(backend_id: &str) -> Self {
        Self {
            backend_id: backend_id.to_string(),
            total_requests: 0,
            successes: 0,
            failures: 0,
            consecutive_failures: 0,
            avg_latency_ms: None,
            last_success: None,
            last_failure: None,
            last_failure_reason: None,
        }
    }

    /// Percentage of successful requests, `None` before any traffic
    pub fn success_rate(&self) -> Option<f64> {
        if self.total_requests == 0 {
            None
        } else {
            Some(self.successes as f64 / self.total_requests as f64 * 100.0)
        }
    }
}

/// Circuit breaker position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    /// Cool-down elapsed; one trial request is allowed through
    HalfOpen,
}

struct Entry {
    record: HealthRecord,
    last_failure_at: Option<Instant>,
    trial_started_at: Option<Instant>,
}

impl Entry {
    fn new(backend_id: &str) -> Self {
        Self {
            record: HealthRecord::new(backend_id),
            last_failure_at: None,
            trial_started_at: None,
        }
    }
}

/// Health tracker.
///
/// Initialized empty at startup and never persisted. Each backend's entry is
/// only touched under its map shard lock, so concurrent outcomes for the same
/// backend are serialized and none are lost.
pub struct HealthTracker {
    entries: DashMap<String, Entry>,
    failure_threshold: u32,
    cooldown: Duration,
    latency_smoothing: f64,
    open_on_rate_limit: bool,
}

impl HealthTracker {
    pub fn new(config: &HealthConfig) -> Self {
        Self {
            entries: DashMap::new(),
            failure_threshold: config.failure_threshold.max(1),
            cooldown: config.cooldown(),
            latency_smoothing: config.latency_smoothing,
            open_on_rate_limit: config.open_on_rate_limit,
        }
    }

    /// Start tracking a backend so it shows up in snapshots before any traffic
    pub fn register(&self, backend_id: &str) {
        self.entries
            .entry(backend_id.to_string())
            .or_insert_with(|| Entry::new(backend_id));
    }

    /// Record the terminal outcome of one attempt. `failure` is `None` on success.
    pub fn record_outcome(&self, backend_id: &str, latency: Duration, failure: Option<(ErrorKind, &str)>) {
        let mut guard = self
            .entries
            .entry(backend_id.to_string())
            .or_insert_with(|| Entry::new(backend_id));
        let entry: &mut Entry = &mut guard;

        entry.trial_started_at = None;
        let record = &mut entry.record;
        record.total_requests += 1;

        match failure {
            None => {
                let was_open = record.consecutive_failures >= self.failure_threshold;
                record.successes += 1;
                record.consecutive_failures = 0;
                record.last_success = Some(Utc::now());

                let sample = latency.as_secs_f64() * 1000.0;
                record.avg_latency_ms = Some(match record.avg_latency_ms {
                    Some(avg) => self.latency_smoothing * sample + (1.0 - self.latency_smoothing) * avg,
                    None => sample,
                });

                if was_open {
                    info!(backend = %backend_id, "Circuit closed after successful trial");
                }
            }
            Some((kind, message)) => {
                record.failures += 1;
                record.consecutive_failures += 1;
                if kind == ErrorKind::RateLimited && self.open_on_rate_limit {
                    record.consecutive_failures = record.consecutive_failures.max(self.failure_threshold);
                }
                record.last_failure = Some(Utc::now());
                record.last_failure_reason = Some(FailureReason {
                    kind,
                    message: message.to_string(),
                });
                entry.last_failure_at = Some(Instant::now());

                let consecutive = entry.record.consecutive_failures;
                if consecutive >= self.failure_threshold {
                    warn!(
                        backend = %backend_id,
                        consecutive_failures = consecutive,
                        kind = %kind,
                        "Circuit open"
                    );
                }
            }
        }

        debug!(
            backend = %backend_id,
            total = entry.record.total_requests,
            consecutive_failures = entry.record.consecutive_failures,
            "Recorded outcome"
        );
    }

    fn state_of(&self, entry: &Entry, now: Instant) -> CircuitState {
        if entry.record.consecutive_failures < self.failure_threshold {
            return CircuitState::Closed;
        }
        match entry.last_failure_at {
            Some(at) if now.duration_since(at) < self.cooldown => CircuitState::Open,
            _ => CircuitState::HalfOpen,
        }
    }

    pub fn circuit_state(&self, backend_id: &str) -> CircuitState {
        self.entries
            .get(backend_id)
            .map(|entry| self.state_of(&entry, Instant::now()))
            .unwrap_or(CircuitState::Closed)
    }

    /// False while the circuit is open. Unknown backends are eligible.
    pub fn is_eligible(&self, backend_id: &str) -> bool {
        self.circuit_state(backend_id) != CircuitState::Open
    }

    /// Claim the right to send a request now. Always granted while closed;
    /// in half-open only one trial is in flight at a time. A trial whose
    /// outcome never arrives stops blocking after another cool-down.
    pub fn try_acquire(&self, backend_id: &str) -> bool {
        let Some(mut entry) = self.entries.get_mut(backend_id) else {
            return true;
        };

        let now = Instant::now();
        match self.state_of(&entry, now) {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                let trial = entry.trial_started_at;
                if matches!(trial, Some(started) if now.duration_since(started) < self.cooldown) {
                    return false;
                }
                entry.trial_started_at = Some(now);
                debug!(backend = %backend_id, "Admitting half-open trial");
                true
            }
        }
    }

    /// Read-only copy of one backend's statistics
    pub fn snapshot(&self, backend_id: &str) -> HealthRecord {
        self.entries
            .get(backend_id)
            .map(|entry| entry.record.clone())
            .unwrap_or_else(|| HealthRecord::new(backend_id))
    }

    /// Records for every tracked backend, sorted by id
    pub fn snapshot_all(&self) -> Vec<HealthRecord> {
        let mut records: Vec<HealthRecord> = self
            .entries
            .iter()
            .map(|entry| entry.record.clone())
            .collect();
        records.sort_by(|a, b| a.backend_id.cmp(&b.backend_id));
        records
    }

    /// Average latency used by the fastest-response strategy
    pub fn avg_latency_ms(&self, backend_id: &str) -> Option<f64> {
        self.entries.get(backend_id).and_then(|entry| entry.record.avg_latency_ms)
    }

    /// Admin reset of one backend
    pub fn reset(&self, backend_id: &str) -> bool {
        match self.entries.get_mut(backend_id) {
            Some(mut entry) => {
                *entry = Entry::new(backend_id);
                info!(backend = %backend_id, "Reset health statistics");
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        for mut entry in self.entries.iter_mut() {
            let id = entry.key().clone();
            *entry.value_mut() = Entry::new(&id);
        }
        info!("Reset health statistics for all backends");
    }
}
