//! Candidate ordering with multiple selection strategies

use parking_lot::RwLock;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering as CmpOrdering;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::backend::registry::RegisteredBackend;
use crate::error::{AppError, Result};
use crate::gateway::health_tracker::HealthTracker;

/// Backend selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Process-wide rotation, each request starts one position further
    RoundRobin,
    /// Uniform shuffle of the eligible backends
    Random,
    /// Descending priority rank, ties in registration order
    #[default]
    Priority,
    /// Ascending average latency
    #[serde(alias = "fastest")]
    FastestResponse,
}

impl FromStr for SelectionStrategy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "round_robin" | "roundrobin" => Ok(Self::RoundRobin),
            "random" => Ok(Self::Random),
            "priority" => Ok(Self::Priority),
            "fastest" | "fastest_response" => Ok(Self::FastestResponse),
            other => Err(AppError::InvalidRequest(format!("unknown strategy '{}'", other))),
        }
    }
}

/// Orders candidate backends for one request
pub struct LoadBalancer {
    strategy: RwLock<SelectionStrategy>,
    round_robin_index: AtomicUsize,
}

impl LoadBalancer {
    pub fn new(strategy: SelectionStrategy) -> Self {
        Self {
            strategy: RwLock::new(strategy),
            round_robin_index: AtomicUsize::new(0),
        }
    }

    /// Set the selection strategy
    pub fn set_strategy(&self, strategy: SelectionStrategy) {
        *self.strategy.write() = strategy;
    }

    /// Get the current selection strategy
    pub fn strategy(&self) -> SelectionStrategy {
        *self.strategy.read()
    }

    /// Candidate order for one request: strategy order over the enabled
    /// backends, filtered to eligible ones, with the preferred backend
    /// moved to the front when it survives the filter.
    ///
    /// Under round-robin the rotation cursor advances exactly once per call.
    pub fn candidate_order(
        &self,
        backends: &[Arc<RegisteredBackend>],
        health: &HealthTracker,
        preferred: Option<&str>,
    ) -> Vec<Arc<RegisteredBackend>> {
        let strategy = self.strategy();
        let mut ordered: Vec<Arc<RegisteredBackend>> =
            backends.iter().filter(|b| b.is_enabled()).cloned().collect();

        match strategy {
            SelectionStrategy::RoundRobin => {
                let index = self.round_robin_index.fetch_add(1, Ordering::Relaxed);
                if !ordered.is_empty() {
                    let start = index % ordered.len();
                    ordered.rotate_left(start);
                }
            }
            SelectionStrategy::Random => {
                ordered.shuffle(&mut rand::thread_rng());
            }
            SelectionStrategy::Priority => {
                // stable sort keeps registration order among equal ranks
                ordered.sort_by(|a, b| b.priority().cmp(&a.priority()));
            }
            SelectionStrategy::FastestResponse => {
                // unmeasured backends go first so they get a latency sample
                let latency = |b: &Arc<RegisteredBackend>| health.avg_latency_ms(b.id()).unwrap_or(0.0);
                ordered.sort_by(|a, b| {
                    latency(a)
                        .partial_cmp(&latency(b))
                        .unwrap_or(CmpOrdering::Equal)
                });
            }
        }

        ordered.retain(|b| health.is_eligible(b.id()));

        if let Some(name) = preferred {
            if let Some(pos) = ordered.iter().position(|b| b.id() == name) {
                let chosen = ordered.remove(pos);
                ordered.insert(0, chosen);
            } else {
                debug!(backend = %name, "Preferred backend not eligible, using strategy order");
            }
        }

        debug!(
            strategy = ?strategy,
            candidates = ?ordered.iter().map(|b| b.id()).collect::<Vec<_>>(),
            "Built candidate order"
        );

        ordered
    }
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new(SelectionStrategy::default())
    }
}
