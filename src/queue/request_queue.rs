//! Bounded request queue in front of the provider manager

use futures::future::join_all;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{oneshot, Semaphore};
use tracing::{debug, info, warn};

use crate::backend::traits::{GenerationOutput, GenerationResult, NormalizedRequest};
use crate::config::QueueSettings;
use crate::error::{AppError, Result};
use crate::gateway::provider_manager::ProviderManager;

/// Request with its response channel
struct QueuedRequest {
    request: NormalizedRequest,
    response_tx: oneshot::Sender<GenerationResult>,
}

/// Configuration for the request queue
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of requests waiting for a worker
    pub max_queue_size: usize,
    /// Maximum number of orchestrations running at once
    pub max_concurrent: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::from(&QueueSettings::default())
    }
}

impl From<&QueueSettings> for QueueConfig {
    fn from(settings: &QueueSettings) -> Self {
        Self {
            max_queue_size: settings.max_queue_size.max(1),
            max_concurrent: settings.max_concurrent.max(1),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    in_flight: AtomicU64,
    processed: AtomicU64,
    abandoned: AtomicU64,
}

/// Request queue.
///
/// Requests are handed to a worker task that runs at most `max_concurrent`
/// orchestrations at a time. Dropping the future returned by
/// [`RequestQueue::submit`] abandons the request: its orchestration is
/// dropped as soon as the worker notices.
pub struct RequestQueue {
    request_tx: mpsc::Sender<QueuedRequest>,
    config: QueueConfig,
    counters: Arc<Counters>,
}

impl RequestQueue {
    /// Create the queue and spawn its worker. Must be called inside a Tokio runtime.
    pub fn new(manager: Arc<ProviderManager>, config: QueueConfig) -> Self {
        let (request_tx, request_rx) = mpsc::channel(config.max_queue_size);
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        let counters = Arc::new(Counters::default());

        tokio::spawn(Self::process_requests(request_rx, manager, semaphore, counters.clone()));

        Self {
            request_tx,
            config,
            counters,
        }
    }

    /// Queue one request and wait for its result
    pub async fn submit(&self, request: NormalizedRequest) -> Result<GenerationOutput> {
        let (response_tx, response_rx) = oneshot::channel();

        match self.request_tx.try_send(QueuedRequest { request, response_tx }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(max_queue_size = self.config.max_queue_size, "Request queue is full");
                return Err(AppError::QueueFull);
            }
            Err(TrySendError::Closed(_)) => {
                return Err(AppError::Internal("Request queue worker has stopped".to_string()));
            }
        }

        debug!(queued = self.queued(), "Request queued");

        match response_rx.await {
            Ok(result) => result.map_err(AppError::from),
            Err(_) => Err(AppError::Internal("Request processing was cancelled".to_string())),
        }
    }

    /// Run many requests through the queue. Results come back in input order.
    pub async fn batch_generate(&self, requests: Vec<NormalizedRequest>) -> Vec<Result<GenerationOutput>> {
        let total = requests.len();
        info!(total, "Starting batch generation");

        let results = join_all(requests.into_iter().map(|request| self.submit(request))).await;

        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        info!(total, succeeded, "Batch generation finished");
        results
    }

    async fn process_requests(
        mut request_rx: mpsc::Receiver<QueuedRequest>,
        manager: Arc<ProviderManager>,
        semaphore: Arc<Semaphore>,
        counters: Arc<Counters>,
    ) {
        while let Some(queued) = request_rx.recv().await {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    let _ = queued.response_tx.send(Err(crate::error::GenerationFailure::new(
                        crate::error::ErrorKind::BackendError,
                        "queue is shutting down",
                    )));
                    continue;
                }
            };

            let manager = manager.clone();
            let counters = counters.clone();

            tokio::spawn(async move {
                let _permit = permit;
                let QueuedRequest {
                    request,
                    mut response_tx,
                } = queued;

                counters.in_flight.fetch_add(1, Ordering::Relaxed);
                let result = tokio::select! {
                    result = manager.generate(&request) => Some(result),
                    _ = response_tx.closed() => None,
                };
                counters.in_flight.fetch_sub(1, Ordering::Relaxed);

                match result {
                    Some(result) => {
                        counters.processed.fetch_add(1, Ordering::Relaxed);
                        let _ = response_tx.send(result);
                    }
                    None => {
                        counters.abandoned.fetch_add(1, Ordering::Relaxed);
                        debug!("Caller went away, orchestration dropped");
                    }
                }
            });
        }
    }

    /// Requests waiting for a worker slot
    pub fn queued(&self) -> usize {
        self.config.max_queue_size - self.request_tx.capacity()
    }

    pub fn in_flight(&self) -> u64 {
        self.counters.in_flight.load(Ordering::Relaxed)
    }

    pub fn processed_count(&self) -> u64 {
        self.counters.processed.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            queued: self.queued(),
            in_flight: self.in_flight(),
            processed: self.processed_count(),
            abandoned: self.counters.abandoned.load(Ordering::Relaxed),
            max_queue_size: self.config.max_queue_size,
            max_concurrent: self.config.max_concurrent,
        }
    }
}

/// Queue statistics
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub queued: usize,
    pub in_flight: u64,
    pub processed: u64,
    pub abandoned: u64,
    pub max_queue_size: usize,
    pub max_concurrent: usize,
}
