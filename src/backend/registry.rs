//! Backend registry holding every adapter in registration order

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::backend::http_backend::HttpBackend;
use crate::backend::task_backend::TaskBackend;
use crate::backend::traits::{BackendDescriptor, ImageBackend};
use crate::config::{BackendConfig, BackendKind};
use crate::error::{AppError, Result};

/// Submit retry policy for network errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

/// An adapter plus the mutable enabled flag the registry owns for it
pub struct RegisteredBackend {
    backend: Arc<dyn ImageBackend>,
    descriptor: BackendDescriptor,
    enabled: AtomicBool,
    retry: RetryPolicy,
}

impl RegisteredBackend {
    pub fn new(backend: Arc<dyn ImageBackend>, retry: RetryPolicy) -> Self {
        let descriptor = backend.describe();
        let enabled = AtomicBool::new(descriptor.enabled);
        Self {
            backend,
            descriptor,
            enabled,
            retry,
        }
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn priority(&self) -> i32 {
        self.descriptor.priority
    }

    pub fn backend(&self) -> &Arc<dyn ImageBackend> {
        &self.backend
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Descriptor with the current enabled flag
    pub fn descriptor(&self) -> BackendDescriptor {
        BackendDescriptor {
            enabled: self.is_enabled(),
            ..self.descriptor.clone()
        }
    }
}

/// Registry for managing image generation backends
pub struct BackendRegistry {
    backends: RwLock<Vec<Arc<RegisteredBackend>>>,
}

impl BackendRegistry {
    /// Create a new empty backend registry
    pub fn new() -> Self {
        Self {
            backends: RwLock::new(Vec::new()),
        }
    }

    /// Initialize the registry from configuration. Disabled backends are
    /// registered too so they can be enabled at runtime.
    pub fn initialize_from_config(&self, configs: &[BackendConfig]) -> Result<()> {
        for config in configs {
            match Self::create_backend(config) {
                Ok(backend) => {
                    let retry = RetryPolicy {
                        max_retries: config.max_retries,
                        retry_delay: Duration::from_millis(config.retry_delay_ms),
                    };
                    self.register(backend, retry)?;
                    info!(
                        backend = %config.id,
                        kind = ?config.kind,
                        enabled = config.enabled,
                        "Registered backend"
                    );
                }
                Err(e) => {
                    warn!(backend = %config.id, error = %e, "Failed to create backend");
                }
            }
        }

        Ok(())
    }

    /// Create an adapter from configuration
    fn create_backend(config: &BackendConfig) -> Result<Arc<dyn ImageBackend>> {
        match config.kind {
            BackendKind::OpenaiCompatible => Ok(Arc::new(HttpBackend::new(config)?)),
            BackendKind::AsyncTask => Ok(Arc::new(TaskBackend::new(config)?)),
        }
    }

    /// Register an adapter
    pub fn register(&self, backend: Arc<dyn ImageBackend>, retry: RetryPolicy) -> Result<()> {
        let entry = Arc::new(RegisteredBackend::new(backend, retry));
        let mut backends = self.backends.write();

        if backends.iter().any(|b| b.id() == entry.id()) {
            return Err(AppError::InvalidRequest(format!(
                "Backend '{}' already exists",
                entry.id()
            )));
        }

        backends.push(entry);
        Ok(())
    }

    /// Remove a backend
    pub fn unregister(&self, id: &str) -> Result<()> {
        let mut backends = self.backends.write();
        let before = backends.len();
        backends.retain(|b| b.id() != id);

        if backends.len() == before {
            return Err(AppError::BackendNotFound(id.to_string()));
        }

        info!(backend = %id, "Removed backend");
        Ok(())
    }

    /// Get a backend by id
    pub fn get(&self, id: &str) -> Option<Arc<RegisteredBackend>> {
        self.backends.read().iter().find(|b| b.id() == id).cloned()
    }

    /// All backends in registration order
    pub fn get_all(&self) -> Vec<Arc<RegisteredBackend>> {
        self.backends.read().clone()
    }

    pub fn descriptors(&self) -> Vec<BackendDescriptor> {
        self.backends.read().iter().map(|b| b.descriptor()).collect()
    }

    pub fn enabled_ids(&self) -> Vec<String> {
        self.backends
            .read()
            .iter()
            .filter(|b| b.is_enabled())
            .map(|b| b.id().to_string())
            .collect()
    }

    /// Flip a backend's enabled flag, false if the id is unknown
    pub fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        match self.get(id) {
            Some(backend) => {
                backend.set_enabled(enabled);
                info!(backend = %id, enabled, "Backend enabled flag changed");
                true
            }
            None => false,
        }
    }

    /// Get the number of registered backends
    pub fn len(&self) -> usize {
        self.backends.read().len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.backends.read().is_empty()
    }

    /// Check if a backend exists
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
