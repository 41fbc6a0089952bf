//! Gateway module - Health tracking, selection, polling, orchestration, and request parsing

pub mod health_tracker;
pub mod job_poller;
pub mod load_balancer;
pub mod provider_manager;
pub mod router;

pub use health_tracker::{CircuitState, HealthRecord, HealthTracker};
pub use job_poller::{JobOutcome, JobPoller, JobState, PollSchedule};
pub use load_balancer::{LoadBalancer, SelectionStrategy};
pub use provider_manager::{BackendStatus, ManagerConfig, ManagerSummary, ProviderManager};
pub use router::RequestRouter;
