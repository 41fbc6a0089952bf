//! Queue module - bounded concurrency and batch generation

pub mod request_queue;

pub use request_queue::{QueueConfig, QueueStats, RequestQueue};
