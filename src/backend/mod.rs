//! Backend module - Capability interface, HTTP adapters, and registry

pub mod http_backend;
pub mod registry;
pub mod task_backend;
pub mod traits;

pub use registry::{BackendRegistry, RegisteredBackend, RetryPolicy};
pub use traits::{
    BackendCapabilities, BackendDescriptor, GenerationOutput, GenerationResult, ImageBackend, ImageRef,
    ImageSize, JobHandle, NormalizedRequest, PollOutcome, Quality, SubmitOutcome,
};
