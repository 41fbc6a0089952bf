//! Capability interface and shared types for image generation backends

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::time::Instant;

use crate::error::{AppError, ErrorKind, GenerationFailure, Result};

/// Requested rendering quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Draft,
    #[default]
    Standard,
    High,
}

impl FromStr for Quality {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "draft" | "fast" => Ok(Self::Draft),
            "standard" | "normal" => Ok(Self::Standard),
            "high" | "hd" | "hq" => Ok(Self::High),
            other => Err(AppError::InvalidRequest(format!("unknown quality '{}'", other))),
        }
    }
}

/// Image dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for ImageSize {
    type Err = AppError;

    /// Accepts `1024x1024`, `1024×1024` and `1024*1024`
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (w, h) = s
            .split_once(|c| c == 'x' || c == 'X' || c == '×' || c == '*')
            .ok_or_else(|| AppError::InvalidRequest(format!("invalid size '{}'", s)))?;

        let width = w
            .trim()
            .parse()
            .map_err(|_| AppError::InvalidRequest(format!("invalid width in '{}'", s)))?;
        let height = h
            .trim()
            .parse()
            .map_err(|_| AppError::InvalidRequest(format!("invalid height in '{}'", s)))?;

        Ok(Self { width, height })
    }
}

/// A fully parsed, validated generation request. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedRequest {
    prompt: String,
    negative_prompt: Option<String>,
    size: ImageSize,
    style: Option<String>,
    count: u32,
    quality: Quality,
    seed: Option<u64>,
    preferred_backend: Option<String>,
}

impl NormalizedRequest {
    pub fn builder(prompt: impl Into<String>) -> RequestBuilder {
        RequestBuilder {
            prompt: prompt.into(),
            negative_prompt: None,
            size: ImageSize::new(1024, 1024),
            style: None,
            count: 1,
            quality: Quality::default(),
            seed: None,
            preferred_backend: None,
        }
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn negative_prompt(&self) -> Option<&str> {
        self.negative_prompt.as_deref()
    }

    pub fn size(&self) -> ImageSize {
        self.size
    }

    pub fn width(&self) -> u32 {
        self.size.width
    }

    pub fn height(&self) -> u32 {
        self.size.height
    }

    pub fn style(&self) -> Option<&str> {
        self.style.as_deref()
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn quality(&self) -> Quality {
        self.quality
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn preferred_backend(&self) -> Option<&str> {
        self.preferred_backend.as_deref()
    }
}

/// Builder for [`NormalizedRequest`]
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    prompt: String,
    negative_prompt: Option<String>,
    size: ImageSize,
    style: Option<String>,
    count: u32,
    quality: Quality,
    seed: Option<u64>,
    preferred_backend: Option<String>,
}

impl RequestBuilder {
    pub fn negative_prompt(mut self, negative: impl Into<String>) -> Self {
        let negative = negative.into();
        self.negative_prompt = if negative.trim().is_empty() { None } else { Some(negative) };
        self
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.size = ImageSize::new(width, height);
        self
    }

    pub fn style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }

    pub fn count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    pub fn quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn preferred_backend(mut self, backend: impl Into<String>) -> Self {
        self.preferred_backend = Some(backend.into());
        self
    }

    pub fn build(self) -> Result<NormalizedRequest> {
        let prompt = self.prompt.trim().to_string();
        if prompt.is_empty() {
            return Err(AppError::InvalidRequest("prompt must not be empty".to_string()));
        }
        if self.size.width == 0 || self.size.height == 0 {
            return Err(AppError::InvalidRequest(format!(
                "image dimensions must be positive, got {}",
                self.size
            )));
        }
        if self.count == 0 {
            return Err(AppError::InvalidRequest("image count must be at least 1".to_string()));
        }

        Ok(NormalizedRequest {
            prompt,
            negative_prompt: self.negative_prompt,
            size: self.size,
            style: self.style,
            count: self.count,
            quality: self.quality,
            seed: self.seed,
            preferred_backend: self.preferred_backend,
        })
    }
}

/// What a backend can do, declared once at registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendCapabilities {
    /// Empty means any size is accepted
    pub supported_sizes: Vec<ImageSize>,
    pub supports_negative_prompt: bool,
    pub supports_seed: bool,
    pub is_async: bool,
    pub max_images_per_request: u32,
}

impl Default for BackendCapabilities {
    fn default() -> Self {
        Self {
            supported_sizes: Vec::new(),
            supports_negative_prompt: true,
            supports_seed: true,
            is_async: false,
            max_images_per_request: 1,
        }
    }
}

impl BackendCapabilities {
    /// Parameters in the request this backend will adapt or ignore
    pub fn validate(&self, request: &NormalizedRequest) -> Vec<String> {
        let mut warnings = Vec::new();

        if request.count() > self.max_images_per_request {
            warnings.push(format!(
                "requested {} images, backend returns at most {}",
                request.count(),
                self.max_images_per_request
            ));
        }

        if !self.supported_sizes.is_empty() && !self.supported_sizes.contains(&request.size()) {
            let sizes = self
                .supported_sizes
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            warnings.push(format!("size {} not supported, supported: {}", request.size(), sizes));
        }

        if request.negative_prompt().is_some() && !self.supports_negative_prompt {
            warnings.push("negative prompt not supported".to_string());
        }

        if request.seed().is_some() && !self.supports_seed {
            warnings.push("seed not supported".to_string());
        }

        warnings
    }
}

/// Static description of a registered backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    pub id: String,
    pub label: String,
    pub capabilities: BackendCapabilities,
    /// Higher runs first under the priority strategy
    pub priority: i32,
    pub enabled: bool,
}

/// Handle to a job accepted by an asynchronous backend
#[derive(Debug, Clone)]
pub struct JobHandle {
    job_id: String,
    submitted_at: Instant,
    attempts: u32,
}

impl JobHandle {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            submitted_at: Instant::now(),
            attempts: 0,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    /// Polls issued so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub(crate) fn record_attempt(&mut self) {
        self.attempts += 1;
    }
}

/// A produced image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ImageRef {
    Url(String),
    Bytes(Vec<u8>),
}

/// Result of [`ImageBackend::submit`]
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    Completed(Vec<ImageRef>),
    Accepted(JobHandle),
    Rejected(ErrorKind, String),
}

/// Result of [`ImageBackend::poll`]
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Pending,
    Completed(Vec<ImageRef>),
    Failed(ErrorKind, String),
}

/// Successful generation, tagged with the backend that served it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutput {
    pub backend: String,
    pub images: Vec<ImageRef>,
    /// Backends tried for this request, the serving one included
    pub attempts: u32,
}

/// Exactly one of these is produced per request
pub type GenerationResult = std::result::Result<GenerationOutput, GenerationFailure>;

/// Contract every image generation backend adapter satisfies.
///
/// Adapters translate transport, auth and validation errors into
/// [`ErrorKind`] before returning; the orchestration core never sees
/// backend-native error shapes.
#[async_trait]
pub trait ImageBackend: Send + Sync {
    /// Static capability declaration
    fn describe(&self) -> BackendDescriptor;

    /// Start a generation. Synchronous backends complete here, job-based
    /// backends hand back a [`JobHandle`].
    async fn submit(&self, request: &NormalizedRequest) -> SubmitOutcome;

    /// Query an accepted job. Must be idempotent: the poller calls it
    /// repeatedly until a terminal answer.
    async fn poll(&self, job: &JobHandle) -> PollOutcome;

    fn id(&self) -> String {
        self.describe().id
    }
}
