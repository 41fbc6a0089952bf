//! API request and response models (OpenAI compatible where it matters)

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::backend::traits::{GenerationOutput, ImageRef, NormalizedRequest, Quality};
use crate::error::Result;
use crate::gateway::{BackendStatus, HealthRecord, ManagerSummary, RequestRouter, SelectionStrategy};
use crate::queue::QueueStats;

/// Structured image generation request
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerateImageRequest {
    pub prompt: String,

    /// Number of images to generate
    #[serde(default = "default_n")]
    pub n: u32,

    /// e.g. "1024x1024", falls back to the configured default
    #[serde(default)]
    pub size: Option<String>,

    #[serde(default)]
    pub negative_prompt: Option<String>,

    #[serde(default)]
    pub style: Option<String>,

    /// "draft", "standard" or "high"
    #[serde(default)]
    pub quality: Option<String>,

    #[serde(default)]
    pub seed: Option<u64>,

    /// Backend to try first
    #[serde(default)]
    pub backend: Option<String>,
}

fn default_n() -> u32 {
    1
}

impl GenerateImageRequest {
    /// Validate and convert, applying the router's limits and defaults
    pub fn into_normalized(self, router: &RequestRouter) -> Result<NormalizedRequest> {
        let size = match &self.size {
            Some(size) => size.parse()?,
            None => router.default_size(),
        };
        let quality: Quality = match &self.quality {
            Some(quality) => quality.parse()?,
            None => Quality::default(),
        };

        let mut builder = NormalizedRequest::builder(self.prompt)
            .size(size.width, size.height)
            .count(self.n)
            .quality(quality);

        if let Some(negative) = self.negative_prompt {
            builder = builder.negative_prompt(negative);
        }
        if let Some(style) = self.style {
            builder = builder.style(style);
        }
        if let Some(seed) = self.seed {
            builder = builder.seed(seed);
        }
        if let Some(backend) = self.backend.or_else(|| router.default_backend().map(str::to_string)) {
            builder = builder.preferred_backend(backend);
        }

        let request = builder.build()?;
        router.validate(&request)?;
        Ok(request)
    }
}

/// Free-form prompt request, parsed server-side
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PromptRequest {
    pub text: String,
}

/// Image data in the response
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImageData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub b64_json: Option<String>,
}

impl From<ImageRef> for ImageData {
    fn from(image: ImageRef) -> Self {
        match image {
            ImageRef::Url(url) => Self {
                url: Some(url),
                b64_json: None,
            },
            ImageRef::Bytes(bytes) => Self {
                url: None,
                b64_json: Some(STANDARD.encode(bytes)),
            },
        }
    }
}

/// Image generation response
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerateImageResponse {
    /// Unix timestamp of creation
    pub created: i64,
    /// Backend that served the request
    pub backend: String,
    /// Backends tried, including the one that succeeded
    pub attempts: u32,
    pub data: Vec<ImageData>,
}

impl GenerateImageResponse {
    pub fn from_output(output: GenerationOutput) -> Self {
        Self {
            created: chrono::Utc::now().timestamp(),
            backend: output.backend,
            attempts: output.attempts,
            data: output.images.into_iter().map(ImageData::from).collect(),
        }
    }
}

/// Response to a free-form prompt: what was understood plus the images
#[derive(Debug, Clone, Serialize)]
pub struct PromptResponse {
    pub parsed: NormalizedRequest,
    #[serde(flatten)]
    pub result: GenerateImageResponse,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendListResponse {
    pub strategy: SelectionStrategy,
    pub backends: Vec<BackendStatus>,
}

/// Optional body for `POST /v1/backends/:id/test`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestBackendRequest {
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestBackendResponse {
    pub backend: String,
    pub success: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub images: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub summary: ManagerSummary,
    pub backends: Vec<HealthRecord>,
    pub queue: QueueStats,
}

/// Optional body for `POST /v1/stats/reset`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResetStatsRequest {
    #[serde(default)]
    pub backend: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategyRequest {
    pub strategy: String,
}

impl StrategyRequest {
    pub fn parse(&self) -> Result<SelectionStrategy> {
        self.strategy.parse()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub backends: BackendHealthSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendHealthSummary {
    pub total: usize,
    pub enabled: usize,
    pub eligible: usize,
}

/// Generic success response
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: String,
}
