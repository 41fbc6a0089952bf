//! Synchronous HTTP adapter for OpenAI-style image generation APIs

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::backend::traits::{
    BackendCapabilities, BackendDescriptor, ImageBackend, ImageRef, JobHandle, NormalizedRequest,
    PollOutcome, Quality, SubmitOutcome,
};
use crate::config::BackendConfig;
use crate::error::{AppError, ErrorKind, Result};

/// Map a non-success HTTP status onto the shared taxonomy.
///
/// An upstream 400/422 is the backend's own rejection and stays a
/// `BackendError`, so failover can try another backend. `InvalidRequest`
/// is reserved for requests the gateway itself refuses.
pub(crate) fn classify_status(status: StatusCode) -> ErrorKind {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorKind::AuthError,
        StatusCode::TOO_MANY_REQUESTS => ErrorKind::RateLimited,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ErrorKind::Timeout,
        _ => ErrorKind::BackendError,
    }
}

/// Map a transport error onto the shared taxonomy
pub(crate) fn classify_transport(error: &reqwest::Error) -> ErrorKind {
    if error.is_connect() || error.is_timeout() || error.is_request() {
        ErrorKind::NetworkError
    } else if let Some(status) = error.status() {
        classify_status(status)
    } else {
        ErrorKind::BackendError
    }
}

pub(crate) fn build_client(config: &BackendConfig) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_millis(config.timeout_ms))
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))
}

pub(crate) fn descriptor_from_config(config: &BackendConfig, is_async: bool) -> Result<BackendDescriptor> {
    Ok(BackendDescriptor {
        id: config.id.clone(),
        label: config.label(),
        capabilities: BackendCapabilities {
            supported_sizes: config.parsed_sizes()?,
            supports_negative_prompt: config.supports_negative_prompt,
            supports_seed: config.supports_seed,
            is_async,
            max_images_per_request: config.max_images_per_request.max(1),
        },
        priority: config.priority,
        enabled: config.enabled,
    })
}

/// HTTP-based synchronous image generation backend
pub struct HttpBackend {
    descriptor: BackendDescriptor,
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: Option<String>,
}

#[derive(Debug, Serialize)]
struct ApiGenerateRequest<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<&'a str>,
    n: u32,
    size: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    style: Option<&'a str>,
    quality: &'static str,
    response_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct ApiGenerateResponse {
    #[serde(default)]
    images: Vec<ApiImageData>,
    #[serde(default)]
    data: Vec<ApiImageData>,
}

#[derive(Debug, Deserialize)]
struct ApiImageData {
    #[serde(default)]
    b64_json: Option<String>,
    #[serde(default)]
    base64: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

fn quality_param(quality: Quality) -> &'static str {
    match quality {
        Quality::Draft => "draft",
        Quality::Standard => "standard",
        Quality::High => "hd",
    }
}

impl HttpBackend {
    /// Create a new HTTP backend from configuration
    pub fn new(config: &BackendConfig) -> Result<Self> {
        Ok(Self {
            descriptor: descriptor_from_config(config, false)?,
            client: build_client(config)?,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    fn decode_images(&self, response: ApiGenerateResponse) -> std::result::Result<Vec<ImageRef>, String> {
        let mut images = Vec::new();

        for item in response.images.into_iter().chain(response.data) {
            if let Some(url) = item.url {
                images.push(ImageRef::Url(url));
            } else if let Some(encoded) = item.b64_json.or(item.base64) {
                let bytes = STANDARD
                    .decode(encoded.trim())
                    .map_err(|e| format!("invalid base64 image: {}", e))?;
                images.push(ImageRef::Bytes(bytes));
            }
        }

        if images.is_empty() {
            return Err("response contained no images".to_string());
        }
        Ok(images)
    }
}

#[async_trait]
impl ImageBackend for HttpBackend {
    fn describe(&self) -> BackendDescriptor {
        self.descriptor.clone()
    }

    async fn submit(&self, request: &NormalizedRequest) -> SubmitOutcome {
        let url = format!("{}/v1/images/generations", self.endpoint);
        let count = request.count().min(self.descriptor.capabilities.max_images_per_request);

        let body = ApiGenerateRequest {
            prompt: request.prompt(),
            negative_prompt: request
                .negative_prompt()
                .filter(|_| self.descriptor.capabilities.supports_negative_prompt),
            n: count,
            size: request.size().to_string(),
            model: self.model.as_deref(),
            seed: request.seed().filter(|_| self.descriptor.capabilities.supports_seed),
            style: request.style(),
            quality: quality_param(request.quality()),
            response_format: "url",
        };

        debug!(backend = %self.descriptor.id, url = %url, "Sending generate request");

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                let kind = classify_transport(&e);
                warn!(backend = %self.descriptor.id, error = %e, kind = %kind, "Request failed");
                return SubmitOutcome::Rejected(kind, e.to_string());
            }
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return SubmitOutcome::Rejected(
                classify_status(status),
                format!("backend returned {}: {}", status, text),
            );
        }

        match response.json::<ApiGenerateResponse>().await {
            Ok(parsed) => match self.decode_images(parsed) {
                Ok(images) => SubmitOutcome::Completed(images),
                Err(message) => SubmitOutcome::Rejected(ErrorKind::BackendError, message),
            },
            Err(e) => SubmitOutcome::Rejected(
                ErrorKind::BackendError,
                format!("failed to parse response: {}", e),
            ),
        }
    }

    async fn poll(&self, job: &JobHandle) -> PollOutcome {
        PollOutcome::Failed(
            ErrorKind::BackendError,
            format!("backend '{}' is synchronous and has no job '{}'", self.descriptor.id, job.job_id()),
        )
    }
}
