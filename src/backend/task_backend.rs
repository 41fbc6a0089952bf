//! Job-based HTTP adapter: submit a task, then poll its status

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backend::http_backend::{build_client, classify_status, classify_transport, descriptor_from_config};
use crate::backend::traits::{
    BackendDescriptor, ImageBackend, ImageRef, JobHandle, NormalizedRequest, PollOutcome, SubmitOutcome,
};
use crate::config::BackendConfig;
use crate::error::{ErrorKind, Result};

const STATUS_SUCCEED: &str = "TASK_STATUS_SUCCEED";
const STATUS_FAILED: &str = "TASK_STATUS_FAILED";

/// Backend that accepts a task and reports completion on later queries
pub struct TaskBackend {
    descriptor: BackendDescriptor,
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: Option<String>,
}

#[derive(Debug, Serialize)]
struct TaskSubmitBody<'a> {
    request: TaskParams<'a>,
}

#[derive(Debug, Serialize)]
struct TaskParams<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model_name: Option<&'a str>,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<&'a str>,
    width: u32,
    height: u32,
    image_num: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TaskSubmitResponse {
    #[serde(default)]
    task_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TaskResultResponse {
    #[serde(default)]
    task: TaskInfo,
    #[serde(default)]
    images: Vec<TaskImage>,
}

#[derive(Debug, Default, Deserialize)]
struct TaskInfo {
    #[serde(default)]
    status: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TaskImage {
    #[serde(default)]
    image_url: Option<String>,
}

impl TaskBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        Ok(Self {
            descriptor: descriptor_from_config(config, true)?,
            client: build_client(config)?,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    fn interpret(&self, job: &JobHandle, result: TaskResultResponse) -> PollOutcome {
        match result.task.status.as_str() {
            STATUS_SUCCEED => {
                let images: Vec<ImageRef> = result
                    .images
                    .into_iter()
                    .filter_map(|image| image.image_url)
                    .map(ImageRef::Url)
                    .collect();

                if images.is_empty() {
                    PollOutcome::Failed(
                        ErrorKind::BackendError,
                        "task succeeded without image URLs".to_string(),
                    )
                } else {
                    PollOutcome::Completed(images)
                }
            }
            STATUS_FAILED => PollOutcome::Failed(
                ErrorKind::BackendError,
                result.task.reason.unwrap_or_else(|| "task failed".to_string()),
            ),
            status => {
                debug!(
                    backend = %self.descriptor.id,
                    task_id = %job.job_id(),
                    status = %status,
                    "Task still running"
                );
                PollOutcome::Pending
            }
        }
    }
}

#[async_trait]
impl ImageBackend for TaskBackend {
    fn describe(&self) -> BackendDescriptor {
        self.descriptor.clone()
    }

    async fn submit(&self, request: &NormalizedRequest) -> SubmitOutcome {
        let caps = &self.descriptor.capabilities;
        let body = TaskSubmitBody {
            request: TaskParams {
                model_name: self.model.as_deref(),
                prompt: request.prompt(),
                negative_prompt: request.negative_prompt().filter(|_| caps.supports_negative_prompt),
                width: request.width(),
                height: request.height(),
                image_num: request.count().min(caps.max_images_per_request),
                seed: request.seed().filter(|_| caps.supports_seed),
            },
        };

        let url = format!("{}/v3/async/txt2img", self.endpoint);
        let response = match self.authorized(self.client.post(&url)).json(&body).send().await {
            Ok(response) => response,
            Err(e) => return SubmitOutcome::Rejected(classify_transport(&e), e.to_string()),
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return SubmitOutcome::Rejected(
                classify_status(status),
                format!("task submission returned {}: {}", status, text),
            );
        }

        match response.json::<TaskSubmitResponse>().await {
            Ok(TaskSubmitResponse { task_id: Some(id) }) if !id.is_empty() => {
                debug!(backend = %self.descriptor.id, task_id = %id, "Task accepted");
                SubmitOutcome::Accepted(JobHandle::new(id))
            }
            Ok(_) => SubmitOutcome::Rejected(
                ErrorKind::BackendError,
                "task submission returned no task id".to_string(),
            ),
            Err(e) => SubmitOutcome::Rejected(
                ErrorKind::BackendError,
                format!("failed to parse task submission: {}", e),
            ),
        }
    }

    /// Transient query failures are reported as `Pending` so the poller's
    /// schedule, not a single bad response, decides when to give up.
    async fn poll(&self, job: &JobHandle) -> PollOutcome {
        let url = format!("{}/v3/async/task-result", self.endpoint);
        let request = self
            .authorized(self.client.get(&url))
            .query(&[("task_id", job.job_id())]);

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(backend = %self.descriptor.id, task_id = %job.job_id(), error = %e, "Task query failed");
                return PollOutcome::Pending;
            }
        };

        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return PollOutcome::Failed(ErrorKind::AuthError, format!("task query returned {}", status));
        }
        if !status.is_success() {
            warn!(backend = %self.descriptor.id, task_id = %job.job_id(), status = %status, "Task query rejected");
            return PollOutcome::Pending;
        }

        match response.json::<TaskResultResponse>().await {
            Ok(result) => self.interpret(job, result),
            Err(e) => {
                warn!(backend = %self.descriptor.id, error = %e, "Unreadable task result");
                PollOutcome::Pending
            }
        }
    }
}
