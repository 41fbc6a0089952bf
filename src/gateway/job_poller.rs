//! Drives submit-then-poll jobs to a terminal outcome

use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backend::traits::{ImageBackend, ImageRef, JobHandle, PollOutcome};
use crate::config::PollerConfig;
use crate::error::ErrorKind;

/// When to poll and when to give up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSchedule {
    pub short_interval: Duration,
    /// Attempts that wait `short_interval`; later ones wait `long_interval`
    pub short_attempts: u32,
    pub long_interval: Duration,
    pub max_attempts: u32,
    /// Wall-clock budget measured from job submission
    pub deadline: Duration,
}

impl PollSchedule {
    /// Wait before the given 1-based attempt
    pub fn interval_before(&self, attempt: u32) -> Duration {
        if attempt <= self.short_attempts {
            self.short_interval
        } else {
            self.long_interval
        }
    }
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self::from(&PollerConfig::default())
    }
}

impl From<&PollerConfig> for PollSchedule {
    fn from(config: &PollerConfig) -> Self {
        Self {
            short_interval: Duration::from_millis(config.short_interval_ms),
            short_attempts: config.short_attempts,
            long_interval: Duration::from_millis(config.long_interval_ms),
            max_attempts: config.max_attempts,
            deadline: Duration::from_secs(config.deadline_secs),
        }
    }
}

/// Lifecycle of one polled job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Submitted,
    Polling,
    Succeeded,
    Failed,
    TimedOut,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }

    /// Terminal states absorb every further transition
    pub fn transition(self, next: JobState) -> JobState {
        if self.is_terminal() {
            self
        } else {
            next
        }
    }
}

/// Terminal outcome of a polled job
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Succeeded(Vec<ImageRef>),
    Failed(ErrorKind, String),
    TimedOut { attempts: u32 },
}

impl JobOutcome {
    pub fn state(&self) -> JobState {
        match self {
            Self::Succeeded(_) => JobState::Succeeded,
            Self::Failed(..) => JobState::Failed,
            Self::TimedOut { .. } => JobState::TimedOut,
        }
    }
}

/// A job owned by the poller for its whole polling lifetime
struct PolledJob {
    handle: JobHandle,
    state: JobState,
}

impl PolledJob {
    fn finish(&mut self, outcome: JobOutcome) -> JobOutcome {
        self.state = self.state.transition(outcome.state());
        outcome
    }
}

/// Job poller.
///
/// Each call to [`JobPoller::drive`] owns its job exclusively, so any number
/// of jobs can be driven concurrently. Dropping the returned future stops
/// polling at the next wait; the remote job is not cancelled.
#[derive(Debug, Clone, Default)]
pub struct JobPoller {
    schedule: PollSchedule,
}

impl JobPoller {
    pub fn new(schedule: PollSchedule) -> Self {
        Self { schedule }
    }

    /// Poll until the backend reports a terminal answer or a bound runs out
    pub async fn drive(&self, backend: &dyn ImageBackend, handle: JobHandle) -> JobOutcome {
        let deadline = handle.submitted_at() + self.schedule.deadline;
        let mut job = PolledJob {
            handle,
            state: JobState::Submitted,
        };

        loop {
            let attempt = job.handle.attempts() + 1;
            if attempt > self.schedule.max_attempts {
                warn!(job_id = %job.handle.job_id(), attempts = attempt - 1, "Job exhausted poll attempts");
                let attempts = job.handle.attempts();
                return job.finish(JobOutcome::TimedOut { attempts });
            }

            let poll_at = Instant::now() + self.schedule.interval_before(attempt);
            if poll_at > deadline {
                warn!(job_id = %job.handle.job_id(), attempts = attempt - 1, "Job deadline reached");
                let attempts = job.handle.attempts();
                return job.finish(JobOutcome::TimedOut { attempts });
            }

            tokio::time::sleep_until(poll_at).await;
            job.state = job.state.transition(JobState::Polling);
            job.handle.record_attempt();

            let outcome = match tokio::time::timeout_at(deadline, backend.poll(&job.handle)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(job_id = %job.handle.job_id(), attempt, "Poll ran past the job deadline");
                    let attempts = job.handle.attempts();
                    return job.finish(JobOutcome::TimedOut { attempts });
                }
            };

            match outcome {
                PollOutcome::Pending => {
                    debug!(job_id = %job.handle.job_id(), attempt, "Job pending");
                }
                PollOutcome::Completed(images) => {
                    info!(job_id = %job.handle.job_id(), attempt, "Job completed");
                    return job.finish(JobOutcome::Succeeded(images));
                }
                PollOutcome::Failed(kind, message) => {
                    warn!(job_id = %job.handle.job_id(), attempt, kind = %kind, "Job failed");
                    return job.finish(JobOutcome::Failed(kind, message));
                }
            }
        }
    }
}
