//! Unit tests for the job poller schedule and bounds

#[path = "../common/mod.rs"]
mod common;

use common::{image, MockBackend};
use imagegen_gateway::backend::{JobHandle, PollOutcome};
use imagegen_gateway::error::ErrorKind;
use imagegen_gateway::gateway::{JobOutcome, JobPoller, JobState, PollSchedule};
use std::time::Duration;
use tokio::time::Instant;

fn offsets(start: Instant, times: &[Instant]) -> Vec<u64> {
    times.iter().map(|t| t.duration_since(start).as_secs()).collect()
}

#[tokio::test(start_paused = true)]
async fn test_completes_after_pending_polls_on_schedule() {
    let mut outcomes = vec![PollOutcome::Pending; 7];
    outcomes.push(PollOutcome::Completed(vec![image("job", 0)]));
    let backend = MockBackend::job("job").polls(outcomes);

    let start = Instant::now();
    let outcome = JobPoller::default().drive(&backend, JobHandle::new("t-1")).await;

    assert_eq!(outcome, JobOutcome::Succeeded(vec![image("job", 0)]));
    assert_eq!(backend.poll_calls(), 8);
    assert_eq!(
        offsets(start, &backend.poll_times()),
        vec![5, 10, 15, 20, 25, 30, 40, 50]
    );
}

#[tokio::test(start_paused = true)]
async fn test_never_completing_job_stops_at_max_attempts() {
    let backend = MockBackend::job("job");

    let start = Instant::now();
    let outcome = JobPoller::default().drive(&backend, JobHandle::new("t-2")).await;

    assert_eq!(outcome, JobOutcome::TimedOut { attempts: 12 });
    assert_eq!(outcome.state(), JobState::TimedOut);
    assert_eq!(backend.poll_calls(), 12);
    assert_eq!(start.elapsed(), Duration::from_secs(90));
}

#[tokio::test(start_paused = true)]
async fn test_deadline_cuts_polling_short() {
    let schedule = PollSchedule {
        deadline: Duration::from_secs(22),
        ..PollSchedule::default()
    };
    let backend = MockBackend::job("job");

    let start = Instant::now();
    let outcome = JobPoller::new(schedule).drive(&backend, JobHandle::new("t-3")).await;

    assert_eq!(outcome, JobOutcome::TimedOut { attempts: 4 });
    assert_eq!(offsets(start, &backend.poll_times()), vec![5, 10, 15, 20]);
    assert!(start.elapsed() <= Duration::from_secs(22));
}

#[tokio::test(start_paused = true)]
async fn test_deadline_counts_from_submission() {
    let backend = MockBackend::job("job");
    let handle = JobHandle::new("t-4");

    // Time spent before polling starts comes out of the budget
    tokio::time::advance(Duration::from_secs(100)).await;
    let outcome = JobPoller::default().drive(&backend, handle).await;

    // 105, 110, 115, 120 fit; 125 does not
    assert_eq!(outcome, JobOutcome::TimedOut { attempts: 4 });
}

#[tokio::test(start_paused = true)]
async fn test_failure_is_terminal() {
    let backend = MockBackend::job("job").polls(vec![
        PollOutcome::Pending,
        PollOutcome::Failed(ErrorKind::BackendError, "nsfw filter".to_string()),
        PollOutcome::Completed(vec![image("job", 0)]),
    ]);

    let outcome = JobPoller::default().drive(&backend, JobHandle::new("t-5")).await;

    assert_eq!(
        outcome,
        JobOutcome::Failed(ErrorKind::BackendError, "nsfw filter".to_string())
    );
    assert_eq!(backend.poll_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_jobs_are_driven_independently() {
    let fast = MockBackend::job("fast").polls(vec![PollOutcome::Completed(vec![image("fast", 0)])]);
    let slow = MockBackend::job("slow").polls(vec![
        PollOutcome::Pending,
        PollOutcome::Pending,
        PollOutcome::Completed(vec![image("slow", 0)]),
    ]);
    let poller = JobPoller::default();

    let (a, b) = tokio::join!(
        poller.drive(&fast, JobHandle::new("f")),
        poller.drive(&slow, JobHandle::new("s")),
    );

    assert_eq!(a.state(), JobState::Succeeded);
    assert_eq!(b.state(), JobState::Succeeded);
    assert_eq!(fast.poll_calls(), 1);
    assert_eq!(slow.poll_calls(), 3);
}
