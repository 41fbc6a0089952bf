//! Global rate limiting middleware backed by governor

use axum::{
    body::Body,
    http::{header::RETRY_AFTER, HeaderValue, Request, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::future::BoxFuture;
use governor::{
    clock::{Clock, DefaultClock},
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::{
    num::NonZeroU32,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};
use tower::{Layer, Service};
use tracing::warn;

use crate::config::RateLimitConfig;
use crate::error::{ErrorDetail, ErrorResponse};
use crate::middleware::is_public_path;

type SharedRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>>;

/// Rate limiting layer
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: SharedRateLimiter,
    clock: DefaultClock,
}

impl RateLimitLayer {
    /// Zero values are raised to one
    pub fn new(requests_per_second: u32, burst_size: u32) -> Self {
        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst_size).unwrap_or(rate);
        let clock = DefaultClock::default();

        Self {
            limiter: Arc::new(RateLimiter::direct_with_clock(
                Quota::per_second(rate).allow_burst(burst),
                &clock,
            )),
            clock,
        }
    }

    /// `None` when rate limiting is switched off
    pub fn from_config(config: &RateLimitConfig) -> Option<Self> {
        config
            .enabled
            .then(|| Self::new(config.requests_per_second, config.burst_size))
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitMiddleware {
            inner,
            limiter: self.limiter.clone(),
            clock: self.clock.clone(),
        }
    }
}

/// Rate limiting middleware service
#[derive(Clone)]
pub struct RateLimitMiddleware<S> {
    inner: S,
    limiter: SharedRateLimiter,
    clock: DefaultClock,
}

impl<S> Service<Request<Body>> for RateLimitMiddleware<S>
where
    S: Service<Request<Body>, Response = Response> + Send + Clone + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        if is_public_path(request.uri().path()) {
            return Box::pin(self.inner.call(request));
        }

        match self.limiter.check() {
            Ok(()) => Box::pin(self.inner.call(request)),
            Err(not_until) => {
                let wait = not_until.wait_time_from(self.clock.now());
                warn!(path = %request.uri().path(), retry_after_ms = wait.as_millis() as u64, "Rate limit exceeded");
                Box::pin(async move { Ok(rate_limit_error_response(wait)) })
            }
        }
    }
}

fn rate_limit_error_response(wait: Duration) -> Response {
    let body = ErrorResponse {
        error: ErrorDetail {
            message: "Rate limit exceeded. Please slow down your requests.".to_string(),
            r#type: "rate_limit_error".to_string(),
            code: Some("rate_limit_exceeded".to_string()),
            attempts: Vec::new(),
        },
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    let seconds = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    response
        .headers_mut()
        .insert(RETRY_AFTER, HeaderValue::from(seconds.max(1)));
    response
}
