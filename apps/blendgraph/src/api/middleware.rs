//! Request throttling.
//!
//! One token bucket shared by every client, refilled at `server.rate_limit`
//! requests per second. A drained bucket answers 429 with `Retry-After`.

use super::types::ApiError;
use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};
use governor::{
    Quota, RateLimiter,
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed},
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Shared token bucket handed to [`throttle`] as router state.
pub type SharedLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Bucket refilling at `per_second`; 0 uses the configured default.
pub fn build_limiter(per_second: u32) -> SharedLimiter {
    let rate = NonZeroU32::new(per_second)
        .or_else(|| NonZeroU32::new(crate::config::DEFAULT_RATE_LIMIT))
        .unwrap_or(NonZeroU32::MIN);
    Arc::new(RateLimiter::direct(Quota::per_second(rate)))
}

pub async fn throttle(
    State(limiter): State<SharedLimiter>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    if let Err(not_until) = limiter.check() {
        let wait = not_until.wait_time_from(DefaultClock::default().now());
        tracing::warn!(
            event = "throttled",
            path = %request.uri().path(),
            wait_ms = wait.as_millis() as u64
        );
        return Err(ApiError::RateLimited(wait));
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_of_one_drains_after_one_request() {
        let limiter = build_limiter(1);
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_err());
    }

    #[test]
    fn zero_uses_default_rate() {
        let limiter = build_limiter(0);
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_ok());
    }
}
