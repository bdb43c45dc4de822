use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{collections::HashMap, net::IpAddr, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::proxy::ClientIp;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    started: Instant,
}

/// A fixed-window rate limiter keyed by client address.
///
/// The counter resets exactly when the window has elapsed. The check-and-increment
/// runs under one lock, so two concurrent requests at the boundary cannot both
/// be admitted.
#[derive(Clone)]
pub struct RateLimiter {
    windows: Arc<Mutex<HashMap<IpAddr, Window>>>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    /// Creates a new `RateLimiter`.
    ///
    /// # Arguments
    ///
    /// * `max_requests` - The maximum number of requests allowed within one window.
    /// * `window_seconds` - The duration of the window in seconds.
    pub fn new(max_requests: u32, window_seconds: u64) -> Self {
        Self {
            windows: Arc::new(Mutex::new(HashMap::new())),
            max_requests,
            window: Duration::from_secs(window_seconds),
        }
    }

    /// Records one attempt from `ip`.
    ///
    /// Returns `AppError::RateLimited` when the attempt takes the count above the limit.
    /// Rejected attempts are counted too.
    pub async fn check_rate_limit(&self, ip: IpAddr) -> Result<(), AppError> {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let entry = windows.entry(ip).or_insert(Window { count: 0, started: now });

        if now.saturating_duration_since(entry.started) >= self.window {
            entry.count = 0;
            entry.started = now;
        }
        entry.count = entry.count.saturating_add(1);

        if entry.count > self.max_requests {
            let remaining = self.window.saturating_sub(now.saturating_duration_since(entry.started));
            // Round up so a client that waits exactly Retry-After lands in the next window.
            let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
            return Err(AppError::RateLimited { retry_after_seconds: secs.max(1) });
        }
        Ok(())
    }

    /// Drops windows that have already elapsed and returns how many were dropped.
    pub async fn cleanup_old_entries(&self) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        windows.retain(|_, w| now.saturating_duration_since(w.started) < self.window);
        before - windows.len()
    }
}

/// A manager for per-endpoint rate limiters.
///
/// Endpoints are keyed by their route pattern as reported by [`MatchedPath`].
/// The set of endpoints is fixed at construction.
#[derive(Clone, Default)]
pub struct EndpointRateLimiter {
    limiters: Arc<HashMap<String, RateLimiter>>,
}

impl EndpointRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces endpoint-specific limits.
    ///
    /// # Arguments
    ///
    /// * `limits` - Tuples of endpoint pattern, maximum attempts and window in seconds.
    pub fn with_limits(self, limits: Vec<(&str, u32, u64)>) -> Self {
        let mut map = Arc::try_unwrap(self.limiters).unwrap_or_else(|shared| (*shared).clone());
        for (endpoint, max_requests, window_seconds) in limits {
            map.insert(endpoint.to_string(), RateLimiter::new(max_requests, window_seconds));
        }
        Self { limiters: Arc::new(map) }
    }

    /// Checks an attempt against the endpoint's limiter. Unknown endpoints are unlimited.
    pub async fn check_endpoint_limit(&self, endpoint: &str, ip: IpAddr) -> Result<(), AppError> {
        match self.limiters.get(endpoint) {
            Some(limiter) => limiter.check_rate_limit(ip).await,
            None => Ok(()),
        }
    }

    /// Cleans up elapsed windows in all endpoint limiters.
    pub async fn cleanup_all(&self) -> usize {
        let mut dropped = 0;
        for limiter in self.limiters.values() {
            dropped += limiter.cleanup_old_entries().await;
        }
        dropped
    }
}

/// Route layer for the sensitive endpoints (login, SSO, API login).
///
/// Runs before the handler; a rejected attempt never reaches it.
pub async fn limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let endpoint = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| req.uri().path().to_owned());
    let ip = req
        .extensions()
        .get::<ClientIp>()
        .map(|c| c.0)
        .unwrap_or(IpAddr::from([127, 0, 0, 1]));

    match state.rate_limiter.check_endpoint_limit(&endpoint, ip).await {
        Ok(()) => next.run(req).await,
        Err(err) => {
            state.metrics.inc_rate_limited();
            tracing::warn!(%ip, endpoint = %endpoint, "Rate limit exceeded");
            err.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fixed_window() {
        let limiter = RateLimiter::new(3, 60);
        let ip = IpAddr::from([127, 0, 0, 1]);

        assert!(limiter.check_rate_limit(ip).await.is_ok());
        assert!(limiter.check_rate_limit(ip).await.is_ok());
        assert!(limiter.check_rate_limit(ip).await.is_ok());
        match limiter.check_rate_limit(ip).await {
            Err(AppError::RateLimited { retry_after_seconds }) => assert_eq!(retry_after_seconds, 60),
            other => panic!("expected rate limit, got {:?}", other),
        }

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(limiter.check_rate_limit(ip).await.is_err());

        // the count resets exactly when the window elapses
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.check_rate_limit(ip).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_ips() {
        let limiter = RateLimiter::new(1, 10);
        let ip1 = IpAddr::from([127, 0, 0, 1]);
        let ip2 = IpAddr::from([127, 0, 0, 2]);

        assert!(limiter.check_rate_limit(ip1).await.is_ok());
        assert!(limiter.check_rate_limit(ip2).await.is_ok());
        assert!(limiter.check_rate_limit(ip1).await.is_err());
        assert!(limiter.check_rate_limit(ip2).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_attempts_at_boundary() {
        let limiter = RateLimiter::new(5, 60);
        let ip = IpAddr::from([10, 0, 0, 1]);
        let mut handles = Vec::new();
        for _ in 0..20 {
            let l = limiter.clone();
            handles.push(tokio::spawn(async move { l.check_rate_limit(ip).await.is_ok() }));
        }
        let mut admitted = 0;
        for h in handles {
            if h.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_drops_elapsed_windows() {
        let limiter = RateLimiter::new(5, 60);
        limiter.check_rate_limit(IpAddr::from([10, 0, 0, 1])).await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        limiter.check_rate_limit(IpAddr::from([10, 0, 0, 2])).await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(limiter.cleanup_old_entries().await, 1);
        assert_eq!(limiter.cleanup_old_entries().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_endpoint_limits_are_independent() {
        let limiter = EndpointRateLimiter::new().with_limits(vec![("/login", 1, 60), ("/sso", 1, 60)]);
        let ip = IpAddr::from([127, 0, 0, 1]);

        assert!(limiter.check_endpoint_limit("/login", ip).await.is_ok());
        assert!(limiter.check_endpoint_limit("/login", ip).await.is_err());
        assert!(limiter.check_endpoint_limit("/sso", ip).await.is_ok());
        // no limit configured
        for _ in 0..10 {
            assert!(limiter.check_endpoint_limit("/dashboard", ip).await.is_ok());
        }
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(limiter.cleanup_all().await, 2);
    }
}
