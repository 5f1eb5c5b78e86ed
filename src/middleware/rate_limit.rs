use super::ip::MaybeRemoteAddr;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{
    collections::HashMap,
    net::IpAddr,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::RwLock;

use crate::error::AppError;

/// Sliding-window request counter keyed by client IP.
#[derive(Clone)]
pub struct RateLimiter {
    requests: Arc<RwLock<HashMap<IpAddr, Vec<Instant>>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window_seconds: u64) -> Self {
        Self {
            requests: Arc::new(RwLock::new(HashMap::new())),
            max_requests,
            window: Duration::from_secs(window_seconds),
        }
    }

    /// Records the request, or returns `RateLimited` with the seconds until a
    /// slot frees up.
    pub async fn check_rate_limit(&self, ip: IpAddr) -> Result<(), AppError> {
        let now = Instant::now();
        let mut requests = self.requests.write().await;
        let timestamps = requests.entry(ip).or_default();

        // Keep timestamps from the future if the clock jumped backwards
        timestamps.retain(|&t| now.checked_duration_since(t).map(|d| d < self.window).unwrap_or(true));

        if timestamps.len() >= self.max_requests {
            let oldest = timestamps.first().copied().unwrap_or(now);
            let retry_after = now
                .checked_duration_since(oldest)
                .map(|elapsed| self.window.saturating_sub(elapsed))
                .unwrap_or(Duration::from_secs(1));
            return Err(AppError::RateLimited { retry_after_seconds: retry_after.as_secs().max(1) });
        }

        timestamps.push(now);
        Ok(())
    }

    pub async fn cleanup_old_entries(&self) {
        let now = Instant::now();
        let mut requests = self.requests.write().await;
        requests.retain(|_, timestamps| {
            timestamps.retain(|&t| now.checked_duration_since(t).map(|d| d < self.window).unwrap_or(true));
            !timestamps.is_empty()
        });
    }
}

impl RateLimiter {
    /// The global limit: 1000 requests per 60 seconds unless overridden by
    /// `SHAREWAREZ_RATE_LIMIT_MAX_REQUESTS` and `SHAREWAREZ_RATE_LIMIT_WINDOW_SECONDS`.
    pub fn from_env() -> Self {
        Self::new(
            env_or("SHAREWAREZ_RATE_LIMIT_MAX_REQUESTS", 1000usize),
            env_or("SHAREWAREZ_RATE_LIMIT_WINDOW_SECONDS", 60u64),
        )
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok()).unwrap_or(default)
}

/// Global per-IP limit applied to every route, installed with
/// `axum::middleware::from_fn_with_state`.
///
/// Stale entries are pruned by whoever owns the limiter via
/// [`RateLimiter::cleanup_old_entries`].
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    remote: MaybeRemoteAddr,
    req: Request,
    next: Next,
) -> Response {
    let ip = remote.client_ip(req.headers());
    match limiter.check_rate_limit(ip).await {
        Ok(()) => next.run(req).await,
        Err(e) => e.into_response(),
    }
}

/// Named limits for expensive endpoints, checked by the handlers themselves.
#[derive(Clone, Default)]
pub struct EndpointRateLimiter {
    limiters: Arc<HashMap<String, RateLimiter>>,
}

impl EndpointRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces limits given as `(endpoint, max_requests, window_seconds)`.
    pub fn with_limits(self, limits: Vec<(&str, usize, u64)>) -> Self {
        let mut map = Arc::try_unwrap(self.limiters).unwrap_or_else(|arc| (*arc).clone());
        for (endpoint, max_requests, window_seconds) in limits {
            map.insert(endpoint.to_string(), RateLimiter::new(max_requests, window_seconds));
        }
        Self { limiters: Arc::new(map) }
    }

    pub async fn check_endpoint_limit(&self, endpoint: &str, ip: IpAddr) -> Result<(), AppError> {
        match self.limiters.get(endpoint) {
            Some(limiter) => limiter.check_rate_limit(ip).await,
            None => Ok(()),
        }
    }

    pub async fn cleanup_all(&self) {
        for limiter in self.limiters.values() {
            limiter.cleanup_old_entries().await;
        }
    }
}
