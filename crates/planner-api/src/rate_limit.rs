use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::routes::user_fingerprint;

/// Tracked windows beyond which expired entries are swept.
const SWEEP_THRESHOLD: usize = 4_096;

/// Fixed-window request limiter keyed by endpoint and user.
#[derive(Clone)]
pub struct EndpointRateLimiter {
    state: Arc<Mutex<HashMap<String, RateWindow>>>,
    window: Duration,
    pull_limit: u32,
    push_limit: u32,
    metrics: Arc<RateLimitMetrics>,
}

#[derive(Clone, Copy)]
pub enum ProtectedEndpoint {
    Pull,
    Push,
}

#[derive(Default)]
struct RateLimitMetrics {
    pull_allowed: AtomicU64,
    pull_limited: AtomicU64,
    push_allowed: AtomicU64,
    push_limited: AtomicU64,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct RateLimitMetricsSnapshot {
    pub pull_allowed: u64,
    pub pull_limited: u64,
    pub push_allowed: u64,
    pub push_limited: u64,
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    started_at: Instant,
    count: u32,
}

impl EndpointRateLimiter {
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.rate_limit_window,
            config.pull_rate_limit_per_window,
            config.push_rate_limit_per_window,
        )
    }

    fn new(window: Duration, pull_limit: u32, push_limit: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(HashMap::new())),
            window,
            pull_limit,
            push_limit,
            metrics: Arc::new(RateLimitMetrics::default()),
        }
    }

    pub async fn check(&self, endpoint: ProtectedEndpoint, user_id: &str) -> Result<(), AppError> {
        let limit = match endpoint {
            ProtectedEndpoint::Pull => self.pull_limit,
            ProtectedEndpoint::Push => self.push_limit,
        };

        let key = format!("{}:{user_id}", endpoint.label());
        let now = Instant::now();
        let mut guard = self.state.lock().await;
        if guard.len() >= SWEEP_THRESHOLD {
            sweep_expired(&mut guard, now, self.window);
        }
        let entry = guard.entry(key).or_insert(RateWindow {
            started_at: now,
            count: 0,
        });

        if now.duration_since(entry.started_at) >= self.window {
            entry.started_at = now;
            entry.count = 0;
        }

        if entry.count >= limit {
            let retry_after_secs = self
                .window
                .saturating_sub(now.duration_since(entry.started_at))
                .as_secs();
            self.counters(endpoint).1.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                endpoint = endpoint.label(),
                user = user_fingerprint(user_id),
                retry_after_secs,
                "Rate limit exceeded"
            );
            return Err(AppError::too_many_requests(
                format!("Rate limit exceeded for {}", endpoint.label()),
                retry_after_secs,
            ));
        }

        entry.count += 1;
        self.counters(endpoint).0.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn metrics_snapshot(&self) -> RateLimitMetricsSnapshot {
        RateLimitMetricsSnapshot {
            pull_allowed: self.metrics.pull_allowed.load(Ordering::Relaxed),
            pull_limited: self.metrics.pull_limited.load(Ordering::Relaxed),
            push_allowed: self.metrics.push_allowed.load(Ordering::Relaxed),
            push_limited: self.metrics.push_limited.load(Ordering::Relaxed),
        }
    }

    /// `(allowed, limited)` counters for an endpoint.
    fn counters(&self, endpoint: ProtectedEndpoint) -> (&AtomicU64, &AtomicU64) {
        match endpoint {
            ProtectedEndpoint::Pull => (&self.metrics.pull_allowed, &self.metrics.pull_limited),
            ProtectedEndpoint::Push => (&self.metrics.push_allowed, &self.metrics.push_limited),
        }
    }
}

fn sweep_expired(windows: &mut HashMap<String, RateWindow>, now: Instant, window: Duration) {
    windows.retain(|_, tracked| now.duration_since(tracked.started_at) < window);
}

impl ProtectedEndpoint {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pull => "pull",
            Self::Push => "push",
        }
    }
}
