//! Sliding-window rate limiter.
//!
//! Requests are counted per (client, endpoint) within a trailing time
//! window, so burstiness is bounded precisely at endpoint granularity
//! without a background refill timer. Endpoint policies are a static
//! table with a default fallback.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

/// Per-endpoint admission policy.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RatePolicy {
    pub max_requests: usize,
    pub window_secs: u64,
}

impl RatePolicy {
    pub const fn new(max_requests: usize, window_secs: u64) -> Self {
        Self {
            max_requests,
            window_secs,
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed {
        limit: usize,
        remaining: usize,
        window_secs: u64,
    },
    Limited {
        retry_after_secs: u64,
        limit: usize,
        window_secs: u64,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStats {
    pub active_clients: usize,
    pub tracked_requests: usize,
}

pub struct RateLimiter {
    windows: Mutex<HashMap<(String, String), Vec<Instant>>>,
    policies: HashMap<String, RatePolicy>,
    default_policy: RatePolicy,
}

impl RateLimiter {
    /// Limiter with the standard endpoint policy table.
    pub fn new() -> Self {
        let mut policies = HashMap::new();
        policies.insert("/images/generate".to_string(), RatePolicy::new(10, 60));
        policies.insert("/images/face-swap".to_string(), RatePolicy::new(5, 60));
        policies.insert("/images/upscale".to_string(), RatePolicy::new(5, 60));
        policies.insert("/prompt/enhance".to_string(), RatePolicy::new(20, 60));
        policies.insert("/jobs/video".to_string(), RatePolicy::new(3, 300));
        Self::with_policies(policies, RatePolicy::new(30, 60))
    }

    pub fn with_policies(
        policies: HashMap<String, RatePolicy>,
        default_policy: RatePolicy,
    ) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            policies,
            default_policy,
        }
    }

    pub fn policy_for(&self, endpoint: &str) -> RatePolicy {
        self.policies
            .get(endpoint)
            .copied()
            .unwrap_or(self.default_policy)
    }

    /// Admit or reject one request from `client` against `endpoint`.
    /// Admission appends the current timestamp to the window.
    pub fn check(&self, client: &str, endpoint: &str) -> Decision {
        self.check_at(client, endpoint, Instant::now())
    }

    fn check_at(&self, client: &str, endpoint: &str, now: Instant) -> Decision {
        let policy = self.policy_for(endpoint);
        let window = Duration::from_secs(policy.window_secs);

        let mut windows = self.windows.lock().expect("rate window lock poisoned");
        let timestamps = windows
            .entry((client.to_string(), endpoint.to_string()))
            .or_default();

        // Drop timestamps that fell out of the trailing window.
        timestamps.retain(|ts| now.duration_since(*ts) < window);

        if timestamps.len() >= policy.max_requests {
            let oldest = *timestamps.iter().min().expect("window is non-empty");
            let elapsed = now.duration_since(oldest);
            let retry_after = window.saturating_sub(elapsed);
            let retry_after_secs = retry_after.as_secs().max(1);

            debug!(client, endpoint, retry_after_secs, "rate limit exceeded");
            return Decision::Limited {
                retry_after_secs,
                limit: policy.max_requests,
                window_secs: policy.window_secs,
            };
        }

        timestamps.push(now);
        Decision::Allowed {
            limit: policy.max_requests,
            remaining: policy.max_requests - timestamps.len(),
            window_secs: policy.window_secs,
        }
    }

    /// Drop (client, endpoint) entries with no request inside the
    /// retention window, bounding memory growth from one-off clients.
    pub fn sweep(&self, retention: Duration) -> usize {
        self.sweep_at(retention, Instant::now())
    }

    fn sweep_at(&self, retention: Duration, now: Instant) -> usize {
        let mut windows = self.windows.lock().expect("rate window lock poisoned");
        let before = windows.len();
        windows.retain(|_, timestamps| {
            timestamps.retain(|ts| now.duration_since(*ts) < retention);
            !timestamps.is_empty()
        });
        let removed = before - windows.len();
        if removed > 0 {
            debug!(removed, "swept idle rate limiter clients");
        }
        removed
    }

    pub fn stats(&self) -> RateLimiterStats {
        let windows = self.windows.lock().expect("rate window lock poisoned");
        RateLimiterStats {
            active_clients: windows.len(),
            tracked_requests: windows.values().map(Vec::len).sum(),
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: usize, window: u64) -> RateLimiter {
        let mut policies = HashMap::new();
        policies.insert("/test".to_string(), RatePolicy::new(max, window));
        RateLimiter::with_policies(policies, RatePolicy::new(30, 60))
    }

    #[test]
    fn requests_within_limit_are_allowed() {
        let limiter = limiter(3, 60);
        let now = Instant::now();

        for remaining in [2, 1, 0] {
            match limiter.check_at("10.0.0.1", "/test", now) {
                Decision::Allowed { remaining: r, limit, .. } => {
                    assert_eq!(r, remaining);
                    assert_eq!(limit, 3);
                }
                other => panic!("expected Allowed, got {other:?}"),
            }
        }
    }

    #[test]
    fn fourth_request_in_window_is_denied_with_retry_hint() {
        let limiter = limiter(3, 60);
        let now = Instant::now();

        for _ in 0..3 {
            assert!(limiter.check_at("10.0.0.1", "/test", now).is_allowed());
        }
        match limiter.check_at("10.0.0.1", "/test", now) {
            Decision::Limited { retry_after_secs, .. } => {
                assert!(retry_after_secs > 0);
                assert!(retry_after_secs <= 60);
            }
            other => panic!("expected Limited, got {other:?}"),
        }
    }

    #[test]
    fn window_expiry_readmits_the_client() {
        let limiter = limiter(3, 60);
        let start = Instant::now();

        for _ in 0..3 {
            assert!(limiter.check_at("10.0.0.1", "/test", start).is_allowed());
        }
        assert!(!limiter.check_at("10.0.0.1", "/test", start).is_allowed());

        let later = start + Duration::from_secs(61);
        assert!(limiter.check_at("10.0.0.1", "/test", later).is_allowed());
    }

    #[test]
    fn limits_are_per_client_and_per_endpoint() {
        let limiter = limiter(1, 60);
        let now = Instant::now();

        assert!(limiter.check_at("10.0.0.1", "/test", now).is_allowed());
        assert!(!limiter.check_at("10.0.0.1", "/test", now).is_allowed());
        // Different client, same endpoint.
        assert!(limiter.check_at("10.0.0.2", "/test", now).is_allowed());
        // Same client, unlisted endpoint falls back to the default policy.
        assert!(limiter.check_at("10.0.0.1", "/other", now).is_allowed());
    }

    #[test]
    fn sweep_drops_idle_clients() {
        let limiter = limiter(3, 60);
        let start = Instant::now();

        limiter.check_at("10.0.0.1", "/test", start);
        limiter.check_at("10.0.0.2", "/test", start + Duration::from_secs(3000));

        let removed = limiter.sweep_at(
            Duration::from_secs(3600),
            start + Duration::from_secs(4000),
        );
        assert_eq!(removed, 1);
        assert_eq!(limiter.stats().active_clients, 1);
    }
}
