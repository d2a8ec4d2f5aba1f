//! Fixed-window request throttling keyed by (operation, caller).

use std::collections::HashMap;
use std::time::Duration;

use dashmap::DashMap;
use shroud_error::{Result, ShroudError};
use tokio::time::Instant;

/// Requests allowed per window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Request-rate limiter shared across components.
///
/// Each operation may carry its own policy; operations without one use the
/// default. Check-and-consume happens under the map shard lock, so two
/// concurrent callers can never both take the last slot.
#[derive(Debug)]
pub struct RateLimiter {
    default: RateLimitConfig,
    policies: HashMap<String, RateLimitConfig>,
    windows: DashMap<(String, String), Window>,
}

impl RateLimiter {
    pub fn new(default: RateLimitConfig) -> Self {
        Self {
            default,
            policies: HashMap::new(),
            windows: DashMap::new(),
        }
    }

    /// Override the policy for one operation
    pub fn with_policy(mut self, operation: impl Into<String>, config: RateLimitConfig) -> Self {
        self.policies.insert(operation.into(), config);
        self
    }

    pub fn policy(&self, operation: &str) -> RateLimitConfig {
        self.policies.get(operation).copied().unwrap_or(self.default)
    }

    /// Admit one request or fail with `RateLimitExceeded`
    pub fn check(&self, operation: &str, caller: &str) -> Result<()> {
        let policy = self.policy(operation);
        let now = Instant::now();

        let mut window = self
            .windows
            .entry((operation.to_string(), caller.to_string()))
            .or_insert(Window {
                started: now,
                count: 0,
            });

        let elapsed = now.saturating_duration_since(window.started);
        if elapsed >= policy.window {
            window.started = now;
            window.count = 0;
        }

        if window.count >= policy.max_requests {
            let retry_after = policy.window.saturating_sub(elapsed);
            log::debug!("rate limit hit for {operation}:{caller}, resets in {retry_after:?}");
            return Err(ShroudError::RateLimitExceeded {
                key: format!("{operation}:{caller}"),
                retry_after,
            });
        }

        window.count += 1;
        Ok(())
    }

    /// Requests left in the caller's current window
    pub fn remaining(&self, operation: &str, caller: &str) -> u32 {
        let policy = self.policy(operation);
        let key = (operation.to_string(), caller.to_string());
        match self.windows.get(&key) {
            Some(w) if w.started.elapsed() < policy.window => {
                policy.max_requests.saturating_sub(w.count)
            }
            _ => policy.max_requests,
        }
    }

    pub fn reset(&self, operation: &str, caller: &str) {
        self.windows
            .remove(&(operation.to_string(), caller.to_string()));
    }

    /// Drop windows that have fully elapsed
    pub fn prune(&self) {
        self.windows.retain(|(operation, _), w| {
            w.started.elapsed() < self.policy(operation).window
        });
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(RateLimitConfig::new(5, Duration::from_millis(1000)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_sixth_request_rejected() {
        let limiter = limiter();
        for _ in 0..5 {
            limiter.check("submit", "alice").unwrap();
        }

        let err = limiter.check("submit", "alice").unwrap_err();
        match err {
            ShroudError::RateLimitExceeded { key, retry_after } => {
                assert_eq!(key, "submit:alice");
                assert!(retry_after <= Duration::from_millis(1000));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets() {
        let limiter = limiter();
        for _ in 0..5 {
            limiter.check("submit", "alice").unwrap();
        }
        assert!(limiter.check("submit", "alice").is_err());

        tokio::time::advance(Duration::from_millis(1000)).await;
        assert!(limiter.check("submit", "alice").is_ok());
        assert_eq!(limiter.remaining("submit", "alice"), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_shrinks() {
        let limiter = RateLimiter::new(RateLimitConfig::new(1, Duration::from_millis(1000)));
        limiter.check("prove", "bob").unwrap();
        tokio::time::advance(Duration::from_millis(400)).await;

        let retry_after = limiter.check("prove", "bob").unwrap_err().retry_after();
        assert_eq!(retry_after, Some(Duration::from_millis(600)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let limiter = RateLimiter::new(RateLimitConfig::new(1, Duration::from_secs(1)))
            .with_policy("verify", RateLimitConfig::new(2, Duration::from_secs(1)));

        limiter.check("prove", "alice").unwrap();
        assert!(limiter.check("prove", "alice").is_err());

        // Other caller, other operation
        limiter.check("prove", "bob").unwrap();
        limiter.check("verify", "alice").unwrap();
        limiter.check("verify", "alice").unwrap();
        assert!(limiter.check("verify", "alice").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_drops_expired() {
        let limiter = limiter();
        limiter.check("submit", "alice").unwrap();
        limiter.check("submit", "bob").unwrap();
        assert_eq!(limiter.tracked_keys(), 2);

        tokio::time::advance(Duration::from_secs(2)).await;
        limiter.prune();
        assert_eq!(limiter.tracked_keys(), 0);
    }
}
