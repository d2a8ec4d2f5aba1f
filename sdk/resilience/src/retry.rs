//! Exponential backoff for transient failures.

use std::future::Future;
use std::time::Duration;

use shroud_error::{Result, ShroudError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// `base · 2^attempt`, capped at `max_delay`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay)
    }

    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

/// Run `op` until it succeeds, fails permanently, or retries run out.
///
/// Only transient errors are retried. Anything else (including `CircuitOpen`
/// and `RateLimitExceeded`) is returned unchanged on first sight. When the
/// retries are exhausted the last transient error is folded into
/// `SubmissionFailed`.
pub async fn retry_with_backoff<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        let err = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => e,
        };

        if attempt >= policy.max_retries {
            log::warn!("{label} failed after {} attempt(s): {err}", attempt + 1);
            return Err(ShroudError::SubmissionFailed {
                attempts: attempt + 1,
                reason: err.to_string(),
            });
        }

        let delay = policy.delay_for(attempt);
        log::debug!(
            "{label} attempt {} failed ({err}), retrying in {delay:?}",
            attempt + 1
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tokio::time::Instant;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(250),
        }
    }

    #[test]
    fn test_delay_schedule() {
        let p = policy();
        assert_eq!(p.delay_for(0), Duration::from_millis(100));
        assert_eq!(p.delay_for(1), Duration::from_millis(200));
        assert_eq!(p.delay_for(2), Duration::from_millis(250));
        assert_eq!(p.delay_for(40), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success() {
        let started = Instant::now();
        let result = retry_with_backoff(&policy(), "submit", |attempt| async move {
            if attempt < 2 {
                Err(ShroudError::Transport("reset".into()))
            } else {
                Ok(attempt)
            }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_becomes_submission_failed() {
        let seen = Mutex::new(Vec::new());
        let result: Result<()> = retry_with_backoff(&policy(), "submit", |attempt| {
            seen.lock().push((attempt, Instant::now()));
            async { Err(ShroudError::Relay { status: 503, message: "busy".into() }) }
        })
        .await;

        match result {
            Err(ShroudError::SubmissionFailed { attempts, reason }) => {
                assert_eq!(attempts, 4);
                assert!(reason.contains("503"));
            }
            other => panic!("expected SubmissionFailed, got {other:?}"),
        }

        let seen = seen.into_inner();
        let gaps: Vec<_> = seen.windows(2).map(|w| w[1].1 - w[0].1).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(250),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_errors_not_retried() {
        for err in [
            ShroudError::RelayAuthenticationFailed("denied".into()),
            ShroudError::CircuitOpen {
                endpoint: "relay".into(),
                retry_after: Duration::from_secs(5),
            },
            ShroudError::RateLimitExceeded {
                key: "submit:alice".into(),
                retry_after: Duration::from_secs(1),
            },
            ShroudError::Relay { status: 400, message: "bad request".into() },
        ] {
            let calls = Mutex::new(0u32);
            let result: Result<()> = retry_with_backoff(&policy(), "submit", |_| {
                *calls.lock() += 1;
                let err = err.clone();
                async move { Err(err) }
            })
            .await;

            assert_eq!(result, Err(err));
            assert_eq!(*calls.lock(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_retry_surfaces_first_failure() {
        let calls = Mutex::new(0u32);
        let result: Result<()> = retry_with_backoff(&RetryPolicy::no_retry(), "status", |_| {
            *calls.lock() += 1;
            async { Err(ShroudError::Timeout(Duration::from_secs(1))) }
        })
        .await;

        assert!(matches!(result, Err(ShroudError::SubmissionFailed { attempts: 1, .. })));
        assert_eq!(*calls.lock(), 1);
    }
}
