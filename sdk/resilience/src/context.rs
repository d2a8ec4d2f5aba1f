use std::future::Future;
use std::time::Duration;

use shroud_error::{Result, ShroudError};

/// Default deadline for a single network-bound call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-call context: who is calling and how long they are willing to wait.
///
/// The caller identity keys the rate limiter. The timeout bounds a single
/// attempt: callers that retry apply it afresh to each attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    pub caller: String,
    pub timeout: Duration,
}

impl CallContext {
    pub fn new(caller: impl Into<String>, timeout: Duration) -> Self {
        Self {
            caller: caller.into(),
            timeout,
        }
    }

    /// Context with the default deadline
    pub fn for_caller(caller: impl Into<String>) -> Self {
        Self::new(caller, DEFAULT_CALL_TIMEOUT)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Drive `fut` to completion or fail with [`ShroudError::Timeout`]
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ShroudError::Timeout(self.timeout)),
        }
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::for_caller("anonymous")
    }
}
