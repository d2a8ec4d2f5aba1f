//! Circuit breaker for relay and prover endpoints.
//!
//! ```text
//!            failure threshold / failure rate
//!   CLOSED ──────────────────────────────────► OPEN
//!     ▲                                         │
//!     │ success_threshold                       │ recovery_timeout
//!     │ consecutive successes                   ▼
//!     └────────────────────────────────────  HALF_OPEN
//!                                   any failure ──► OPEN
//! ```
//!
//! Only transient errors (timeouts, transport failures, relay 5xx) count as
//! failures. Any other answer proves the endpoint is alive.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use shroud_error::{Result, ShroudError};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it again
    pub success_threshold: u32,
    /// Time spent open before probing
    pub recovery_timeout: Duration,
    /// Sliding window for the failure-rate rule
    pub monitoring_window: Duration,
    /// Failure fraction (0.0..=1.0) above which the circuit opens
    pub failure_rate_threshold: f64,
    /// Samples required in the window before the rate rule applies
    pub minimum_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
            monitoring_window: Duration::from_secs(60),
            failure_rate_threshold: 0.5,
            minimum_requests: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => f.write_str("closed"),
            Self::Open => f.write_str("open"),
            Self::HalfOpen => f.write_str("half-open"),
        }
    }
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitMetrics {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub window_requests: usize,
    pub window_failure_rate: f64,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    /// (when, failed)
    samples: VecDeque<(Instant, bool)>,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
            samples: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some((at, _)) = self.samples.front() {
            if now.saturating_duration_since(*at) > window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn failure_rate(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let failed = self.samples.iter().filter(|(_, failed)| *failed).count();
        failed as f64 / self.samples.len() as f64
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.consecutive_successes = 0;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.opened_at = None;
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
        self.samples.clear();
    }
}

/// Breaker guarding one endpoint. All transitions are computed from a single
/// locked snapshot.
#[derive(Debug)]
pub struct CircuitBreaker {
    endpoint: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(endpoint: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            endpoint: endpoint.into(),
            config,
            inner: Mutex::new(Inner::new()),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Current state, applying the OPEN → HALF_OPEN transition if due
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.advance(&mut inner, Instant::now());
        inner.state
    }

    /// Admit a call or fail fast with `CircuitOpen`
    pub fn try_acquire(&self) -> Result<()> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        self.advance(&mut inner, now);

        if inner.state == CircuitState::Open {
            let elapsed = inner
                .opened_at
                .map(|at| now.saturating_duration_since(at))
                .unwrap_or_default();
            return Err(ShroudError::CircuitOpen {
                endpoint: self.endpoint.clone(),
                retry_after: self.config.recovery_timeout.saturating_sub(elapsed),
            });
        }
        Ok(())
    }

    pub fn record_success(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        self.advance(&mut inner, now);

        inner.consecutive_failures = 0;
        match inner.state {
            CircuitState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    log::info!("circuit for {} closed", self.endpoint);
                    inner.close();
                }
            }
            CircuitState::Closed => {
                inner.samples.push_back((now, false));
                inner.prune(now, self.config.monitoring_window);
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        self.advance(&mut inner, now);

        inner.consecutive_successes = 0;
        match inner.state {
            CircuitState::HalfOpen => {
                log::warn!("circuit for {} re-opened: probe failed", self.endpoint);
                inner.open(now);
            }
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                inner.samples.push_back((now, true));
                inner.prune(now, self.config.monitoring_window);

                let by_count = inner.consecutive_failures >= self.config.failure_threshold;
                let by_rate = inner.samples.len() >= self.config.minimum_requests as usize
                    && inner.failure_rate() > self.config.failure_rate_threshold;

                if by_count || by_rate {
                    log::warn!(
                        "circuit for {} opened ({} consecutive failures, {:.0}% failure rate)",
                        self.endpoint,
                        inner.consecutive_failures,
                        inner.failure_rate() * 100.0
                    );
                    inner.open(now);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Run `f` through the breaker
    pub async fn call<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.try_acquire()?;
        let result = f().await;
        match &result {
            Err(e) if e.is_transient() => self.record_failure(),
            _ => self.record_success(),
        }
        result
    }

    pub fn metrics(&self) -> CircuitMetrics {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        self.advance(&mut inner, now);
        inner.prune(now, self.config.monitoring_window);

        CircuitMetrics {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            window_requests: inner.samples.len(),
            window_failure_rate: inner.failure_rate(),
        }
    }

    /// Force the breaker closed
    pub fn reset(&self) {
        self.inner.lock().close();
    }

    fn advance(&self, inner: &mut Inner, now: Instant) {
        if inner.state != CircuitState::Open {
            return;
        }
        let due = inner
            .opened_at
            .is_some_and(|at| now.saturating_duration_since(at) >= self.config.recovery_timeout);
        if due {
            log::info!("circuit for {} half-open, probing", self.endpoint);
            inner.state = CircuitState::HalfOpen;
            inner.consecutive_successes = 0;
        }
    }
}

/// One breaker per endpoint, created on first use
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    pub fn get(&self, endpoint: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(endpoint) {
            return breaker.clone();
        }
        self.breakers
            .entry(endpoint.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(endpoint, self.config)))
            .clone()
    }

    /// (endpoint, state) for every known endpoint, sorted by endpoint
    pub fn states(&self) -> Vec<(String, CircuitState)> {
        let mut states: Vec<_> = self
            .breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().state()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
    }
}
