//! Resilience primitives shared by the prover and relay clients.
//!
//! ```text
//! caller ──► RateLimiter ──► retry_with_backoff ──► CircuitBreaker ──► network
//!             (admission)      (transient only)      (per endpoint)
//! ```
//!
//! Every network-bound call carries a [`CallContext`] naming the caller and
//! bounding the call with a deadline.

pub mod circuit_breaker;
pub mod context;
pub mod rate_limit;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitMetrics, CircuitState,
};
pub use context::CallContext;
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use retry::{RetryPolicy, retry_with_backoff};
