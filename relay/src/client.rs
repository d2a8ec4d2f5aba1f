//! Submission Client
//!
//! ```text
//! submit(ctx, submission)
//!   RateLimiter (relay.submit, ctx.caller)     ── RateLimitExceeded
//!     └─ retry_with_backoff (transient only)   ── SubmissionFailed
//!          └─ CircuitBreaker ("submit")        ── CircuitOpen
//!               └─ ctx deadline                ── Timeout
//!                    └─ AuthSession            ── RelayAuthenticationFailed
//!                         └─ RelayTransport
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use shroud_config::{RelayConfig, ShroudConfig};
use shroud_error::{Result, ShroudError};
use shroud_privacy::MerkleProof;
use shroud_resilience::{
    CallContext, CircuitBreakerConfig, CircuitBreakerRegistry, RateLimiter, RetryPolicy,
    retry_with_backoff,
};
use tracing::{debug, info, warn};

use crate::auth::AuthSession;
use crate::transport::{HttpRelayTransport, RelayTransport};
use crate::types::{
    FeeEstimate, HealthResponse, MerkleRootResponse, RelaySubmission, StatusResponse,
    SubmitResponse, TxStatus,
};

/// Rate-limiter operation keys
pub const SUBMIT_OP: &str = "relay.submit";
pub const STATUS_OP: &str = "relay.status";
pub const FEES_OP: &str = "relay.estimate_fees";

/// Circuit-breaker endpoint names
pub const SUBMIT_ENDPOINT: &str = "relay/submit-transaction";
pub const STATUS_ENDPOINT: &str = "relay/transaction-status";
pub const FEES_ENDPOINT: &str = "relay/estimate-fees";
pub const MERKLE_ENDPOINT: &str = "relay/merkle";

/// Client-side settings for a [`SubmissionClient`]
#[derive(Debug, Clone)]
pub struct SubmissionSettings {
    pub api_key: Option<String>,
    pub chain_type: String,
    pub retry: RetryPolicy,
    pub poll_interval: Duration,
    pub token_refresh_margin: Duration,
}

impl Default for SubmissionSettings {
    fn default() -> Self {
        let relay = RelayConfig::default();
        Self {
            api_key: None,
            chain_type: relay.chain_type.clone(),
            retry: RetryPolicy::default(),
            poll_interval: relay.poll_interval(),
            token_refresh_margin: relay.token_refresh_margin(),
        }
    }
}

impl SubmissionSettings {
    pub fn from_config(config: &ShroudConfig) -> Self {
        Self {
            api_key: config.relay.api_key.clone(),
            chain_type: config.relay.chain_type.clone(),
            retry: retry_policy(config),
            poll_interval: config.relay.poll_interval(),
            token_refresh_margin: config.relay.token_refresh_margin(),
        }
    }
}

/// Retry policy from the `[retry]` section
pub fn retry_policy(config: &ShroudConfig) -> RetryPolicy {
    RetryPolicy {
        max_retries: config.retry.max_retries,
        base_delay: Duration::from_millis(config.retry.base_delay_ms),
        max_delay: Duration::from_millis(config.retry.max_delay_ms),
    }
}

/// Breaker thresholds from the `[circuit_breaker]` section
pub fn breaker_config(config: &ShroudConfig) -> CircuitBreakerConfig {
    let cb = &config.circuit_breaker;
    CircuitBreakerConfig {
        failure_threshold: cb.failure_threshold,
        success_threshold: cb.success_threshold,
        recovery_timeout: Duration::from_millis(cb.recovery_timeout_ms),
        monitoring_window: Duration::from_millis(cb.monitoring_window_ms),
        failure_rate_threshold: cb.failure_rate_threshold,
        minimum_requests: cb.minimum_requests,
    }
}

pub struct SubmissionClient<T> {
    transport: Arc<T>,
    auth: AuthSession<T>,
    limiter: Arc<RateLimiter>,
    breakers: Arc<CircuitBreakerRegistry>,
    settings: SubmissionSettings,
    tracked: DashMap<String, TxStatus>,
}

impl SubmissionClient<HttpRelayTransport> {
    /// HTTP client built from configuration
    pub fn from_config(
        config: &ShroudConfig,
        limiter: Arc<RateLimiter>,
        breakers: Arc<CircuitBreakerRegistry>,
    ) -> Result<Self> {
        let transport = HttpRelayTransport::new(&config.relay.url, config.relay.timeout())?;
        Ok(Self::new(
            Arc::new(transport),
            limiter,
            breakers,
            SubmissionSettings::from_config(config),
        ))
    }
}

impl<T: RelayTransport> SubmissionClient<T> {
    pub fn new(
        transport: Arc<T>,
        limiter: Arc<RateLimiter>,
        breakers: Arc<CircuitBreakerRegistry>,
        settings: SubmissionSettings,
    ) -> Self {
        let auth = AuthSession::new(
            transport.clone(),
            settings.api_key.clone(),
            settings.token_refresh_margin,
        );
        Self {
            transport,
            auth,
            limiter,
            breakers,
            settings,
            tracked: DashMap::new(),
        }
    }

    pub fn chain_type(&self) -> &str {
        &self.settings.chain_type
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    /// Last status observed for a submission made through this client
    pub fn tracked_status(&self, tx_hash: &str) -> Option<TxStatus> {
        self.tracked.get(tx_hash).map(|s| *s)
    }

    /// Submit a proven transaction to the relay
    pub async fn submit(&self, ctx: &CallContext, submission: &RelaySubmission) -> Result<SubmitResponse> {
        self.limiter.check(SUBMIT_OP, &ctx.caller)?;

        debug!(status = %TxStatus::Submitting, chain = %submission.chain_type, "submitting transaction");
        let response = self
            .guarded(ctx, SUBMIT_ENDPOINT, move |token| async move {
                self.transport.submit(&token, submission).await
            })
            .await
            .inspect_err(|e| warn!(error = %e, status = %TxStatus::Failed, "submission failed"))?;

        info!(tx_hash = %response.tx_hash, status = %response.status, "transaction accepted by relay");
        self.track(&response.tx_hash, TxStatus::Pending);
        Ok(response)
    }

    /// Poll the relay once for `tx_hash`
    pub async fn get_status(&self, ctx: &CallContext, tx_hash: &str) -> Result<StatusResponse> {
        self.limiter.check(STATUS_OP, &ctx.caller)?;
        let response = self
            .guarded(ctx, STATUS_ENDPOINT, move |token| async move {
                self.transport.status(&token, tx_hash).await
            })
            .await?;
        self.track(tx_hash, response.status);
        Ok(response)
    }

    /// Poll at a fixed interval until the transaction settles or
    /// `max_attempts` polls have been made
    pub async fn wait_for_confirmation(
        &self,
        ctx: &CallContext,
        tx_hash: &str,
        max_attempts: u32,
    ) -> Result<StatusResponse> {
        self.limiter.check(STATUS_OP, &ctx.caller)?;
        let breaker = self.breakers.get(STATUS_ENDPOINT);

        for attempt in 1..=max_attempts {
            let polled = breaker
                .call(move || {
                    ctx.run(self.auth.call(move |token| async move {
                        self.transport.status(&token, tx_hash).await
                    }))
                })
                .await;

            match polled {
                Ok(status) => {
                    debug!(tx_hash, attempt, status = %status.status, "polled transaction status");
                    self.track(tx_hash, status.status);
                    match status.status {
                        TxStatus::Success => return Ok(status),
                        TxStatus::Failed => {
                            return Err(ShroudError::SubmissionFailed {
                                attempts: attempt,
                                reason: status
                                    .error
                                    .unwrap_or_else(|| "relay reported failure".to_string()),
                            });
                        }
                        _ => {}
                    }
                }
                Err(e) if e.is_transient() => {
                    warn!(tx_hash, attempt, error = %e, "status poll failed, continuing");
                }
                Err(e) => return Err(e),
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.settings.poll_interval).await;
            }
        }

        Err(ShroudError::ConfirmationTimeout {
            tx_hash: tx_hash.to_string(),
            attempts: max_attempts,
        })
    }

    pub async fn estimate_fees(&self, ctx: &CallContext, submission: &RelaySubmission) -> Result<FeeEstimate> {
        self.limiter.check(FEES_OP, &ctx.caller)?;
        self.guarded(ctx, FEES_ENDPOINT, move |token| async move {
            self.transport.estimate_fees(&token, submission).await
        })
        .await
    }

    /// Unauthenticated liveness probe; bypasses the breakers
    pub async fn health(&self, ctx: &CallContext) -> Result<HealthResponse> {
        ctx.run(self.transport.health()).await
    }

    /// Current commitment-tree root; transient failures are not retried
    pub async fn merkle_root(&self, ctx: &CallContext) -> Result<MerkleRootResponse> {
        self.unretried(ctx, MERKLE_ENDPOINT, move |token| async move {
            self.transport.merkle_root(&token).await
        })
        .await
    }

    /// Inclusion path for a commitment; transient failures are not retried
    pub async fn merkle_proof(&self, ctx: &CallContext, commitment_hex: &str) -> Result<MerkleProof> {
        self.unretried(ctx, MERKLE_ENDPOINT, move |token| async move {
            self.transport.merkle_proof(&token, commitment_hex).await
        })
        .await
    }

    /// retry → breaker → deadline → auth → `f`
    async fn guarded<R, F, Fut>(&self, ctx: &CallContext, endpoint: &str, f: F) -> Result<R>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let f = &f;
        retry_with_backoff(&self.settings.retry, endpoint, move |_| {
            self.unretried(ctx, endpoint, f)
        })
        .await
    }

    /// breaker → deadline → auth → `f`
    async fn unretried<R, F, Fut>(&self, ctx: &CallContext, endpoint: &str, f: F) -> Result<R>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let breaker = self.breakers.get(endpoint);
        breaker.call(move || ctx.run(self.auth.call(f))).await
    }

    fn track(&self, tx_hash: &str, next: TxStatus) {
        let mut entry = self.tracked.entry(tx_hash.to_string()).or_insert(TxStatus::Submitting);
        if *entry == next {
            return;
        }
        if !entry.can_advance_to(next) {
            warn!(tx_hash, from = %*entry, to = %next, "unexpected status transition from relay");
        }
        *entry = next;
    }
}
