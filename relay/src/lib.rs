//! Shroud relay client
//!
//! Submits proven shielded transactions to an off-chain relay and tracks
//! them to settlement. Every call passes through a per-caller rate limiter,
//! exponential-backoff retry, a per-endpoint circuit breaker and a bearer
//! token session.

pub mod auth;
pub mod client;
pub mod transport;
pub mod types;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use auth::AuthSession;
pub use client::{
    FEES_OP, STATUS_OP, SUBMIT_OP, SubmissionClient, SubmissionSettings, breaker_config,
    retry_policy,
};
pub use transport::{HttpRelayTransport, RelayTransport};
pub use types::{
    FeeEstimate, HealthResponse, LoginRequest, LoginResponse, MerkleRootResponse, RelaySubmission,
    StatusResponse, SubmitResponse, TxStatus,
};
