//! Shroud error types.
//!
//! Every fallible operation in the pipeline returns [`ShroudError`]. Callers
//! branch on [`ShroudError::kind`] rather than on message text, and can show
//! [`ShroudError::remediation`] to users when it is present.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NoteCreationFailed,
    DecryptionFailed,
    NoSpendableNotes,
    InsufficientBalance,
    MissingCircuit,
    ProofGenerationFailed,
    ProofVerificationFailed,
    RelayAuthenticationFailed,
    SubmissionFailed,
    ConfirmationTimeout,
    CircuitOpen,
    RateLimitExceeded,
    InvalidMerkleProof,
    Timeout,
    Transport,
    Relay,
    DuplicateNullifier,
    InvalidStatusTransition,
    InvalidWitness,
    Serialization,
    Io,
}

/// Errors produced by the shielded-transaction pipeline
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShroudError {
    /// Commitment or nullifier derivation failed
    #[error("Note creation failed: {0}")]
    NoteCreationFailed(String),

    /// Authenticated decryption failed (wrong key or tampered ciphertext)
    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("No spendable notes available")]
    NoSpendableNotes,

    #[error("Insufficient balance: need {required}, have {available}")]
    InsufficientBalance { required: String, available: String },

    /// Circuit material is not registered or could not be resolved
    #[error("Missing circuit material for '{circuit}': {reason}")]
    MissingCircuit { circuit: String, reason: String },

    #[error("Proof generation failed: {0}")]
    ProofGenerationFailed(String),

    #[error("Proof verification failed: {0}")]
    ProofVerificationFailed(String),

    #[error("Relay authentication failed: {0}")]
    RelayAuthenticationFailed(String),

    #[error("Submission failed after {attempts} attempt(s): {reason}")]
    SubmissionFailed { attempts: u32, reason: String },

    #[error("Transaction {tx_hash} not confirmed after {attempts} poll(s)")]
    ConfirmationTimeout { tx_hash: String, attempts: u32 },

    /// The circuit breaker for `endpoint` is open
    #[error("Circuit open for {endpoint}, retry in {retry_after:?}")]
    CircuitOpen {
        endpoint: String,
        retry_after: Duration,
    },

    #[error("Rate limit exceeded for {key}, resets in {retry_after:?}")]
    RateLimitExceeded { key: String, retry_after: Duration },

    #[error("Invalid Merkle proof: {0}")]
    InvalidMerkleProof(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    /// Relay answered with a non-success HTTP status
    #[error("Relay returned {status}: {message}")]
    Relay { status: u16, message: String },

    #[error("Duplicate nullifier: {0}")]
    DuplicateNullifier(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidStatusTransition { from: String, to: String },

    #[error("Invalid witness: {0}")]
    InvalidWitness(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, ShroudError>;

impl ShroudError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoteCreationFailed(_) => ErrorKind::NoteCreationFailed,
            Self::DecryptionFailed => ErrorKind::DecryptionFailed,
            Self::NoSpendableNotes => ErrorKind::NoSpendableNotes,
            Self::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            Self::MissingCircuit { .. } => ErrorKind::MissingCircuit,
            Self::ProofGenerationFailed(_) => ErrorKind::ProofGenerationFailed,
            Self::ProofVerificationFailed(_) => ErrorKind::ProofVerificationFailed,
            Self::RelayAuthenticationFailed(_) => ErrorKind::RelayAuthenticationFailed,
            Self::SubmissionFailed { .. } => ErrorKind::SubmissionFailed,
            Self::ConfirmationTimeout { .. } => ErrorKind::ConfirmationTimeout,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::RateLimitExceeded { .. } => ErrorKind::RateLimitExceeded,
            Self::InvalidMerkleProof(_) => ErrorKind::InvalidMerkleProof,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Relay { .. } => ErrorKind::Relay,
            Self::DuplicateNullifier(_) => ErrorKind::DuplicateNullifier,
            Self::InvalidStatusTransition { .. } => ErrorKind::InvalidStatusTransition,
            Self::InvalidWitness(_) => ErrorKind::InvalidWitness,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Suggested user action, where one exists
    pub fn remediation(&self) -> Option<&'static str> {
        match self.kind() {
            ErrorKind::NoSpendableNotes => {
                Some("Deposit funds or wait for pending notes to be confirmed")
            }
            ErrorKind::InsufficientBalance => {
                Some("Reduce the amount or wait for pending notes to be confirmed")
            }
            ErrorKind::DecryptionFailed => {
                Some("Check the password or key; the data may be corrupted")
            }
            ErrorKind::MissingCircuit => {
                Some("Register circuit material or check the circuit directory/URLs")
            }
            ErrorKind::RelayAuthenticationFailed => Some("Check the relay API key"),
            ErrorKind::CircuitOpen => Some("The relay is unhealthy; retry after the recovery time"),
            ErrorKind::RateLimitExceeded => Some("Slow down and retry after the window resets"),
            ErrorKind::ConfirmationTimeout => {
                Some("Poll the transaction status again later; it may still settle")
            }
            ErrorKind::InvalidMerkleProof => {
                Some("Refresh the commitment tree and rebuild the transaction")
            }
            ErrorKind::DuplicateNullifier => Some("The note is already tracked by this store"),
            _ => None,
        }
    }

    /// Whether the error reflects transient infrastructure trouble worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Transport(_) => true,
            Self::Relay { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Time the caller should wait before retrying, if the error carries one
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after, .. } | Self::RateLimitExceeded { retry_after, .. } => {
                Some(*retry_after)
            }
            _ => None,
        }
    }
}

impl From<std::io::Error> for ShroudError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
