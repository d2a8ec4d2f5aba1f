//! Proving backends.
//!
//! ```text
//! ProofOrchestrator
//!        │
//!        ▼
//!   ProverBackend ──┬── MockProver    deterministic keyed hash (tests, dev)
//!                   └── RemoteProver  HTTP prover coordinator
//!                         POST /v1/prove
//!                         POST /v1/verify
//!                         GET  /v1/health
//! ```

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shroud_config::{ProverConfig, ProverMode};
use shroud_error::{Result, ShroudError};
use tracing::{debug, info, warn};

use crate::circuits::{CircuitKind, CircuitMaterial};
use crate::witness::Witness;

/// Proof plus the public signals it commits to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofOutput {
    #[serde(with = "hex::serde")]
    pub proof: Vec<u8>,
    pub public_signals: Vec<String>,
}

/// An external prover/verifier
pub trait ProverBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn prove(
        &self,
        material: &CircuitMaterial,
        witness: &Witness,
    ) -> impl Future<Output = Result<ProofOutput>> + Send;

    /// `Ok(false)` is a valid verdict; `Err` means the verifier itself failed
    fn verify(
        &self,
        material: &CircuitMaterial,
        kind: CircuitKind,
        proof: &[u8],
        public_signals: &[String],
    ) -> impl Future<Output = Result<bool>> + Send;
}

// ============================================================================
// Mock Prover
// ============================================================================

const MOCK_PROOF_LEN: usize = 256;

/// Deterministic test double.
///
/// The proof is a keyed hash of the circuit, material digest and public
/// signals, padded to a Groth16-like size. Verification recomputes it, so a
/// proof only verifies against the exact signals it was produced for.
#[derive(Debug, Clone, Default)]
pub struct MockProver {
    /// Simulated proving time
    prove_delay: Duration,
}

impl MockProver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with custom proving time (for testing)
    pub fn with_prove_delay(prove_delay: Duration) -> Self {
        Self { prove_delay }
    }

    fn tag(material: &CircuitMaterial, kind: CircuitKind, public_signals: &[String]) -> [u8; 32] {
        let key = blake3::derive_key("shroud-mock-prover-v1", &material.digest());
        let mut hasher = blake3::Hasher::new_keyed(&key);
        hasher.update(kind.name().as_bytes());
        for signal in public_signals {
            hasher.update(&(signal.len() as u64).to_le_bytes());
            hasher.update(signal.as_bytes());
        }
        *hasher.finalize().as_bytes()
    }
}

impl ProverBackend for MockProver {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn prove(&self, material: &CircuitMaterial, witness: &Witness) -> Result<ProofOutput> {
        if !self.prove_delay.is_zero() {
            tokio::time::sleep(self.prove_delay).await;
        }

        let public_signals = witness.public_signals();
        let mut proof = Vec::with_capacity(MOCK_PROOF_LEN);
        proof.extend_from_slice(&Self::tag(material, witness.kind(), &public_signals));
        proof.resize(MOCK_PROOF_LEN, 0);

        Ok(ProofOutput {
            proof,
            public_signals,
        })
    }

    async fn verify(
        &self,
        material: &CircuitMaterial,
        kind: CircuitKind,
        proof: &[u8],
        public_signals: &[String],
    ) -> Result<bool> {
        if proof.len() != MOCK_PROOF_LEN {
            return Ok(false);
        }
        let expected = Self::tag(material, kind, public_signals);
        Ok(proof[..32] == expected && proof[32..].iter().all(|b| *b == 0))
    }
}

// ============================================================================
// Remote Prover
// ============================================================================

/// Configuration for the remote prover client
#[derive(Debug, Clone)]
pub struct RemoteProverConfig {
    /// Base URL of the prover coordinator (e.g., "http://localhost:8080")
    pub url: String,
    /// Timeout for a single HTTP exchange (default: 5 minutes)
    pub request_timeout: Duration,
}

impl Default for RemoteProverConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080".to_string(),
            request_timeout: Duration::from_secs(300),
        }
    }
}

/// API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ApiResponse<T> {
    Success {
        data: T,
    },
    Error {
        message: String,
        code: Option<String>,
    },
}

#[derive(Debug, Serialize)]
struct ProveRequest<'a> {
    circuit: CircuitKind,
    material_digest: String,
    witness: &'a Witness,
}

#[derive(Debug, Serialize)]
struct VerifyRequest<'a> {
    circuit: CircuitKind,
    material_digest: String,
    proof: String,
    public_signals: &'a [String],
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    valid: bool,
}

/// Client for an HTTP prover coordinator
#[derive(Debug, Clone)]
pub struct RemoteProver {
    config: RemoteProverConfig,
    client: reqwest::Client,
}

impl RemoteProver {
    pub fn new(config: RemoteProverConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ShroudError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    /// Check if the prover coordinator is healthy
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/v1/health", self.config.url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!("Prover coordinator health check failed: {}", e);
                false
            }
        }
    }

    async fn post<B: Serialize, T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
        on_error: fn(String) -> ShroudError,
    ) -> Result<T> {
        let url = format!("{}{}", self.config.url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| ShroudError::Transport(format!("prover coordinator unreachable: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(on_error(format!("coordinator returned {status}: {body}")));
        }

        let api_response: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| on_error(format!("failed to parse coordinator response: {e}")))?;

        match api_response {
            ApiResponse::Success { data } => Ok(data),
            ApiResponse::Error { message, code } => Err(on_error(format!(
                "{} ({})",
                message,
                code.unwrap_or_else(|| "unknown".to_string())
            ))),
        }
    }
}

impl ProverBackend for RemoteProver {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn prove(&self, material: &CircuitMaterial, witness: &Witness) -> Result<ProofOutput> {
        let request = ProveRequest {
            circuit: witness.kind(),
            material_digest: hex::encode(material.digest()),
            witness,
        };
        info!(circuit = %witness.kind(), inputs = witness.inputs().len(), "requesting remote proof");
        let output: ProofOutput = self
            .post("/v1/prove", &request, ShroudError::ProofGenerationFailed)
            .await?;
        debug!(proof_len = output.proof.len(), "remote proof received");
        Ok(output)
    }

    async fn verify(
        &self,
        material: &CircuitMaterial,
        kind: CircuitKind,
        proof: &[u8],
        public_signals: &[String],
    ) -> Result<bool> {
        let request = VerifyRequest {
            circuit: kind,
            material_digest: hex::encode(material.digest()),
            proof: hex::encode(proof),
            public_signals,
        };
        let response: VerifyResponse = self
            .post("/v1/verify", &request, ShroudError::ProofVerificationFailed)
            .await?;
        Ok(response.valid)
    }
}

// ============================================================================
// Configured backend
// ============================================================================

/// Backend chosen by configuration. There is no silent fallback: a remote
/// mode without a URL is a configuration error.
#[derive(Debug, Clone)]
pub enum Prover {
    Mock(MockProver),
    Remote(RemoteProver),
}

impl Prover {
    pub fn from_config(config: &ProverConfig) -> Result<Self> {
        match config.mode {
            ProverMode::Mock => Ok(Self::Mock(MockProver::new())),
            ProverMode::Remote => {
                let url = config.url.clone().ok_or_else(|| {
                    ShroudError::ProofGenerationFailed(
                        "remote prover mode requires prover.url".into(),
                    )
                })?;
                Ok(Self::Remote(RemoteProver::new(RemoteProverConfig {
                    url: url.trim_end_matches('/').to_string(),
                    request_timeout: config.timeout(),
                })?))
            }
        }
    }
}

impl ProverBackend for Prover {
    fn name(&self) -> &'static str {
        match self {
            Self::Mock(p) => p.name(),
            Self::Remote(p) => p.name(),
        }
    }

    async fn prove(&self, material: &CircuitMaterial, witness: &Witness) -> Result<ProofOutput> {
        match self {
            Self::Mock(p) => p.prove(material, witness).await,
            Self::Remote(p) => p.prove(material, witness).await,
        }
    }

    async fn verify(
        &self,
        material: &CircuitMaterial,
        kind: CircuitKind,
        proof: &[u8],
        public_signals: &[String],
    ) -> Result<bool> {
        match self {
            Self::Mock(p) => p.verify(material, kind, proof, public_signals).await,
            Self::Remote(p) => p.verify(material, kind, proof, public_signals).await,
        }
    }
}
