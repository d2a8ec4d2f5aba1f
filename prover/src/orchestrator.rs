//! Proof Orchestrator
//!
//! Hands witnesses to the configured backend and asks it to verify proofs.
//!
//! ```text
//! generate_proof(ctx, witness)
//!   1. rate limit  (proof.generate, ctx.caller)
//!   2. validate witness
//!   3. resolve circuit material (cached)   ── MissingCircuit
//!   4. backend.prove under ctx deadline    ── ProofGenerationFailed / Timeout
//! ```

use std::sync::Arc;

use shroud_error::{Result, ShroudError};
use shroud_resilience::{CallContext, RateLimiter};
use tracing::{debug, info, warn};

use crate::backend::{ProofOutput, ProverBackend};
use crate::circuits::{CircuitKind, CircuitRegistry};
use crate::witness::Witness;

/// Rate-limiter operation key for proof generation
pub const GENERATE_OP: &str = "proof.generate";
/// Rate-limiter operation key for proof verification
pub const VERIFY_OP: &str = "proof.verify";

pub struct ProofOrchestrator<B> {
    backend: B,
    circuits: Arc<CircuitRegistry>,
    limiter: Arc<RateLimiter>,
}

impl<B: ProverBackend> ProofOrchestrator<B> {
    pub fn new(backend: B, circuits: Arc<CircuitRegistry>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            backend,
            circuits,
            limiter,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn circuits(&self) -> &CircuitRegistry {
        &self.circuits
    }

    /// Generate a proof for `witness`; the circuit is the witness tag
    pub async fn generate_proof(&self, ctx: &CallContext, witness: &Witness) -> Result<ProofOutput> {
        self.limiter.check(GENERATE_OP, &ctx.caller)?;
        witness.validate()?;

        let kind = witness.kind();
        ctx.run(async {
            let material = self.circuits.resolve(kind).await?;
            debug!(circuit = %kind, backend = self.backend.name(), "generating proof");

            let output = self
                .backend
                .prove(&material, witness)
                .await
                .map_err(|e| match e {
                    ShroudError::ProofGenerationFailed(_) => e,
                    other => ShroudError::ProofGenerationFailed(other.to_string()),
                })?;

            info!(circuit = %kind, signals = output.public_signals.len(), "proof generated");
            Ok(output)
        })
        .await
    }

    /// Verify `proof` against `public_signals`; `Ok(false)` means rejected
    pub async fn verify_proof(
        &self,
        ctx: &CallContext,
        kind: CircuitKind,
        proof: &[u8],
        public_signals: &[String],
    ) -> Result<bool> {
        self.limiter.check(VERIFY_OP, &ctx.caller)?;

        ctx.run(async {
            let material = self.circuits.resolve(kind).await?;
            let valid = self
                .backend
                .verify(&material, kind, proof, public_signals)
                .await
                .map_err(|e| match e {
                    ShroudError::ProofVerificationFailed(_) => e,
                    other => ShroudError::ProofVerificationFailed(other.to_string()),
                })?;

            if !valid {
                warn!(circuit = %kind, "proof rejected by verifier");
            }
            Ok(valid)
        })
        .await
    }
}
