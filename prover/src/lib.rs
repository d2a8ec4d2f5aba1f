//! Shroud Prover
//!
//! Proof orchestration for shielded transactions. The circuits themselves are
//! opaque: this crate resolves circuit material, validates witnesses, and
//! drives an external prover/verifier through [`ProverBackend`].

pub mod backend;
pub mod circuits;
pub mod orchestrator;
pub mod witness;

pub use backend::{MockProver, ProofOutput, Prover, ProverBackend, RemoteProver, RemoteProverConfig};
pub use circuits::{CircuitKind, CircuitMaterial, CircuitRegistry, CircuitSource};
pub use orchestrator::{GENERATE_OP, ProofOrchestrator, VERIFY_OP};
pub use witness::{
    InputNote, OutputNote, ReshieldWitness, SecretBytes, TransferWitness, Witness, WithdrawWitness,
};
