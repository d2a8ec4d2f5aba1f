//! Shroud Privacy SDK
//!
//! Note-based privacy primitives for shielded transactions.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Shielded Transaction                         │
//! │  ┌──────────────┐  ┌──────────────┐  ┌───────────────────────┐ │
//! │  │  Nullifiers  │  │ Commitments  │  │   Encrypted Output    │ │
//! │  │  (spent)     │  │  (new notes) │  │   (for recipient)     │ │
//! │  └──────────────┘  └──────────────┘  └───────────────────────┘ │
//! │         │                 │                     │               │
//! │         ▼                 ▼                     ▼               │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │              ZK Proof (external prover)                  │   │
//! │  │  • Inputs are included in the commitment tree            │   │
//! │  │  • Valid nullifier derivation                            │   │
//! │  │  • Balance preservation: Σ inputs = Σ outputs            │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod amount;
pub mod commitment;
pub mod encryption;
pub mod hash;
pub mod keys;
pub mod merkle;
pub mod note;
pub mod nullifier;

pub use amount::{MAX_AMOUNT_BITS, amount_to_field};
pub use commitment::{Commitment, CommitmentScheme};
pub use encryption::{EncryptedNote, decrypt_note, encrypt_note, open, seal, try_decrypt_note};
pub use hash::Hash;
pub use keys::{ShieldedKeyBundle, SpendingKey, ViewingKey};
pub use merkle::{Direction, LocalTree, MerkleHasher, MerkleProof, RootHistory, depth_for, verify};
pub use note::NotePlaintext;
pub use nullifier::{Nullifier, NullifierKey};
