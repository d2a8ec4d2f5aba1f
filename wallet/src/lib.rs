//! Shroud wallet
//!
//! Client side of the shielded-transaction pipeline: the encrypted note
//! store, Merkle inclusion proofs, coin selection and transaction builders,
//! and [`ShieldedClient`] which drives them through the prover and relay.

pub mod builder;
pub mod client;
pub mod external;
pub mod merkle;
pub mod selection;
pub mod store;

pub use builder::{
    BuiltTransaction, ReshieldRequest, TransactionBuilder, TransferRequest, WithdrawRequest,
};
pub use client::{ClientSettings, ShieldedClient, TransactionReceipt, circuit_registry, rate_limiter};
pub use external::{LedgerSigner, StealthAddressProvider};
pub use merkle::{MerkleProofClient, NoRemote, TreeSource};
pub use selection::{SelectionPolicy, check_funds, select_notes};
pub use store::{MetadataPatch, Note, NoteKind, NoteMetadata, NoteStatus, NoteStore};
