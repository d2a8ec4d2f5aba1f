//! Shielded note plaintexts
//!
//! ```text
//! NotePlaintext = {
//!     amount: BigUint,       // Arbitrary-precision amount
//!     recipient: String,     // Opaque owner identifier
//!     randomness: [u8; 32],  // Blinding factor
//!     memo: Option<String>,
//! }
//! ```
//!
//! The plaintext is what gets encrypted, either to a recipient (on-chain
//! output) or under the local storage key (at rest).

use ark_std::rand::Rng;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::amount::decimal;
use crate::commitment::{Commitment, CommitmentScheme};
use crate::nullifier::{Nullifier, NullifierKey};

/// Maximum memo length in bytes
pub const MAX_MEMO_LEN: usize = 512;

/// Private contents of a note
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotePlaintext {
    #[serde(with = "decimal")]
    pub amount: BigUint,
    pub recipient: String,
    #[serde(with = "hex::serde")]
    pub randomness: [u8; 32],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
}

impl NotePlaintext {
    /// Create a new note with random blinding
    pub fn new<R: Rng>(amount: BigUint, recipient: impl Into<String>, rng: &mut R) -> Self {
        Self::with_randomness(amount, recipient, CommitmentScheme::random_blinding(rng))
    }

    /// Create a note with explicit randomness (for testing/recovery)
    pub fn with_randomness(
        amount: BigUint,
        recipient: impl Into<String>,
        randomness: [u8; 32],
    ) -> Self {
        Self {
            amount,
            recipient: recipient.into(),
            randomness,
            memo: None,
        }
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        let mut memo = memo.into();
        if memo.len() > MAX_MEMO_LEN {
            let mut end = MAX_MEMO_LEN;
            while !memo.is_char_boundary(end) {
                end -= 1;
            }
            memo.truncate(end);
        }
        self.memo = Some(memo);
        self
    }

    /// Compute the commitment, or `None` if the note cannot be committed
    pub fn commitment(&self) -> Option<Commitment> {
        if self.recipient.is_empty() {
            return None;
        }
        CommitmentScheme::new().commit(&self.amount, &self.randomness, &self.recipient)
    }

    /// Derive the nullifier for spending this note
    pub fn nullifier(&self, key: &NullifierKey) -> Option<Nullifier> {
        Some(key.derive_nullifier(&self.commitment()?))
    }
}
