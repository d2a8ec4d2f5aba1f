//! Note Commitments
//!
//! Implements Poseidon-based commitments for notes.
//!
//! ```text
//! Commitment = Poseidon("ShroudCM", amount, randomness, H(recipient))
//! ```
//!
//! This hides the note contents while allowing ZK proofs of knowledge.

use std::fmt;

use ark_bls12_381::Fr;
use ark_std::rand::Rng;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::amount::amount_to_field;
use crate::hash::{bytes_to_field, domain, field_to_bytes, hash_fields, recipient_field};

/// A note commitment (32 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Commitment(#[serde(with = "hex::serde")] pub [u8; 32]);

impl Commitment {
    /// Create commitment from field element
    pub fn from_field(f: Fr) -> Self {
        Self(field_to_bytes(f))
    }

    /// Convert to field element
    pub fn to_field(&self) -> Fr {
        bytes_to_field(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let mut arr = [0u8; 32];
        hex::decode_to_slice(s, &mut arr).ok()?;
        Some(Self(arr))
    }
}

impl AsRef<[u8]> for Commitment {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Commitment scheme using Poseidon hash
#[derive(Debug, Default, Clone, Copy)]
pub struct CommitmentScheme;

impl CommitmentScheme {
    pub fn new() -> Self {
        Self
    }

    /// Commit to a note.
    ///
    /// Returns `None` when the amount cannot be bound into a single field
    /// element.
    pub fn commit(
        &self,
        amount: &BigUint,
        randomness: &[u8; 32],
        recipient: &str,
    ) -> Option<Commitment> {
        let amount_f = amount_to_field(amount)?;
        let result = hash_fields(&[
            domain(b"ShroudCM"),
            amount_f,
            bytes_to_field(randomness),
            recipient_field(recipient),
        ]);
        Some(Commitment::from_field(result))
    }

    /// Generate random blinding factor
    pub fn random_blinding<R: Rng>(rng: &mut R) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::One;

    #[test]
    fn test_commitment_deterministic() {
        let scheme = CommitmentScheme::new();
        let amount = BigUint::from(1000u32);
        let randomness = [42u8; 32];

        let c1 = scheme.commit(&amount, &randomness, "alice").unwrap();
        let c2 = scheme.commit(&amount, &randomness, "alice").unwrap();

        assert_eq!(c1, c2, "same inputs should produce same commitment");
    }

    #[test]
    fn test_commitment_hiding() {
        let scheme = CommitmentScheme::new();
        let amount = BigUint::from(1000u32);

        let c1 = scheme.commit(&amount, &[1u8; 32], "alice").unwrap();
        let c2 = scheme.commit(&amount, &[2u8; 32], "alice").unwrap();

        assert_ne!(c1, c2, "different randomness should produce different commitments");
    }

    #[test]
    fn test_commitment_binding() {
        let scheme = CommitmentScheme::new();
        let randomness = [42u8; 32];

        let c1 = scheme.commit(&BigUint::from(1000u32), &randomness, "alice").unwrap();
        let c2 = scheme.commit(&BigUint::from(2000u32), &randomness, "alice").unwrap();
        let c3 = scheme.commit(&BigUint::from(1000u32), &randomness, "bob").unwrap();

        assert_ne!(c1, c2, "different amounts should produce different commitments");
        assert_ne!(c1, c3, "different recipients should produce different commitments");
    }

    #[test]
    fn test_commitment_rejects_oversized_amount() {
        let scheme = CommitmentScheme::new();
        let too_big = BigUint::one() << 300u32;
        assert!(scheme.commit(&too_big, &[0u8; 32], "alice").is_none());
    }

    #[test]
    fn test_hex_roundtrip() {
        let c = Commitment([7u8; 32]);
        assert_eq!(Commitment::from_hex(&c.to_hex()), Some(c));
        assert_eq!(
            serde_json::to_string(&c).unwrap(),
            format!("\"{}\"", c.to_hex())
        );
    }
}
