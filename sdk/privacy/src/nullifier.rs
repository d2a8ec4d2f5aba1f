//! Nullifiers
//!
//! Implements nullifier derivation for double-spend prevention.
//!
//! ```text
//! Nullifier = PRF(nullifier_key, note_commitment)
//! ```
//!
//! Once a nullifier is published, the corresponding note cannot be spent again.

use std::fmt;

use ark_bls12_381::Fr;
use serde::{Deserialize, Serialize};

use crate::commitment::Commitment;
use crate::hash::{bytes_to_field, field_to_bytes, hash_fields};

/// A nullifier (32 bytes) - unique tag for a spent note
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Nullifier(#[serde(with = "hex::serde")] pub [u8; 32]);

impl Nullifier {
    /// Create from field element
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

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl AsRef<[u8]> for Nullifier {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Nullifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Nullifier derivation key
///
/// Knowledge of this key is required to derive valid nullifiers.
#[derive(Clone)]
pub struct NullifierKey {
    key: [u8; 32],
}

impl NullifierKey {
    pub fn from_bytes(key: [u8; 32]) -> Self {
        Self { key }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }

    /// Nullifier = PRF_nk(commitment)
    pub fn derive_nullifier(&self, commitment: &Commitment) -> Nullifier {
        let result = hash_fields(&[
            Fr::from(0x4e554c4c_u64), // "NULL"
            bytes_to_field(&self.key),
            commitment.to_field(),
        ]);
        Nullifier::from_field(result)
    }
}

impl fmt::Debug for NullifierKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NullifierKey").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nullifier_deterministic() {
        let key = NullifierKey::from_bytes([1u8; 32]);
        let commitment = Commitment([2u8; 32]);

        let n1 = key.derive_nullifier(&commitment);
        let n2 = key.derive_nullifier(&commitment);

        assert_eq!(n1, n2, "same inputs should produce same nullifier");
    }

    #[test]
    fn test_nullifier_unique_per_note() {
        let key = NullifierKey::from_bytes([1u8; 32]);

        let n1 = key.derive_nullifier(&Commitment([1u8; 32]));
        let n2 = key.derive_nullifier(&Commitment([2u8; 32]));

        assert_ne!(n1, n2, "different notes should have different nullifiers");
    }

    #[test]
    fn test_nullifier_requires_key() {
        let key1 = NullifierKey::from_bytes([1u8; 32]);
        let key2 = NullifierKey::from_bytes([2u8; 32]);
        let commitment = Commitment([3u8; 32]);

        assert_ne!(
            key1.derive_nullifier(&commitment),
            key2.derive_nullifier(&commitment),
            "different keys should produce different nullifiers"
        );
    }

    #[test]
    fn test_nullifier_differs_from_commitment() {
        let key = NullifierKey::from_bytes([9u8; 32]);
        let commitment = Commitment([4u8; 32]);
        assert_ne!(key.derive_nullifier(&commitment).0, commitment.0);
    }
}
