//! Shielded key hierarchy
//!
//! ```text
//! spending key (ask)
//!   ├── nullifier key      nk  = Poseidon("ShroudNK", ask)
//!   ├── viewing key        ivk = Poseidon("ShroudIVK", ask)
//!   ├── public key         pk  = Poseidon("ShroudPK", ask)
//!   ├── storage key        blake3-derive("shroud-note-store-v1", ask)
//!   └── encryption secret  blake3-derive("shroud-note-encryption-v1", ask)  (X25519)
//! ```

use std::fmt;

use ark_std::rand::Rng;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::hash::{bytes_to_field, domain, field_to_bytes, hash_fields};
use crate::nullifier::NullifierKey;

/// Spending key - allows spending notes
///
/// This is the most sensitive key. Loss = loss of funds.
/// Compromise = theft of funds.
#[derive(Clone)]
pub struct SpendingKey {
    key: [u8; 32],
}

impl SpendingKey {
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        let mut key = [0u8; 32];
        rng.fill_bytes(&mut key);
        Self { key }
    }

    pub fn from_bytes(key: [u8; 32]) -> Self {
        Self { key }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }

    /// Derive the nullifier key (nk)
    ///
    /// nk is the only key material a prover sees, so it must not reveal ask.
    pub fn nullifier_key(&self) -> NullifierKey {
        let nk = hash_fields(&[domain(b"ShroudNK"), bytes_to_field(&self.key)]);
        NullifierKey::from_bytes(field_to_bytes(nk))
    }

    /// Derive the viewing key (for read-only access)
    pub fn viewing_key(&self) -> ViewingKey {
        let ivk = hash_fields(&[domain(b"ShroudIVK"), bytes_to_field(&self.key)]);
        ViewingKey {
            key: field_to_bytes(ivk),
        }
    }

    /// Derive the public key (address material)
    pub fn public_key(&self) -> [u8; 32] {
        field_to_bytes(hash_fields(&[domain(b"ShroudPK"), bytes_to_field(&self.key)]))
    }

    /// Symmetric key protecting notes at rest
    pub fn storage_key(&self) -> [u8; 32] {
        blake3::derive_key("shroud-note-store-v1", &self.key)
    }

    /// X25519 secret used to receive encrypted notes
    pub fn encryption_secret(&self) -> StaticSecret {
        StaticSecret::from(blake3::derive_key("shroud-note-encryption-v1", &self.key))
    }

    pub fn encryption_public_key(&self) -> [u8; 32] {
        *PublicKey::from(&self.encryption_secret()).as_bytes()
    }
}

impl fmt::Debug for SpendingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpendingKey").finish_non_exhaustive()
    }
}

/// Viewing key - allows viewing but not spending notes
#[derive(Debug, Clone)]
pub struct ViewingKey {
    key: [u8; 32],
}

impl ViewingKey {
    pub fn from_bytes(key: [u8; 32]) -> Self {
        Self { key }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}

/// Full key bundle for a shielded address
#[derive(Debug, Clone)]
pub struct ShieldedKeyBundle {
    /// Spending key (secret - allows spending)
    pub spending_key: SpendingKey,
    /// Viewing key (allows viewing but not spending)
    pub viewing_key: ViewingKey,
    /// Public key / address (can be shared publicly)
    pub public_key: [u8; 32],
}

impl ShieldedKeyBundle {
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        Self::from_spending_key(SpendingKey::random(rng))
    }

    pub fn from_spending_key(spending_key: SpendingKey) -> Self {
        let viewing_key = spending_key.viewing_key();
        let public_key = spending_key.public_key();

        Self {
            spending_key,
            viewing_key,
            public_key,
        }
    }

    /// Opaque recipient address for notes owned by this bundle
    pub fn address(&self) -> String {
        format!("shroud:{}", hex::encode(self.public_key))
    }
}
