//! Note Encryption
//!
//! Recipient encryption uses ECDH + ChaCha20-Poly1305:
//!
//! ```text
//! 1. Sender generates ephemeral keypair (epk, esk)
//! 2. Shared secret = ECDH(esk, recipient_pk)
//! 3. Encryption key = KDF(shared_secret || epk, "shroud-note-v1")
//! 4. Ciphertext = ChaCha20-Poly1305(key, nonce, plaintext)
//! 5. Output = (epk, nonce, ciphertext || tag)
//! ```
//!
//! At-rest sealing uses the same AEAD under a local symmetric key, with the
//! random nonce prepended: `nonce (12) || ciphertext || tag (16)`.

use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit},
};
use num_bigint::BigUint;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use shroud_error::{Result, ShroudError};
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use crate::note::NotePlaintext;

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// An encrypted note (sent on-chain)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedNote {
    /// Ephemeral public key for ECDH
    #[serde(with = "hex::serde")]
    pub ephemeral_pk: [u8; 32],
    /// Nonce for ChaCha20-Poly1305
    #[serde(with = "hex::serde")]
    pub nonce: [u8; 12],
    /// Encrypted note data with authentication tag
    #[serde(with = "hex::serde")]
    pub ciphertext: Vec<u8>,
}

/// Encrypt a note for a recipient's X25519 public key
pub fn encrypt_note(note: &NotePlaintext, recipient_pk: &[u8; 32]) -> Result<EncryptedNote> {
    let mut rng = rand::thread_rng();
    let ephemeral_secret = EphemeralSecret::random_from_rng(&mut rng);
    let ephemeral_pk = PublicKey::from(&ephemeral_secret);

    let shared_secret = ephemeral_secret.diffie_hellman(&PublicKey::from(*recipient_pk));
    let encryption_key = derive_note_key(shared_secret.as_bytes(), ephemeral_pk.as_bytes());

    let plaintext_bytes = serialize_plaintext(note)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rng.fill_bytes(&mut nonce_bytes);

    let cipher = ChaCha20Poly1305::new(&encryption_key.into());
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext_bytes.as_slice())
        .map_err(|_| ShroudError::NoteCreationFailed("note encryption failed".into()))?;

    Ok(EncryptedNote {
        ephemeral_pk: *ephemeral_pk.as_bytes(),
        nonce: nonce_bytes,
        ciphertext,
    })
}

/// Decrypt a note using the recipient's X25519 secret
pub fn decrypt_note(encrypted: &EncryptedNote, recipient_sk: &StaticSecret) -> Result<NotePlaintext> {
    let shared_secret = recipient_sk.diffie_hellman(&PublicKey::from(encrypted.ephemeral_pk));
    let decryption_key = derive_note_key(shared_secret.as_bytes(), &encrypted.ephemeral_pk);

    let cipher = ChaCha20Poly1305::new(&decryption_key.into());
    let plaintext_bytes = cipher
        .decrypt(Nonce::from_slice(&encrypted.nonce), encrypted.ciphertext.as_slice())
        .map_err(|_| ShroudError::DecryptionFailed)?;

    deserialize_plaintext(&plaintext_bytes).ok_or(ShroudError::DecryptionFailed)
}

/// Try to decrypt a note (scan mode)
///
/// Returns the note only if decryption succeeds and the commitment matches.
pub fn try_decrypt_note(
    encrypted: &EncryptedNote,
    recipient_sk: &StaticSecret,
    expected_commitment: &[u8; 32],
) -> Option<NotePlaintext> {
    let note = decrypt_note(encrypted, recipient_sk).ok()?;
    let computed = note.commitment()?;
    (computed.as_bytes() == expected_commitment).then_some(note)
}

/// Seal bytes under a symmetric key: `nonce || ciphertext || tag`
pub fn seal(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let cipher = ChaCha20Poly1305::new(key.into());
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| ShroudError::Serialization("sealing failed".into()))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open bytes produced by [`seal`]; fails closed on any tampering
pub fn open(key: &[u8; 32], sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(ShroudError::DecryptionFailed);
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    ChaCha20Poly1305::new(key.into())
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| ShroudError::DecryptionFailed)
}

fn derive_note_key(shared_secret: &[u8], ephemeral_pk: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key("shroud-note-v1");
    hasher.update(shared_secret);
    hasher.update(ephemeral_pk);
    *hasher.finalize().as_bytes()
}

/// Layout:
/// `amount_len u8 | amount (LE) | randomness 32 | recipient_len u16 | recipient | memo_len u16 | memo`
fn serialize_plaintext(pt: &NotePlaintext) -> Result<Vec<u8>> {
    let amount = pt.amount.to_bytes_le();
    let amount_len = u8::try_from(amount.len())
        .map_err(|_| ShroudError::NoteCreationFailed("amount too wide to encrypt".into()))?;
    let recipient_len = u16::try_from(pt.recipient.len())
        .map_err(|_| ShroudError::NoteCreationFailed("recipient too long".into()))?;
    let memo = pt.memo.as_deref().unwrap_or_default().as_bytes();
    let memo_len = u16::try_from(memo.len())
        .map_err(|_| ShroudError::NoteCreationFailed("memo too long".into()))?;

    let mut bytes = Vec::with_capacity(1 + amount.len() + 32 + 2 + pt.recipient.len() + 2 + memo.len());
    bytes.push(amount_len);
    bytes.extend_from_slice(&amount);
    bytes.extend_from_slice(&pt.randomness);
    bytes.extend_from_slice(&recipient_len.to_le_bytes());
    bytes.extend_from_slice(pt.recipient.as_bytes());
    bytes.extend_from_slice(&memo_len.to_le_bytes());
    bytes.extend_from_slice(memo);
    Ok(bytes)
}

fn deserialize_plaintext(bytes: &[u8]) -> Option<NotePlaintext> {
    let mut cursor = Cursor { bytes, pos: 0 };

    let amount_len = cursor.take(1)?[0] as usize;
    let amount = BigUint::from_bytes_le(cursor.take(amount_len)?);
    let randomness: [u8; 32] = cursor.take(32)?.try_into().ok()?;
    let recipient_len = u16::from_le_bytes(cursor.take(2)?.try_into().ok()?) as usize;
    let recipient = String::from_utf8(cursor.take(recipient_len)?.to_vec()).ok()?;
    let memo_len = u16::from_le_bytes(cursor.take(2)?.try_into().ok()?) as usize;
    let memo = String::from_utf8(cursor.take(memo_len)?.to_vec()).ok()?;

    if cursor.pos != bytes.len() {
        return None;
    }

    Some(NotePlaintext {
        amount,
        recipient,
        randomness,
        memo: (!memo.is_empty()).then_some(memo),
    })
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.bytes.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }
}
