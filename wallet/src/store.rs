//! Note Store
//!
//! Owns the notes known to this client.
//!
//! ```text
//! Note (clear record)                encrypted_payload (sealed)
//! ├── id, kind, status, spent        └── StoredPayload {
//! ├── amount, commitment, nullifier          plaintext: NotePlaintext,
//! ├── recipient, metadata                    metadata:  NoteMetadata,
//! └── created_at, updated_at             }
//! ```
//!
//! The payload is sealed with ChaCha20-Poly1305 under the storage key derived
//! from the spending key. Every mutation of status or metadata moves
//! `updated_at` strictly forward.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::Path;

use argon2::Argon2;
use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, info, warn};
use num_bigint::BigUint;
use num_traits::Zero;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use shroud_error::{Result, ShroudError};
use shroud_privacy::amount::decimal;
use shroud_privacy::{
    Commitment, MAX_AMOUNT_BITS, NotePlaintext, Nullifier, NullifierKey, ShieldedKeyBundle,
    amount_to_field, open, seal,
};
use zeroize::Zeroizing;

const EXPORT_VERSION: u32 = 1;

/// Application salt for password-derived export keys
const EXPORT_SALT: &[u8] = b"shroud-note-export-v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteKind {
    Deposit,
    Transfer,
    Change,
    Reshield,
}

impl fmt::Display for NoteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Deposit => "deposit",
            Self::Transfer => "transfer",
            Self::Change => "change",
            Self::Reshield => "reshield",
        };
        f.write_str(s)
    }
}

/// ```text
/// pending → confirmed → spent
///    │          │
///    └──────────┴────→ expired
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteStatus {
    Pending,
    Confirmed,
    Spent,
    Expired,
}

impl NoteStatus {
    /// Re-applying the current status is allowed
    pub fn can_transition_to(self, next: NoteStatus) -> bool {
        use NoteStatus::*;
        self == next
            || matches!(
                (self, next),
                (Pending, Confirmed) | (Confirmed, Spent) | (Pending, Expired) | (Confirmed, Expired)
            )
    }
}

impl fmt::Display for NoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Spent => "spent",
            Self::Expired => "expired",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    /// Position of the commitment in the relay's tree
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leaf_index: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Partial metadata update. `Some` fields overwrite; labels are merged.
#[derive(Debug, Clone, Default)]
pub struct MetadataPatch {
    pub chain_type: Option<String>,
    pub tx_hash: Option<String>,
    pub leaf_index: Option<u64>,
    pub memo: Option<String>,
    pub labels: BTreeMap<String, String>,
}

impl MetadataPatch {
    pub fn tx_hash(tx_hash: impl Into<String>) -> Self {
        Self {
            tx_hash: Some(tx_hash.into()),
            ..Default::default()
        }
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    fn apply(&self, metadata: &mut NoteMetadata) {
        if let Some(chain_type) = &self.chain_type {
            metadata.chain_type = Some(chain_type.clone());
        }
        if let Some(tx_hash) = &self.tx_hash {
            metadata.tx_hash = Some(tx_hash.clone());
        }
        if let Some(leaf_index) = self.leaf_index {
            metadata.leaf_index = Some(leaf_index);
        }
        if let Some(memo) = &self.memo {
            metadata.memo = Some(memo.clone());
        }
        metadata
            .labels
            .extend(self.labels.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

/// A note record as stored and exported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub kind: NoteKind,
    #[serde(with = "decimal")]
    pub amount: BigUint,
    pub commitment: Commitment,
    pub nullifier: Nullifier,
    pub recipient_address: String,
    pub status: NoteStatus,
    pub spent: bool,
    #[serde(with = "hex::serde")]
    pub encrypted_payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: NoteMetadata,
}

impl Note {
    pub fn is_spendable(&self) -> bool {
        !self.spent && self.status == NoteStatus::Confirmed
    }
}

#[derive(Serialize, Deserialize)]
struct StoredPayload {
    plaintext: NotePlaintext,
    metadata: NoteMetadata,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
enum ExportBlob {
    Plain {
        version: u32,
        notes: Vec<Note>,
    },
    Sealed {
        version: u32,
        #[serde(with = "hex::serde")]
        payload: Vec<u8>,
    },
}

#[derive(Default)]
struct StoreState {
    notes: Vec<Note>,
    by_nullifier: HashMap<Nullifier, usize>,
}

impl StoreState {
    fn insert(&mut self, note: Note) -> Result<()> {
        if self.by_nullifier.contains_key(&note.nullifier) {
            return Err(ShroudError::DuplicateNullifier(note.nullifier.to_hex()));
        }
        self.by_nullifier.insert(note.nullifier, self.notes.len());
        self.notes.push(note);
        Ok(())
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Note> {
        self.notes.iter_mut().find(|n| n.id == id)
    }
}

pub struct NoteStore {
    storage_key: Zeroizing<[u8; 32]>,
    nullifier_key: NullifierKey,
    owner: String,
    state: RwLock<StoreState>,
}

impl fmt::Debug for NoteStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoteStore")
            .field("owner", &self.owner)
            .field("notes", &self.len())
            .finish_non_exhaustive()
    }
}

impl NoteStore {
    pub fn new(keys: &ShieldedKeyBundle) -> Self {
        Self {
            storage_key: Zeroizing::new(keys.spending_key.storage_key()),
            nullifier_key: keys.spending_key.nullifier_key(),
            owner: keys.address(),
            state: RwLock::new(StoreState::default()),
        }
    }

    /// Open a store persisted with [`NoteStore::save`]; a missing file
    /// yields an empty store
    pub fn open(path: impl AsRef<Path>, keys: &ShieldedKeyBundle, password: Option<&str>) -> Result<Self> {
        let path = path.as_ref();
        let store = Self::new(keys);
        if !path.exists() {
            info!("No note store at {}, starting empty", path.display());
            return Ok(store);
        }

        let blob = fs::read_to_string(path)?;
        let count = store.import_notes(&blob, password)?;
        info!("Loaded {count} notes from {}", path.display());
        Ok(store)
    }

    pub fn save(&self, path: impl AsRef<Path>, password: Option<&str>) -> Result<()> {
        let path = path.as_ref();
        let blob = self.export_notes(password)?;

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, blob)?;
        fs::rename(&tmp, path)?;
        debug!("Saved {} notes to {}", self.len(), path.display());
        Ok(())
    }

    /// Address this store's notes are committed to by default
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn len(&self) -> usize {
        self.state.read().notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Create a note with fresh randomness; starts `pending`
    pub fn create_note(
        &self,
        amount: BigUint,
        recipient_address: &str,
        kind: NoteKind,
        metadata: NoteMetadata,
    ) -> Result<Note> {
        let plaintext = NotePlaintext::new(amount, recipient_address, &mut rand::thread_rng());
        self.insert_owned(plaintext, kind, metadata)
    }

    /// Store a note whose plaintext was built elsewhere (change and reshield
    /// outputs); starts `pending`
    pub fn insert_owned(&self, plaintext: NotePlaintext, kind: NoteKind, metadata: NoteMetadata) -> Result<Note> {
        if plaintext.recipient.is_empty() {
            return Err(ShroudError::NoteCreationFailed("recipient address is empty".into()));
        }
        if amount_to_field(&plaintext.amount).is_none() {
            return Err(ShroudError::NoteCreationFailed(format!(
                "amount wider than {MAX_AMOUNT_BITS} bits"
            )));
        }
        let commitment = plaintext
            .commitment()
            .ok_or_else(|| ShroudError::NoteCreationFailed("cannot commit to note".into()))?;
        let nullifier = self.nullifier_key.derive_nullifier(&commitment);
        let encrypted_payload = self.seal_payload(&plaintext, &metadata)?;

        let now = Utc::now();
        let note = Note {
            id: hex::encode(rand::random::<[u8; 16]>()),
            kind,
            amount: plaintext.amount,
            commitment,
            nullifier,
            recipient_address: plaintext.recipient,
            status: NoteStatus::Pending,
            spent: false,
            encrypted_payload,
            created_at: now,
            updated_at: now,
            metadata,
        };

        self.state.write().insert(note.clone())?;
        debug!("Stored {} note {}", note.kind, note.id);
        Ok(note)
    }

    pub fn get(&self, id: &str) -> Option<Note> {
        self.state.read().notes.iter().find(|n| n.id == id).cloned()
    }

    pub fn notes(&self) -> Vec<Note> {
        self.state.read().notes.clone()
    }

    /// Unspent, confirmed notes in insertion order
    pub fn get_spendable_notes(&self) -> Vec<Note> {
        self.state
            .read()
            .notes
            .iter()
            .filter(|n| n.is_spendable())
            .cloned()
            .collect()
    }

    pub fn get_balance(&self) -> BigUint {
        self.state
            .read()
            .notes
            .iter()
            .filter(|n| n.is_spendable())
            .fold(BigUint::zero(), |acc, n| acc + &n.amount)
    }

    /// `Ok(None)` for an unknown id
    pub fn update_status(&self, id: &str, status: NoteStatus) -> Result<Option<Note>> {
        let mut state = self.state.write();
        let Some(note) = state.get_mut(id) else {
            return Ok(None);
        };

        if !note.status.can_transition_to(status) {
            return Err(ShroudError::InvalidStatusTransition {
                from: note.status.to_string(),
                to: status.to_string(),
            });
        }

        note.status = status;
        if status == NoteStatus::Spent {
            note.spent = true;
        }
        note.updated_at = advance(note.updated_at);
        Ok(Some(note.clone()))
    }

    /// Merge `patch` into the note's metadata and re-seal its payload.
    /// `Ok(None)` for an unknown id.
    pub fn update_metadata(&self, id: &str, patch: &MetadataPatch) -> Result<Option<Note>> {
        let mut state = self.state.write();
        let Some(note) = state.get_mut(id) else {
            return Ok(None);
        };

        let payload = self.open_payload(note)?;
        let mut metadata = payload.metadata;
        patch.apply(&mut metadata);

        note.encrypted_payload = self.seal_payload(&payload.plaintext, &metadata)?;
        note.metadata = metadata;
        note.updated_at = advance(note.updated_at);
        Ok(Some(note.clone()))
    }

    pub fn find_by_commitment(&self, commitment: &Commitment) -> Vec<Note> {
        self.state
            .read()
            .notes
            .iter()
            .filter(|n| &n.commitment == commitment)
            .cloned()
            .collect()
    }

    pub fn find_by_nullifier(&self, nullifier: &Nullifier) -> Vec<Note> {
        self.state
            .read()
            .notes
            .iter()
            .filter(|n| &n.nullifier == nullifier)
            .cloned()
            .collect()
    }

    /// Mark the note carrying `nullifier` spent. Returns `false` when the
    /// note is unknown or already spent.
    pub fn mark_spent(&self, nullifier: &Nullifier) -> bool {
        let mut state = self.state.write();
        let Some(&index) = state.by_nullifier.get(nullifier) else {
            return false;
        };
        let note = &mut state.notes[index];
        if note.spent {
            return false;
        }

        note.spent = true;
        note.status = NoteStatus::Spent;
        note.updated_at = advance(note.updated_at);
        debug!("Marked note {} spent", note.id);
        true
    }

    /// Open a note's sealed payload; fails closed on any mismatch
    pub fn decrypt(&self, note: &Note) -> Result<NotePlaintext> {
        Ok(self.open_payload(note)?.plaintext)
    }

    pub fn export_notes(&self, password: Option<&str>) -> Result<String> {
        let notes = self.notes();
        let blob = match password {
            None => ExportBlob::Plain {
                version: EXPORT_VERSION,
                notes,
            },
            Some(password) => {
                let inner = serde_json::to_vec(&notes).map_err(serialization)?;
                let key = password_key(password)?;
                ExportBlob::Sealed {
                    version: EXPORT_VERSION,
                    payload: seal(&key, &inner)?,
                }
            }
        };
        serde_json::to_string_pretty(&blob).map_err(serialization)
    }

    /// Import an export blob. Notes whose nullifier is already present are
    /// skipped; returns the number inserted. Nothing is inserted if any
    /// record fails to open under this store's key.
    pub fn import_notes(&self, blob: &str, password: Option<&str>) -> Result<usize> {
        let notes = match serde_json::from_str::<ExportBlob>(blob).map_err(serialization)? {
            ExportBlob::Plain { version, notes } => {
                check_version(version)?;
                notes
            }
            ExportBlob::Sealed { version, payload } => {
                check_version(version)?;
                let password = password.ok_or(ShroudError::DecryptionFailed)?;
                let inner = open(&*password_key(password)?, &payload)?;
                serde_json::from_slice(&inner).map_err(|_| ShroudError::DecryptionFailed)?
            }
        };

        for note in &notes {
            self.open_payload(note)?;
        }

        let mut state = self.state.write();
        let mut inserted = 0;
        for note in notes {
            if state.by_nullifier.contains_key(&note.nullifier) {
                debug!("Skipping already-known note {}", note.id);
                continue;
            }
            state.insert(note)?;
            inserted += 1;
        }
        Ok(inserted)
    }

    fn seal_payload(&self, plaintext: &NotePlaintext, metadata: &NoteMetadata) -> Result<Vec<u8>> {
        let payload = StoredPayload {
            plaintext: plaintext.clone(),
            metadata: metadata.clone(),
        };
        let bytes = Zeroizing::new(serde_json::to_vec(&payload).map_err(serialization)?);
        seal(&self.storage_key, &bytes)
    }

    fn open_payload(&self, note: &Note) -> Result<StoredPayload> {
        let bytes = Zeroizing::new(open(&self.storage_key, &note.encrypted_payload)?);
        let payload: StoredPayload =
            serde_json::from_slice(&bytes).map_err(|_| ShroudError::DecryptionFailed)?;

        let commitment = payload.plaintext.commitment();
        if commitment != Some(note.commitment)
            || payload.plaintext.amount != note.amount
            || self.nullifier_key.derive_nullifier(&note.commitment) != note.nullifier
        {
            warn!("Note {} does not match its sealed payload", note.id);
            return Err(ShroudError::DecryptionFailed);
        }
        Ok(payload)
    }
}

/// Next `updated_at`: now, or one nanosecond past `prev` if the clock has
/// not moved
fn advance(prev: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > prev {
        now
    } else {
        prev + TimeDelta::nanoseconds(1)
    }
}

fn password_key(password: &str) -> Result<Zeroizing<[u8; 32]>> {
    let mut key = Zeroizing::new([0u8; 32]);
    Argon2::default()
        .hash_password_into(password.as_bytes(), EXPORT_SALT, &mut key[..])
        .map_err(|e| ShroudError::Serialization(format!("key derivation failed: {e}")))?;
    Ok(key)
}

fn check_version(version: u32) -> Result<()> {
    if version != EXPORT_VERSION {
        return Err(ShroudError::Serialization(format!(
            "unsupported note export version {version}"
        )));
    }
    Ok(())
}

fn serialization(e: serde_json::Error) -> ShroudError {
    ShroudError::Serialization(e.to_string())
}
