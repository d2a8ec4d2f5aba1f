//! Shielded Client
//!
//! One key bundle's view of the pipeline:
//!
//! ```text
//! NoteStore ─→ TransactionBuilder ─→ ProofOrchestrator ─→ SubmissionClient
//!     ↑               │ (MerkleProofClient, remote = relay)       │
//!     └──── owned outputs (pending) ←──── tx accepted ────────────┘
//! ```
//!
//! Inputs of an in-flight transaction are reserved by nullifier so two
//! concurrent builds never select the same note. A reservation ends when the
//! relay reports a terminal status or the submission fails before acceptance.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, info, warn};
use num_bigint::BigUint;
use parking_lot::Mutex;
use serde::Serialize;
use shroud_config::{ProverConfig, ShroudConfig, WindowConfig};
use shroud_error::{Result, ShroudError};
use shroud_privacy::{Commitment, EncryptedNote, Nullifier, ShieldedKeyBundle, try_decrypt_note};
use shroud_prover::{
    CircuitKind, CircuitRegistry, GENERATE_OP, ProofOrchestrator, Prover, ProverBackend, VERIFY_OP,
};
use shroud_relay::{
    HttpRelayTransport, RelayTransport, SUBMIT_OP, StatusResponse, SubmissionClient, SubmitResponse,
    TxStatus, breaker_config,
};
use shroud_resilience::{CallContext, CircuitBreakerRegistry, RateLimitConfig, RateLimiter};

use crate::builder::{
    BuiltTransaction, ReshieldRequest, TransactionBuilder, TransferRequest, WithdrawRequest,
};
use crate::external::{LedgerSigner, StealthAddressProvider};
use crate::merkle::MerkleProofClient;
use crate::selection::SelectionPolicy;
use crate::store::{MetadataPatch, Note, NoteKind, NoteMetadata, NoteStatus, NoteStore};

/// Rate limiter with the `[rate_limit]` windows for relay submission and
/// proof generation/verification
pub fn rate_limiter(config: &ShroudConfig) -> RateLimiter {
    let rl = &config.rate_limit;
    let policy = |w: &WindowConfig| RateLimitConfig::new(w.max_requests, w.window());
    RateLimiter::new(policy(&rl.default))
        .with_policy(SUBMIT_OP, policy(&rl.submit))
        .with_policy(GENERATE_OP, policy(&rl.generate_proof))
        .with_policy(VERIFY_OP, policy(&rl.verify_proof))
}

/// Circuit sources from the `[prover]` section; a directory wins over URLs
pub fn circuit_registry(config: &ProverConfig) -> CircuitRegistry {
    match (&config.circuit_dir, &config.circuit_base_url) {
        (Some(dir), _) => CircuitRegistry::from_directory(dir),
        (None, Some(base)) => CircuitRegistry::from_base_url(base),
        (None, None) => CircuitRegistry::new(),
    }
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub policy: SelectionPolicy,
    pub root_history: usize,
    pub confirmation_attempts: u32,
    /// Where [`ShieldedClient::save`] persists the store
    pub store_path: Option<PathBuf>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self::from_config(&ShroudConfig::default())
    }
}

impl ClientSettings {
    pub fn from_config(config: &ShroudConfig) -> Self {
        Self {
            policy: config.notes.selection_policy.into(),
            root_history: config.notes.root_history,
            confirmation_attempts: config.relay.confirmation_attempts,
            store_path: Some(PathBuf::from(&config.notes.store_path)),
        }
    }
}

/// Outcome of a transaction accepted by the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub tx_hash: String,
    pub circuit: CircuitKind,
    pub status: TxStatus,
    /// Nullifiers of the consumed notes
    pub nullifiers: Vec<Nullifier>,
    /// Self-owned outputs, `pending` until confirmed
    pub created: Vec<Note>,
    pub amount: BigUint,
}

/// Payload handed to the ledger signer for a deposit
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DepositPayload {
    commitment: String,
    amount: String,
    chain_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    depositor: Option<String>,
}

pub struct ShieldedClient<B, T> {
    keys: ShieldedKeyBundle,
    store: NoteStore,
    merkle: MerkleProofClient<SubmissionClient<T>>,
    relay: Arc<SubmissionClient<T>>,
    prover: ProofOrchestrator<B>,
    settings: ClientSettings,
    stealth: Option<Arc<dyn StealthAddressProvider>>,
    reserved: Mutex<HashSet<Nullifier>>,
}

impl ShieldedClient<Prover, HttpRelayTransport> {
    /// Client wired from configuration: HTTP relay, configured prover
    /// backend and circuit sources, store opened from `notes.store_path`
    pub fn from_config(config: &ShroudConfig, keys: ShieldedKeyBundle, password: Option<&str>) -> Result<Self> {
        let limiter = Arc::new(rate_limiter(config));
        let breakers = Arc::new(CircuitBreakerRegistry::new(breaker_config(config)));
        let relay = Arc::new(SubmissionClient::from_config(config, limiter.clone(), breakers)?);
        let prover = ProofOrchestrator::new(
            Prover::from_config(&config.prover)?,
            Arc::new(circuit_registry(&config.prover)),
            limiter,
        );
        let store = NoteStore::open(&config.notes.store_path, &keys, password)?;
        Ok(Self::new(keys, store, relay, prover, ClientSettings::from_config(config)))
    }
}

impl<B: ProverBackend, T: RelayTransport> ShieldedClient<B, T> {
    pub fn new(
        keys: ShieldedKeyBundle,
        store: NoteStore,
        relay: Arc<SubmissionClient<T>>,
        prover: ProofOrchestrator<B>,
        settings: ClientSettings,
    ) -> Self {
        let merkle = MerkleProofClient::remote(relay.clone(), settings.root_history);
        Self {
            keys,
            store,
            merkle,
            relay,
            prover,
            settings,
            stealth: None,
            reserved: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_stealth_provider(mut self, provider: Arc<dyn StealthAddressProvider>) -> Self {
        self.stealth = Some(provider);
        self
    }

    pub fn address(&self) -> String {
        self.keys.address()
    }

    /// X25519 key senders encrypt output notes to
    pub fn encryption_key(&self) -> [u8; 32] {
        self.keys.spending_key.encryption_public_key()
    }

    pub fn store(&self) -> &NoteStore {
        &self.store
    }

    pub fn merkle(&self) -> &MerkleProofClient<SubmissionClient<T>> {
        &self.merkle
    }

    pub fn relay(&self) -> &SubmissionClient<T> {
        &self.relay
    }

    pub fn prover(&self) -> &ProofOrchestrator<B> {
        &self.prover
    }

    pub fn balance(&self) -> BigUint {
        self.store.get_balance()
    }

    /// Nullifiers held by transactions still in flight
    pub fn reserved(&self) -> HashSet<Nullifier> {
        self.reserved.lock().clone()
    }

    /// Create a pending deposit note and hand its commitment to the ledger
    /// signer. A signer failure expires the note.
    pub async fn deposit<L: LedgerSigner>(&self, signer: &L, amount: BigUint) -> Result<Note> {
        signer.connect().await?;

        let metadata = NoteMetadata {
            chain_type: Some(self.relay.chain_type().to_string()),
            ..Default::default()
        };
        let note = self.store.create_note(amount, self.store.owner(), NoteKind::Deposit, metadata)?;

        let payload = DepositPayload {
            commitment: note.commitment.to_hex(),
            amount: note.amount.to_str_radix(10),
            chain_type: self.relay.chain_type().to_string(),
            depositor: signer.address(),
        };
        let tx_data = serde_json::to_vec(&payload).map_err(|e| ShroudError::Serialization(e.to_string()))?;

        match signer.sign_and_submit_raw(&tx_data).await {
            Ok(tx_hash) => {
                info!("Deposit {} submitted to ledger as {tx_hash}", note.id);
                let updated = self.store.update_metadata(&note.id, &MetadataPatch::tx_hash(tx_hash))?;
                Ok(updated.unwrap_or(note))
            }
            Err(e) => {
                warn!("Deposit {} was not signed: {e}", note.id);
                self.store.update_status(&note.id, NoteStatus::Expired)?;
                Err(e)
            }
        }
    }

    /// Confirm a pending note once its commitment is in the relay's tree;
    /// records the leaf index. `Ok(None)` for an unknown id.
    pub async fn confirm_note(&self, ctx: &CallContext, id: &str) -> Result<Option<Note>> {
        let Some(note) = self.store.get(id) else {
            return Ok(None);
        };
        let path = self.merkle.get_inclusion_proof(ctx, &note.commitment).await?;

        let patch = MetadataPatch {
            leaf_index: Some(path.leaf_index),
            ..Default::default()
        };
        self.store.update_metadata(id, &patch)?;
        self.store.update_status(id, NoteStatus::Confirmed)
    }

    /// Take an incoming encrypted note if it decrypts to `commitment` under
    /// this client's key. The note starts `pending`.
    pub fn receive(&self, encrypted: &EncryptedNote, commitment: &Commitment) -> Result<Option<Note>> {
        let secret = self.keys.spending_key.encryption_secret();
        let Some(plaintext) = try_decrypt_note(encrypted, &secret, commitment.as_bytes()) else {
            debug!("Encrypted note for {commitment} is not ours");
            return Ok(None);
        };

        let metadata = NoteMetadata {
            chain_type: Some(self.relay.chain_type().to_string()),
            memo: plaintext.memo.clone(),
            ..Default::default()
        };
        let note = self.store.insert_owned(plaintext, NoteKind::Transfer, metadata)?;
        info!("Received note {} worth {}", note.id, note.amount);
        Ok(Some(note))
    }

    pub async fn transfer(&self, ctx: &CallContext, mut request: TransferRequest) -> Result<TransactionReceipt> {
        if let Some(stealth) = &self.stealth {
            request.recipient_address = stealth.derive(&request.recipient_address)?;
        }
        let built = self.builder().build_transfer(ctx, &request).await?;
        self.execute(ctx, built).await
    }

    pub async fn withdraw(&self, ctx: &CallContext, request: WithdrawRequest) -> Result<TransactionReceipt> {
        let built = self.builder().build_withdraw(ctx, &request).await?;
        self.execute(ctx, built).await
    }

    pub async fn reshield(&self, ctx: &CallContext, request: ReshieldRequest) -> Result<TransactionReceipt> {
        let built = self.builder().build_reshield(ctx, &request).await?;
        self.execute(ctx, built).await
    }

    /// Wait for the relay's verdict on `receipt`.
    ///
    /// Success spends the inputs and confirms the outputs. An output whose
    /// inclusion proof cannot be fetched yet stays pending. A relay-reported
    /// failure expires the outputs and frees the inputs. Any other error
    /// (including a confirmation timeout) leaves the inputs reserved.
    pub async fn confirm(&self, ctx: &CallContext, receipt: &TransactionReceipt) -> Result<StatusResponse> {
        let polled = self
            .relay
            .wait_for_confirmation(ctx, &receipt.tx_hash, self.settings.confirmation_attempts)
            .await;

        match polled {
            Ok(status) => {
                for nullifier in &receipt.nullifiers {
                    if !self.store.mark_spent(nullifier) {
                        warn!("Input {nullifier} was already spent");
                    }
                }
                self.release(&receipt.nullifiers);
                for note in &receipt.created {
                    // Settled regardless; the note stays pending for a later confirm_note
                    if let Err(e) = self.confirm_note(ctx, &note.id).await {
                        warn!("Output {} of {} left pending: {e}", note.id, receipt.tx_hash);
                    }
                }
                info!("Transaction {} settled", receipt.tx_hash);
                Ok(status)
            }
            Err(e @ ShroudError::SubmissionFailed { .. }) => {
                for note in &receipt.created {
                    self.store.update_status(&note.id, NoteStatus::Expired)?;
                }
                self.release(&receipt.nullifiers);
                warn!("Transaction {} failed: {e}", receipt.tx_hash);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Persist the store to the configured path
    pub fn save(&self, password: Option<&str>) -> Result<()> {
        match &self.settings.store_path {
            Some(path) => self.store.save(path, password),
            None => Ok(()),
        }
    }

    fn builder(&self) -> TransactionBuilder<'_, SubmissionClient<T>> {
        TransactionBuilder::new(&self.store, &self.merkle, &self.keys)
            .with_policy(self.settings.policy)
            .excluding(self.reserved())
    }

    /// prove → submit → store owned outputs as pending
    async fn execute(&self, ctx: &CallContext, built: BuiltTransaction) -> Result<TransactionReceipt> {
        let nullifiers = built.nullifiers();
        self.reserve(&nullifiers)?;

        let accepted = self.prove_and_submit(ctx, &built).await;
        let response = match accepted {
            Ok(response) => response,
            Err(e) => {
                self.release(&nullifiers);
                return Err(e);
            }
        };

        let mut created = Vec::with_capacity(built.owned_outputs.len());
        for (plaintext, kind) in built.owned_outputs {
            let metadata = NoteMetadata {
                chain_type: Some(self.relay.chain_type().to_string()),
                tx_hash: Some(response.tx_hash.clone()),
                memo: plaintext.memo.clone(),
                ..Default::default()
            };
            created.push(self.store.insert_owned(plaintext, kind, metadata)?);
        }

        let circuit = built.witness.kind();
        info!(
            "{circuit} accepted as {} ({} input(s), {} owned output(s))",
            response.tx_hash,
            nullifiers.len(),
            created.len()
        );
        Ok(TransactionReceipt {
            tx_hash: response.tx_hash,
            circuit,
            status: response.status,
            nullifiers,
            created,
            amount: built.amount,
        })
    }

    async fn prove_and_submit(&self, ctx: &CallContext, built: &BuiltTransaction) -> Result<SubmitResponse> {
        let proof = self.prover.generate_proof(ctx, &built.witness).await?;
        let submission = built.submission(&proof, self.relay.chain_type());
        self.relay.submit(ctx, &submission).await
    }

    fn reserve(&self, nullifiers: &[Nullifier]) -> Result<()> {
        let mut reserved = self.reserved.lock();
        if let Some(taken) = nullifiers.iter().find(|n| reserved.contains(n)) {
            return Err(ShroudError::DuplicateNullifier(taken.to_hex()));
        }
        reserved.extend(nullifiers.iter().copied());
        Ok(())
    }

    fn release(&self, nullifiers: &[Nullifier]) {
        let mut reserved = self.reserved.lock();
        for nullifier in nullifiers {
            reserved.remove(nullifier);
        }
    }
}
