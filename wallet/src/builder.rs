//! Transaction builders
//!
//! ```text
//! spendable notes ── select ──┬── decrypt + inclusion path ──→ InputNote..
//!                             └── total - amount ──────────→ change OutputNote
//! ```
//!
//! A builder produces a validated [`Witness`] plus everything needed to
//! submit the proven transaction and to update the store once the relay
//! accepts it. All input paths are taken against one root.

use std::collections::{BTreeMap, HashSet};

use log::debug;
use num_bigint::BigUint;
use shroud_error::{Result, ShroudError};
use shroud_privacy::{EncryptedNote, NotePlaintext, Nullifier, ShieldedKeyBundle, encrypt_note};
use shroud_prover::{
    InputNote, OutputNote, ProofOutput, ReshieldWitness, SecretBytes, TransferWitness, Witness,
    WithdrawWitness,
};
use shroud_relay::RelaySubmission;
use shroud_resilience::CallContext;

use crate::merkle::{MerkleProofClient, TreeSource};
use crate::selection::{SelectionPolicy, select_notes};
use crate::store::{Note, NoteKind, NoteStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub amount: BigUint,
    pub recipient_address: String,
    /// Recipient's X25519 key for the encrypted output note
    pub recipient_encryption_key: [u8; 32],
    pub memo: Option<String>,
}

impl TransferRequest {
    pub fn new(amount: impl Into<BigUint>, recipient_address: impl Into<String>, recipient_encryption_key: [u8; 32]) -> Self {
        Self {
            amount: amount.into(),
            recipient_address: recipient_address.into(),
            recipient_encryption_key,
            memo: None,
        }
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawRequest {
    pub amount: BigUint,
    /// Ledger address receiving the unshielded value
    pub recipient_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReshieldRequest {
    pub amount: BigUint,
}

#[derive(Debug, Clone)]
pub struct BuiltTransaction {
    pub witness: Witness,
    /// Notes consumed
    pub inputs: Vec<Note>,
    /// Outputs owned by this client, stored once the relay accepts
    pub owned_outputs: Vec<(NotePlaintext, NoteKind)>,
    pub encrypted_output: Option<EncryptedNote>,
    pub recipient_address: Option<String>,
    /// Requested amount
    pub amount: BigUint,
}

impl BuiltTransaction {
    pub fn nullifiers(&self) -> Vec<Nullifier> {
        self.inputs.iter().map(|n| n.nullifier).collect()
    }

    /// Relay payload for this transaction. Only the public amount (value
    /// leaving the pool) is sent in the clear.
    pub fn submission(&self, proof: &ProofOutput, chain_type: &str) -> RelaySubmission {
        let outputs = self
            .witness
            .outputs()
            .into_iter()
            .map(|o| o.commitment.to_hex())
            .collect::<Vec<_>>()
            .join(",");

        RelaySubmission {
            proof: proof.proof.clone(),
            public_signals: proof.public_signals.clone(),
            encrypted_output_note: self.encrypted_output.clone(),
            recipient_address: self.recipient_address.clone(),
            amount: self.witness.public_amount(),
            chain_type: chain_type.to_string(),
            metadata: BTreeMap::from([
                ("circuit".to_string(), self.witness.kind().name().to_string()),
                ("outputs".to_string(), outputs),
            ]),
        }
    }
}

pub struct TransactionBuilder<'a, S> {
    store: &'a NoteStore,
    merkle: &'a MerkleProofClient<S>,
    keys: &'a ShieldedKeyBundle,
    policy: SelectionPolicy,
    reserved: HashSet<Nullifier>,
}

impl<'a, S: TreeSource> TransactionBuilder<'a, S> {
    pub fn new(store: &'a NoteStore, merkle: &'a MerkleProofClient<S>, keys: &'a ShieldedKeyBundle) -> Self {
        Self {
            store,
            merkle,
            keys,
            policy: SelectionPolicy::default(),
            reserved: HashSet::new(),
        }
    }

    pub fn with_policy(mut self, policy: SelectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Never select notes carrying these nullifiers
    pub fn excluding(mut self, reserved: HashSet<Nullifier>) -> Self {
        self.reserved = reserved;
        self
    }

    pub async fn build_transfer(&self, ctx: &CallContext, request: &TransferRequest) -> Result<BuiltTransaction> {
        require_recipient(&request.recipient_address)?;
        let (selected, inputs, total) = self.inputs(ctx, &request.amount).await?;

        let mut plaintext = NotePlaintext::new(
            request.amount.clone(),
            request.recipient_address.clone(),
            &mut rand::thread_rng(),
        );
        if let Some(memo) = &request.memo {
            plaintext = plaintext.with_memo(memo.clone());
        }
        let output = OutputNote::new(&plaintext)?;
        let encrypted = encrypt_note(&plaintext, &request.recipient_encryption_key)?;
        let (change, owned_outputs) = self.change(&total, &request.amount)?;

        let witness = Witness::Transfer(TransferWitness {
            inputs,
            output,
            change,
            nullifier_key: self.secret(),
        });
        witness.validate()?;

        Ok(BuiltTransaction {
            witness,
            inputs: selected,
            owned_outputs,
            encrypted_output: Some(encrypted),
            recipient_address: Some(request.recipient_address.clone()),
            amount: request.amount.clone(),
        })
    }

    pub async fn build_withdraw(&self, ctx: &CallContext, request: &WithdrawRequest) -> Result<BuiltTransaction> {
        require_recipient(&request.recipient_address)?;
        let (selected, inputs, total) = self.inputs(ctx, &request.amount).await?;
        let (change, owned_outputs) = self.change(&total, &request.amount)?;

        let witness = Witness::Withdraw(WithdrawWitness {
            inputs,
            amount: request.amount.clone(),
            recipient_address: request.recipient_address.clone(),
            change,
            nullifier_key: self.secret(),
        });
        witness.validate()?;

        Ok(BuiltTransaction {
            witness,
            inputs: selected,
            owned_outputs,
            encrypted_output: None,
            recipient_address: Some(request.recipient_address.clone()),
            amount: request.amount.clone(),
        })
    }

    /// Re-commit the full selected total into one fresh self-owned note
    pub async fn build_reshield(&self, ctx: &CallContext, request: &ReshieldRequest) -> Result<BuiltTransaction> {
        let (selected, inputs, total) = self.inputs(ctx, &request.amount).await?;

        let plaintext = NotePlaintext::new(total, self.keys.address(), &mut rand::thread_rng());
        let output = OutputNote::new(&plaintext)?;

        let witness = Witness::Reshield(ReshieldWitness {
            inputs,
            output,
            nullifier_key: self.secret(),
        });
        witness.validate()?;

        Ok(BuiltTransaction {
            witness,
            inputs: selected,
            owned_outputs: vec![(plaintext, NoteKind::Reshield)],
            encrypted_output: None,
            recipient_address: None,
            amount: request.amount.clone(),
        })
    }

    /// Select, open and prove inclusion of inputs covering `amount`
    async fn inputs(&self, ctx: &CallContext, amount: &BigUint) -> Result<(Vec<Note>, Vec<InputNote>, BigUint)> {
        let spendable: Vec<Note> = self
            .store
            .get_spendable_notes()
            .into_iter()
            .filter(|n| !self.reserved.contains(&n.nullifier))
            .collect();
        let (selected, total) = select_notes(&spendable, amount, self.policy)?;

        let key = self.keys.spending_key.nullifier_key();
        let mut inputs = Vec::with_capacity(selected.len());
        for note in &selected {
            let plaintext = self.store.decrypt(note)?;
            let path = self.merkle.get_inclusion_proof(ctx, &note.commitment).await?;
            inputs.push(InputNote::new(&plaintext, &key, path)?);
        }

        if let Some(first) = inputs.first() {
            let root = first.merkle_proof.root;
            if inputs.iter().any(|i| i.merkle_proof.root != root) {
                return Err(ShroudError::InvalidMerkleProof(
                    "inclusion paths span different roots".into(),
                ));
            }
        }

        debug!("Selected {} input(s) totalling {total}", selected.len());
        Ok((selected, inputs, total))
    }

    fn change(&self, total: &BigUint, spent: &BigUint) -> Result<(Option<OutputNote>, Vec<(NotePlaintext, NoteKind)>)> {
        if total <= spent {
            return Ok((None, Vec::new()));
        }
        let plaintext = NotePlaintext::new(total - spent, self.keys.address(), &mut rand::thread_rng());
        let output = OutputNote::new(&plaintext)?;
        Ok((Some(output), vec![(plaintext, NoteKind::Change)]))
    }

    fn secret(&self) -> SecretBytes {
        SecretBytes::new(*self.keys.spending_key.nullifier_key().as_bytes())
    }
}

fn require_recipient(recipient_address: &str) -> Result<()> {
    if recipient_address.is_empty() {
        return Err(ShroudError::NoteCreationFailed("recipient address is empty".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shroud_error::ErrorKind;
    use shroud_privacy::{SpendingKey, decrypt_note};

    use crate::store::{NoteMetadata, NoteStatus};

    struct Fixture {
        keys: ShieldedKeyBundle,
        store: NoteStore,
        merkle: MerkleProofClient,
    }

    impl Fixture {
        fn new(amounts: &[u64]) -> Self {
            let keys = ShieldedKeyBundle::from_spending_key(SpendingKey::from_bytes([3u8; 32]));
            let store = NoteStore::new(&keys);
            let merkle = MerkleProofClient::local(10);
            for amount in amounts {
                let note = store
                    .create_note((*amount).into(), store.owner(), NoteKind::Deposit, NoteMetadata::default())
                    .unwrap();
                store.update_status(&note.id, NoteStatus::Confirmed).unwrap();
                merkle.update_local_tree([note.commitment.0]);
            }
            Self { keys, store, merkle }
        }

        fn builder(&self) -> TransactionBuilder<'_, crate::merkle::NoRemote> {
            TransactionBuilder::new(&self.store, &self.merkle, &self.keys)
        }
    }

    fn bob() -> ShieldedKeyBundle {
        ShieldedKeyBundle::from_spending_key(SpendingKey::from_bytes([8u8; 32]))
    }

    fn ctx() -> CallContext {
        CallContext::for_caller("alice")
    }

    fn input_amounts(built: &BuiltTransaction) -> Vec<BigUint> {
        built.inputs.iter().map(|n| n.amount.clone()).collect()
    }

    #[tokio::test]
    async fn test_transfer_with_change() {
        let fx = Fixture::new(&[5, 3, 2]);
        let bob = bob();
        let request = TransferRequest::new(6u32, bob.address(), bob.spending_key.encryption_public_key())
            .with_memo("dinner");

        let built = fx.builder().build_transfer(&ctx(), &request).await.unwrap();
        assert_eq!(input_amounts(&built), vec![BigUint::from(5u32), BigUint::from(3u32)]);
        assert_eq!(built.witness.outputs().len(), 2);
        assert_eq!(built.owned_outputs.len(), 1);
        assert_eq!(built.owned_outputs[0].0.amount, BigUint::from(2u32));
        assert_eq!(built.owned_outputs[0].1, NoteKind::Change);

        let received = decrypt_note(
            built.encrypted_output.as_ref().unwrap(),
            &bob.spending_key.encryption_secret(),
        )
        .unwrap();
        assert_eq!(received.amount, BigUint::from(6u32));
        assert_eq!(received.recipient, bob.address());
        assert_eq!(received.memo.as_deref(), Some("dinner"));
        assert_eq!(received.commitment(), Some(built.witness.outputs()[0].commitment));
    }

    #[tokio::test]
    async fn test_witness_carries_nullifier_key_not_spending_key() {
        let fx = Fixture::new(&[5]);
        let request = ReshieldRequest { amount: 5u32.into() };

        let built = fx.builder().build_reshield(&ctx(), &request).await.unwrap();
        let json = serde_json::to_string(&built.witness).unwrap();
        assert!(!json.contains(&hex::encode(fx.keys.spending_key.as_bytes())));
        assert!(json.contains(&hex::encode(fx.keys.spending_key.nullifier_key().as_bytes())));
        built.witness.validate().unwrap();
    }

    #[tokio::test]
    async fn test_exact_withdraw_has_no_change() {
        let fx = Fixture::new(&[5, 3, 2]);
        let request = WithdrawRequest {
            amount: 10u32.into(),
            recipient_address: "So1anaAddress".into(),
        };

        let built = fx.builder().build_withdraw(&ctx(), &request).await.unwrap();
        assert_eq!(built.inputs.len(), 3);
        assert!(built.owned_outputs.is_empty());
        assert!(built.witness.outputs().is_empty());

        let proof = ProofOutput {
            proof: vec![1, 2],
            public_signals: built.witness.public_signals(),
        };
        let submission = built.submission(&proof, "solana");
        assert_eq!(submission.amount, BigUint::from(10u32));
        assert_eq!(submission.metadata["circuit"], "withdraw");
        assert_eq!(submission.metadata["outputs"], "");
    }

    #[tokio::test]
    async fn test_reshield_recommits_selected_total() {
        let fx = Fixture::new(&[5, 3, 2]);
        let built = fx
            .builder()
            .build_reshield(&ctx(), &ReshieldRequest { amount: 4u32.into() })
            .await
            .unwrap();

        assert_eq!(input_amounts(&built), vec![BigUint::from(5u32)]);
        let (plaintext, kind) = &built.owned_outputs[0];
        assert_eq!(*kind, NoteKind::Reshield);
        assert_eq!(plaintext.amount, BigUint::from(5u32));
        assert_eq!(plaintext.recipient, fx.keys.address());
        assert_ne!(plaintext.commitment(), Some(built.inputs[0].commitment));

        // Transfer amounts stay private on the wire
        let submission = built.submission(
            &ProofOutput {
                proof: vec![],
                public_signals: vec![],
            },
            "solana",
        );
        assert_eq!(submission.amount, BigUint::from(0u32));
    }

    #[tokio::test]
    async fn test_prechecks() {
        let bob = bob();
        let empty = Fixture::new(&[]);
        let request = TransferRequest::new(1u32, bob.address(), bob.spending_key.encryption_public_key());
        let err = empty.builder().build_transfer(&ctx(), &request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoSpendableNotes);

        let fx = Fixture::new(&[5, 3, 2]);
        let request = TransferRequest::new(11u32, bob.address(), bob.spending_key.encryption_public_key());
        let err = fx.builder().build_transfer(&ctx(), &request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientBalance);

        let request = WithdrawRequest {
            amount: 1u32.into(),
            recipient_address: String::new(),
        };
        let err = fx.builder().build_withdraw(&ctx(), &request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoteCreationFailed);
    }

    #[tokio::test]
    async fn test_reserved_notes_are_skipped() {
        let fx = Fixture::new(&[5, 3, 2]);
        let largest = fx
            .store
            .get_spendable_notes()
            .into_iter()
            .find(|n| n.amount == BigUint::from(5u32))
            .unwrap();

        let builder = fx.builder().excluding(HashSet::from([largest.nullifier]));
        let err = builder
            .build_reshield(&ctx(), &ReshieldRequest { amount: 6u32.into() })
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ShroudError::InsufficientBalance {
                required: "6".into(),
                available: "5".into()
            }
        );
    }

    #[tokio::test]
    async fn test_note_missing_from_tree() {
        let fx = Fixture::new(&[5]);
        let orphan = fx
            .store
            .create_note(9u32.into(), fx.store.owner(), NoteKind::Deposit, NoteMetadata::default())
            .unwrap();
        fx.store.update_status(&orphan.id, NoteStatus::Confirmed).unwrap();

        let err = fx
            .builder()
            .build_reshield(&ctx(), &ReshieldRequest { amount: 9u32.into() })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidMerkleProof);
    }

    #[tokio::test]
    async fn test_smallest_first_policy() {
        let fx = Fixture::new(&[5, 3, 2]);
        let built = fx
            .builder()
            .with_policy(SelectionPolicy::SmallestFirst)
            .build_reshield(&ctx(), &ReshieldRequest { amount: 4u32.into() })
            .await
            .unwrap();
        assert_eq!(input_amounts(&built), vec![BigUint::from(2u32), BigUint::from(3u32)]);
    }
}
