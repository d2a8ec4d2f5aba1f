//! End-to-end flows through the wallet facade against an in-memory relay
//! and the mock prover.

use std::collections::HashSet;
use std::sync::Arc;

use num_bigint::BigUint;
use parking_lot::Mutex;
use shroud_error::{ErrorKind, Result, ShroudError};
use shroud_privacy::{Commitment, ShieldedKeyBundle, SpendingKey};
use shroud_prover::{
    CircuitKind, CircuitMaterial, CircuitRegistry, CircuitSource, MockProver, ProofOrchestrator,
};
use shroud_relay::testing::{FakeRelay, status, unavailable};
use shroud_relay::{SubmissionClient, SubmissionSettings, TxStatus};
use shroud_resilience::{CallContext, CircuitBreakerConfig, CircuitBreakerRegistry, RateLimiter};
use shroud_wallet::{
    ClientSettings, LedgerSigner, NoteKind, NoteStatus, NoteStore, ReshieldRequest,
    ShieldedClient, StealthAddressProvider, TransferRequest, WithdrawRequest,
};

type Client = ShieldedClient<MockProver, FakeRelay>;

fn keys(seed: u8) -> ShieldedKeyBundle {
    ShieldedKeyBundle::from_spending_key(SpendingKey::from_bytes([seed; 32]))
}

fn ctx() -> CallContext {
    CallContext::for_caller("alice")
}

fn circuits() -> CircuitRegistry {
    let registry = CircuitRegistry::new();
    for kind in CircuitKind::ALL {
        let material = CircuitMaterial::new(
            format!("{kind}-wasm").into_bytes(),
            format!("{kind}-zkey").into_bytes(),
            format!("{kind}-vk").into_bytes(),
        );
        registry.register(kind, CircuitSource::Memory(material));
    }
    registry
}

fn client_with(relay: &Arc<FakeRelay>, seed: u8, circuits: CircuitRegistry, settings: ClientSettings) -> Client {
    let keys = keys(seed);
    let limiter = Arc::new(RateLimiter::default());
    let submission = Arc::new(SubmissionClient::new(
        relay.clone(),
        limiter.clone(),
        Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default())),
        SubmissionSettings {
            api_key: Some("test-key".into()),
            ..Default::default()
        },
    ));
    let prover = ProofOrchestrator::new(MockProver::new(), Arc::new(circuits), limiter);
    let store = NoteStore::new(&keys);
    ShieldedClient::new(keys, store, submission, prover, settings)
}

fn settings() -> ClientSettings {
    ClientSettings {
        confirmation_attempts: 3,
        store_path: None,
        ..Default::default()
    }
}

fn client(relay: &Arc<FakeRelay>, seed: u8) -> Client {
    client_with(relay, seed, circuits(), settings())
}

#[derive(Default)]
struct FakeSigner {
    fail: bool,
    payloads: Mutex<Vec<Vec<u8>>>,
}

impl LedgerSigner for FakeSigner {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    fn address(&self) -> Option<String> {
        Some("ledger-alice".into())
    }

    async fn sign_and_submit_raw(&self, tx_data: &[u8]) -> Result<String> {
        if self.fail {
            return Err(ShroudError::Transport("user rejected the request".into()));
        }
        let mut payloads = self.payloads.lock();
        payloads.push(tx_data.to_vec());
        Ok(format!("ledger-tx-{}", payloads.len()))
    }
}

/// Deposit each amount and confirm it once the relay's tree holds it
async fn fund(client: &Client, relay: &FakeRelay, amounts: &[u64]) {
    let signer = FakeSigner::default();
    for amount in amounts {
        let note = client.deposit(&signer, (*amount).into()).await.unwrap();
        relay.insert_commitments([note.commitment.0]);
        let confirmed = client.confirm_note(&ctx(), &note.id).await.unwrap().unwrap();
        assert_eq!(confirmed.status, NoteStatus::Confirmed);
    }
}

fn first_output(relay: &FakeRelay, index: usize) -> Commitment {
    let submitted = &relay.submitted()[index];
    let first = submitted.metadata["outputs"].split(',').next().unwrap();
    Commitment(hex::decode(first).unwrap().try_into().unwrap())
}

fn big(n: u64) -> BigUint {
    BigUint::from(n)
}

#[tokio::test(start_paused = true)]
async fn test_transfer_conserves_value() {
    let relay = Arc::new(FakeRelay::new());
    let alice = client(&relay, 1);
    let bob = client(&relay, 2);
    fund(&alice, &relay, &[5, 3, 2]).await;
    assert_eq!(alice.balance(), big(10));

    let request = TransferRequest::new(6u32, bob.address(), bob.encryption_key()).with_memo("rent");
    let receipt = alice.transfer(&ctx(), request).await.unwrap();
    assert_eq!(receipt.circuit, CircuitKind::Transfer);
    assert_eq!(receipt.status, TxStatus::Pending);
    assert_eq!(receipt.nullifiers.len(), 2);
    assert_eq!(receipt.created.len(), 1);
    assert_eq!(receipt.created[0].kind, NoteKind::Change);
    assert_eq!(receipt.created[0].amount, big(2));
    assert_eq!(alice.reserved().len(), 2);

    // Transfer amounts never travel in the clear
    let submitted = relay.submitted();
    assert_eq!(submitted[0].amount, big(0));
    assert_eq!(submitted[0].metadata["circuit"], "transfer");

    alice.confirm(&ctx(), &receipt).await.unwrap();
    assert!(alice.reserved().is_empty());
    assert_eq!(alice.balance(), big(4));

    let encrypted = submitted[0].encrypted_output_note.clone().unwrap();
    let commitment = first_output(&relay, 0);
    let received = bob.receive(&encrypted, &commitment).unwrap().unwrap();
    assert_eq!(received.amount, big(6));
    assert_eq!(received.metadata.memo.as_deref(), Some("rent"));
    bob.confirm_note(&ctx(), &received.id).await.unwrap();

    assert_eq!(alice.balance() + bob.balance(), big(10));

    // The note is not Alice's to take
    assert!(alice.receive(&encrypted, &commitment).unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_withdraw_then_reshield() {
    let relay = Arc::new(FakeRelay::new());
    let alice = client(&relay, 1);
    fund(&alice, &relay, &[7]).await;

    let withdraw = WithdrawRequest {
        amount: big(3),
        recipient_address: "ledger-bob".into(),
    };
    let receipt = alice.withdraw(&ctx(), withdraw).await.unwrap();
    let submitted = relay.submitted();
    assert_eq!(submitted[0].amount, big(3));
    assert_eq!(submitted[0].recipient_address.as_deref(), Some("ledger-bob"));
    assert!(submitted[0].encrypted_output_note.is_none());

    alice.confirm(&ctx(), &receipt).await.unwrap();
    assert_eq!(alice.balance(), big(4));

    let receipt = alice
        .reshield(&ctx(), ReshieldRequest { amount: big(1) })
        .await
        .unwrap();
    assert_eq!(receipt.created[0].kind, NoteKind::Reshield);
    assert_eq!(receipt.created[0].amount, big(4));
    alice.confirm(&ctx(), &receipt).await.unwrap();

    assert_eq!(alice.balance(), big(4));
    let statuses: Vec<(NoteKind, NoteStatus)> =
        alice.store().notes().iter().map(|n| (n.kind, n.status)).collect();
    assert_eq!(
        statuses,
        vec![
            (NoteKind::Deposit, NoteStatus::Spent),
            (NoteKind::Change, NoteStatus::Spent),
            (NoteKind::Reshield, NoteStatus::Confirmed),
        ]
    );
    let leaf = alice.store().notes()[2].metadata.leaf_index;
    assert_eq!(leaf, Some(2));
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_inputs_are_not_reselected() {
    let relay = Arc::new(FakeRelay::new());
    let alice = client(&relay, 1);
    let bob = keys(2);
    fund(&alice, &relay, &[5]).await;

    let first = TransferRequest::new(3u32, bob.address(), bob.spending_key.encryption_public_key());
    alice.transfer(&ctx(), first.clone()).await.unwrap();

    let err = alice.transfer(&ctx(), first).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoSpendableNotes);
    assert_eq!(relay.submit_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_relay_failure_frees_inputs() {
    let relay = Arc::new(FakeRelay::new());
    let alice = client(&relay, 1);
    fund(&alice, &relay, &[5]).await;

    let receipt = alice
        .withdraw(
            &ctx(),
            WithdrawRequest {
                amount: big(2),
                recipient_address: "ledger-bob".into(),
            },
        )
        .await
        .unwrap();
    relay.push_status(Ok(status(&receipt.tx_hash, TxStatus::Failed)));

    let err = alice.confirm(&ctx(), &receipt).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SubmissionFailed);
    assert!(alice.reserved().is_empty());
    assert_eq!(alice.store().get(&receipt.created[0].id).unwrap().status, NoteStatus::Expired);
    assert_eq!(alice.balance(), big(5));

    // The freed note can be spent again
    let retry = alice
        .reshield(&ctx(), ReshieldRequest { amount: big(5) })
        .await
        .unwrap();
    assert_eq!(retry.nullifiers, receipt.nullifiers);
}

#[tokio::test(start_paused = true)]
async fn test_settled_transaction_survives_tree_outage() {
    let relay = Arc::new(FakeRelay::new());
    let alice = client(&relay, 1);
    fund(&alice, &relay, &[5]).await;

    let receipt = alice
        .withdraw(
            &ctx(),
            WithdrawRequest {
                amount: big(2),
                recipient_address: "ledger-bob".into(),
            },
        )
        .await
        .unwrap();
    relay.fail_merkle(Some(unavailable()));

    let settled = alice.confirm(&ctx(), &receipt).await.unwrap();
    assert_eq!(settled.status, TxStatus::Success);
    assert!(alice.reserved().is_empty());
    let inputs = alice.store().find_by_nullifier(&receipt.nullifiers[0]);
    assert_eq!(inputs[0].status, NoteStatus::Spent);
    let change = alice.store().get(&receipt.created[0].id).unwrap();
    assert_eq!(change.status, NoteStatus::Pending);
    assert_eq!(change.metadata.leaf_index, None);

    relay.fail_merkle(None);
    let change = alice.confirm_note(&ctx(), &change.id).await.unwrap().unwrap();
    assert_eq!(change.status, NoteStatus::Confirmed);
    assert_eq!(alice.balance(), big(3));
}

#[tokio::test(start_paused = true)]
async fn test_confirmation_timeout_keeps_reservation() {
    let relay = Arc::new(FakeRelay::new());
    let alice = client(&relay, 1);
    fund(&alice, &relay, &[5]).await;

    let receipt = alice
        .reshield(&ctx(), ReshieldRequest { amount: big(5) })
        .await
        .unwrap();
    for _ in 0..3 {
        relay.push_status(Ok(status(&receipt.tx_hash, TxStatus::Pending)));
    }

    let err = alice.confirm(&ctx(), &receipt).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfirmationTimeout);
    assert_eq!(alice.reserved(), receipt.nullifiers.iter().copied().collect::<HashSet<_>>());

    // A later poll sees the relay's success
    alice.confirm(&ctx(), &receipt).await.unwrap();
    assert!(alice.reserved().is_empty());
    assert_eq!(alice.balance(), big(5));
    assert_eq!(alice.store().get_spendable_notes()[0].kind, NoteKind::Reshield);
}

#[tokio::test(start_paused = true)]
async fn test_submission_outage_leaves_notes_untouched() {
    let relay = Arc::new(FakeRelay::new());
    let alice = client(&relay, 1);
    fund(&alice, &relay, &[5]).await;
    relay.push_submit_outages(4);

    let err = alice
        .reshield(&ctx(), ReshieldRequest { amount: big(5) })
        .await
        .unwrap_err();
    assert!(matches!(err, ShroudError::SubmissionFailed { attempts: 4, .. }));
    assert!(alice.reserved().is_empty());
    assert_eq!(alice.store().len(), 1);
    assert_eq!(alice.balance(), big(5));
}

#[tokio::test(start_paused = true)]
async fn test_missing_circuit_reaches_no_relay() {
    let relay = Arc::new(FakeRelay::new());
    let alice = client_with(&relay, 1, CircuitRegistry::new(), settings());
    fund(&alice, &relay, &[5]).await;

    let err = alice
        .reshield(&ctx(), ReshieldRequest { amount: big(5) })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingCircuit);
    assert_eq!(relay.submit_calls(), 0);
    assert!(alice.reserved().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_submitted_proof_verifies() {
    let relay = Arc::new(FakeRelay::new());
    let alice = client(&relay, 1);
    fund(&alice, &relay, &[5, 1]).await;

    alice
        .reshield(&ctx(), ReshieldRequest { amount: big(6) })
        .await
        .unwrap();
    let submitted = &relay.submitted()[0];

    let prover = alice.prover();
    let valid = prover
        .verify_proof(&ctx(), CircuitKind::Reshield, &submitted.proof, &submitted.public_signals)
        .await
        .unwrap();
    assert!(valid);

    let mut signals = submitted.public_signals.clone();
    signals.swap(1, 2);
    let valid = prover
        .verify_proof(&ctx(), CircuitKind::Reshield, &submitted.proof, &signals)
        .await
        .unwrap();
    assert!(!valid);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_deposit_expires_note() {
    let relay = Arc::new(FakeRelay::new());
    let alice = client(&relay, 1);
    let signer = FakeSigner {
        fail: true,
        ..Default::default()
    };

    let err = alice.deposit(&signer, big(9)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    let notes = alice.store().notes();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].status, NoteStatus::Expired);
    assert_eq!(alice.balance(), big(0));
}

#[tokio::test(start_paused = true)]
async fn test_deposit_payload_carries_commitment() {
    let relay = Arc::new(FakeRelay::new());
    let alice = client(&relay, 1);
    let signer = FakeSigner::default();

    let note = alice.deposit(&signer, big(42)).await.unwrap();
    assert_eq!(note.metadata.tx_hash.as_deref(), Some("ledger-tx-1"));
    assert_eq!(note.status, NoteStatus::Pending);

    let payload: serde_json::Value = serde_json::from_slice(&signer.payloads.lock()[0]).unwrap();
    assert_eq!(payload["commitment"], note.commitment.to_hex());
    assert_eq!(payload["amount"], "42");
    assert_eq!(payload["depositor"], "ledger-alice");
}

struct PrefixStealth;

impl StealthAddressProvider for PrefixStealth {
    fn derive(&self, recipient_address: &str) -> Result<String> {
        Ok(format!("stealth-{recipient_address}"))
    }
}

#[tokio::test(start_paused = true)]
async fn test_stealth_provider_rewrites_recipient() {
    let relay = Arc::new(FakeRelay::new());
    let alice = client(&relay, 1).with_stealth_provider(Arc::new(PrefixStealth));
    let bob = keys(2);
    fund(&alice, &relay, &[5]).await;

    let request = TransferRequest::new(5u32, bob.address(), bob.spending_key.encryption_public_key());
    alice.transfer(&ctx(), request).await.unwrap();

    let expected = format!("stealth-{}", bob.address());
    assert_eq!(relay.submitted()[0].recipient_address.as_deref(), Some(expected.as_str()));
}

#[tokio::test(start_paused = true)]
async fn test_save_and_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.json");
    let relay = Arc::new(FakeRelay::new());
    let alice = client_with(
        &relay,
        1,
        circuits(),
        ClientSettings {
            store_path: Some(path.clone()),
            ..settings()
        },
    );
    fund(&alice, &relay, &[5, 3]).await;
    alice.save(Some("hunter2")).unwrap();

    let reopened = NoteStore::open(&path, &keys(1), Some("hunter2")).unwrap();
    assert_eq!(reopened.get_balance(), big(8));
    assert_eq!(reopened.notes(), alice.store().notes());
}
