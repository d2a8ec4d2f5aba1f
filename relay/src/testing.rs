//! In-memory relay for tests.
//!
//! Responses are scripted per endpoint; once a script runs dry the fake
//! answers like a healthy relay. Submitted output commitments are appended
//! to an in-memory tree so Merkle queries reflect what was accepted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use shroud_error::{Result, ShroudError};
use shroud_privacy::{Hash, LocalTree, MerkleProof};

use crate::transport::RelayTransport;
use crate::types::{
    FeeEstimate, HealthResponse, LoginResponse, MerkleRootResponse, RelaySubmission,
    StatusResponse, SubmitResponse, TxStatus,
};

#[derive(Debug, Default)]
pub struct FakeRelay {
    logins: Mutex<VecDeque<Result<LoginResponse>>>,
    submits: Mutex<VecDeque<Result<SubmitResponse>>>,
    statuses: Mutex<VecDeque<Result<StatusResponse>>>,
    merkle_failure: Mutex<Option<ShroudError>>,
    tamper_proofs: Mutex<bool>,
    tree: Mutex<LocalTree>,
    submitted: Mutex<Vec<RelaySubmission>>,
    tokens_seen: Mutex<Vec<String>>,
    login_calls: AtomicU32,
    submit_calls: AtomicU32,
    status_calls: AtomicU32,
}

impl FakeRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_login(&self, result: Result<LoginResponse>) {
        self.logins.lock().push_back(result);
    }

    pub fn push_submit(&self, result: Result<SubmitResponse>) {
        self.submits.lock().push_back(result);
    }

    pub fn push_status(&self, result: Result<StatusResponse>) {
        self.statuses.lock().push_back(result);
    }

    /// Queue `n` copies of a transient 503 on submit
    pub fn push_submit_outages(&self, n: usize) {
        for _ in 0..n {
            self.push_submit(Err(unavailable()));
        }
    }

    /// Make every Merkle query fail with `err` (or succeed again with `None`)
    pub fn fail_merkle(&self, err: Option<ShroudError>) {
        *self.merkle_failure.lock() = err;
    }

    /// Serve inclusion proofs whose first sibling is corrupted
    pub fn tamper_proofs(&self, tamper: bool) {
        *self.tamper_proofs.lock() = tamper;
    }

    /// Append commitments to the relay's tree
    pub fn insert_commitments(&self, commitments: impl IntoIterator<Item = Hash>) {
        self.tree.lock().append(commitments);
    }

    pub fn root(&self) -> Hash {
        self.tree.lock().root()
    }

    pub fn submitted(&self) -> Vec<RelaySubmission> {
        self.submitted.lock().clone()
    }

    pub fn tokens_seen(&self) -> Vec<String> {
        self.tokens_seen.lock().clone()
    }

    pub fn login_calls(&self) -> u32 {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn submit_calls(&self) -> u32 {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }

    fn merkle_guard(&self, token: &str) -> Result<()> {
        self.tokens_seen.lock().push(token.to_string());
        match self.merkle_failure.lock().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

pub fn unavailable() -> ShroudError {
    ShroudError::Relay {
        status: 503,
        message: "service unavailable".into(),
    }
}

pub fn unauthorized() -> ShroudError {
    ShroudError::Relay {
        status: 401,
        message: "token expired".into(),
    }
}

pub fn status(tx_hash: &str, status: TxStatus) -> StatusResponse {
    StatusResponse {
        tx_hash: tx_hash.to_string(),
        status,
        error: None,
        confirmations: None,
    }
}

impl RelayTransport for FakeRelay {
    async fn login(&self, api_key: &str) -> Result<LoginResponse> {
        let n = self.login_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(scripted) = self.logins.lock().pop_front() {
            return scripted;
        }
        if api_key.is_empty() {
            return Err(ShroudError::Relay {
                status: 401,
                message: "invalid api key".into(),
            });
        }
        Ok(LoginResponse {
            token: format!("token-{n}"),
            expires_in: 3600,
        })
    }

    async fn submit(&self, token: &str, submission: &RelaySubmission) -> Result<SubmitResponse> {
        let n = self.submit_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.tokens_seen.lock().push(token.to_string());
        if let Some(scripted) = self.submits.lock().pop_front() {
            return scripted;
        }

        // Output commitments travel as comma-separated hex in `outputs`
        if let Some(outputs) = submission.metadata.get("outputs") {
            let leaves = outputs
                .split(',')
                .filter_map(|h| hex::decode(h).ok())
                .filter_map(|b| <Hash>::try_from(b.as_slice()).ok());
            self.tree.lock().append(leaves);
        }
        self.submitted.lock().push(submission.clone());

        Ok(SubmitResponse {
            tx_hash: format!("0x{n:064x}"),
            status: TxStatus::Pending,
        })
    }

    async fn status(&self, token: &str, tx_hash: &str) -> Result<StatusResponse> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.tokens_seen.lock().push(token.to_string());
        match self.statuses.lock().pop_front() {
            Some(scripted) => scripted,
            None => Ok(status(tx_hash, TxStatus::Success)),
        }
    }

    async fn estimate_fees(&self, _token: &str, submission: &RelaySubmission) -> Result<FeeEstimate> {
        Ok(FeeEstimate {
            network_fee: 5_000u32.into(),
            relay_fee: 1_000u32.into(),
            chain_type: submission.chain_type.clone(),
        })
    }

    async fn health(&self) -> Result<HealthResponse> {
        Ok(HealthResponse {
            status: "ok".into(),
            version: Some("fake".into()),
        })
    }

    async fn merkle_root(&self, token: &str) -> Result<MerkleRootResponse> {
        self.merkle_guard(token)?;
        let tree = self.tree.lock();
        Ok(MerkleRootResponse {
            root: tree.root(),
            leaf_count: tree.len() as u64,
        })
    }

    async fn merkle_proof(&self, token: &str, commitment_hex: &str) -> Result<MerkleProof> {
        self.merkle_guard(token)?;
        let not_found = || ShroudError::Relay {
            status: 404,
            message: format!("commitment {commitment_hex} not in tree"),
        };

        let leaf: Hash = hex::decode(commitment_hex)
            .ok()
            .and_then(|b| b.as_slice().try_into().ok())
            .ok_or_else(not_found)?;

        let tree = self.tree.lock();
        let index = tree.position(&leaf).ok_or_else(not_found)?;
        let mut proof = tree.proof(index).ok_or_else(not_found)?;
        if *self.tamper_proofs.lock() {
            if let Some(sibling) = proof.siblings.first_mut() {
                sibling[0] ^= 0xff;
            }
        }
        Ok(proof)
    }
}
