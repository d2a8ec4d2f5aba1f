//! Proof-input witnesses, one variant per circuit.
//!
//! A witness lives for exactly one builder invocation and is never persisted.
//! It carries the spender's nullifier key, so `Debug` output redacts it.

use std::collections::HashSet;
use std::fmt;

use num_bigint::BigUint;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use shroud_error::{Result, ShroudError};
use shroud_privacy::amount::decimal;
use shroud_privacy::{
    Commitment, CommitmentScheme, MerkleProof, NotePlaintext, Nullifier, NullifierKey,
};
use zeroize::Zeroize;

use crate::circuits::CircuitKind;

/// 32 bytes of secret key material
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretBytes(#[serde(with = "hex::serde")] [u8; 32]);

impl SecretBytes {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn expose(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretBytes(..)")
    }
}

impl Drop for SecretBytes {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// A note being spent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputNote {
    pub commitment: Commitment,
    pub nullifier: Nullifier,
    #[serde(with = "decimal")]
    pub amount: BigUint,
    pub recipient: String,
    #[serde(with = "hex::serde")]
    pub randomness: [u8; 32],
    pub merkle_proof: MerkleProof,
}

impl InputNote {
    pub fn new(plaintext: &NotePlaintext, key: &NullifierKey, merkle_proof: MerkleProof) -> Result<Self> {
        let commitment = commit(plaintext)?;
        Ok(Self {
            commitment,
            nullifier: key.derive_nullifier(&commitment),
            amount: plaintext.amount.clone(),
            recipient: plaintext.recipient.clone(),
            randomness: plaintext.randomness,
            merkle_proof,
        })
    }
}

/// A note being created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputNote {
    pub commitment: Commitment,
    #[serde(with = "decimal")]
    pub amount: BigUint,
    pub recipient: String,
    #[serde(with = "hex::serde")]
    pub randomness: [u8; 32],
}

impl OutputNote {
    pub fn new(plaintext: &NotePlaintext) -> Result<Self> {
        Ok(Self {
            commitment: commit(plaintext)?,
            amount: plaintext.amount.clone(),
            recipient: plaintext.recipient.clone(),
            randomness: plaintext.randomness,
        })
    }
}

fn commit(plaintext: &NotePlaintext) -> Result<Commitment> {
    plaintext
        .commitment()
        .ok_or_else(|| ShroudError::NoteCreationFailed("cannot commit to note".into()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferWitness {
    pub inputs: Vec<InputNote>,
    pub output: OutputNote,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<OutputNote>,
    pub nullifier_key: SecretBytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawWitness {
    pub inputs: Vec<InputNote>,
    #[serde(with = "decimal")]
    pub amount: BigUint,
    pub recipient_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<OutputNote>,
    pub nullifier_key: SecretBytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReshieldWitness {
    pub inputs: Vec<InputNote>,
    pub output: OutputNote,
    pub nullifier_key: SecretBytes,
}

/// Witness tagged by the circuit it targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "circuit", rename_all = "snake_case")]
pub enum Witness {
    Transfer(TransferWitness),
    Withdraw(WithdrawWitness),
    Reshield(ReshieldWitness),
}

impl Witness {
    pub fn kind(&self) -> CircuitKind {
        match self {
            Self::Transfer(_) => CircuitKind::Transfer,
            Self::Withdraw(_) => CircuitKind::Withdraw,
            Self::Reshield(_) => CircuitKind::Reshield,
        }
    }

    pub fn inputs(&self) -> &[InputNote] {
        match self {
            Self::Transfer(w) => &w.inputs,
            Self::Withdraw(w) => &w.inputs,
            Self::Reshield(w) => &w.inputs,
        }
    }

    fn nullifier_key(&self) -> &SecretBytes {
        match self {
            Self::Transfer(w) => &w.nullifier_key,
            Self::Withdraw(w) => &w.nullifier_key,
            Self::Reshield(w) => &w.nullifier_key,
        }
    }

    /// Shielded outputs in circuit order
    pub fn outputs(&self) -> Vec<&OutputNote> {
        match self {
            Self::Transfer(w) => std::iter::once(&w.output).chain(w.change.as_ref()).collect(),
            Self::Withdraw(w) => w.change.iter().collect(),
            Self::Reshield(w) => vec![&w.output],
        }
    }

    pub fn nullifiers(&self) -> Vec<Nullifier> {
        self.inputs().iter().map(|i| i.nullifier).collect()
    }

    /// Value leaving the shielded pool
    pub fn public_amount(&self) -> BigUint {
        match self {
            Self::Withdraw(w) => w.amount.clone(),
            _ => BigUint::zero(),
        }
    }

    /// Check shape, key binding, inclusion and value conservation
    pub fn validate(&self) -> Result<()> {
        let inputs = self.inputs();
        if inputs.is_empty() {
            return Err(invalid("no input notes"));
        }

        let scheme = CommitmentScheme::new();
        let key = NullifierKey::from_bytes(*self.nullifier_key().expose());
        let root = inputs[0].merkle_proof.root;
        let mut seen = HashSet::with_capacity(inputs.len());

        for (i, input) in inputs.iter().enumerate() {
            let expected = scheme.commit(&input.amount, &input.randomness, &input.recipient);
            if expected != Some(input.commitment) {
                return Err(invalid(format!("input {i}: commitment does not open")));
            }
            if key.derive_nullifier(&input.commitment) != input.nullifier {
                return Err(invalid(format!("input {i}: nullifier not derived from key")));
            }
            if input.merkle_proof.root != root {
                return Err(invalid(format!("input {i}: proves against a different root")));
            }
            if !input.merkle_proof.verify_poseidon(input.commitment.as_bytes()) {
                return Err(invalid(format!("input {i}: merkle path does not verify")));
            }
            if !seen.insert(input.nullifier) {
                return Err(invalid(format!("input {i}: duplicate nullifier")));
            }
        }

        for (i, output) in self.outputs().into_iter().enumerate() {
            let expected = scheme.commit(&output.amount, &output.randomness, &output.recipient);
            if expected != Some(output.commitment) {
                return Err(invalid(format!("output {i}: commitment does not open")));
            }
        }

        match self {
            Self::Transfer(w) if w.output.amount.is_zero() => {
                return Err(invalid("transfer amount is zero"));
            }
            Self::Withdraw(w) if w.amount.is_zero() => {
                return Err(invalid("withdraw amount is zero"));
            }
            Self::Withdraw(w) if w.recipient_address.is_empty() => {
                return Err(invalid("withdraw recipient is empty"));
            }
            _ => {}
        }

        let total_in: BigUint = inputs.iter().map(|i| &i.amount).sum();
        let total_out: BigUint = self
            .outputs()
            .into_iter()
            .map(|o| &o.amount)
            .sum::<BigUint>()
            + self.public_amount();

        if total_in != total_out {
            return Err(invalid(format!("value not conserved: in {total_in}, out {total_out}")));
        }

        Ok(())
    }

    /// Public signals, in circuit order:
    /// `root, nullifiers.., output commitments.., [amount, recipient]`
    pub fn public_signals(&self) -> Vec<String> {
        let mut signals = Vec::new();
        if let Some(first) = self.inputs().first() {
            signals.push(hex::encode(first.merkle_proof.root));
        }
        signals.extend(self.inputs().iter().map(|i| i.nullifier.to_hex()));
        signals.extend(self.outputs().into_iter().map(|o| o.commitment.to_hex()));
        if let Self::Withdraw(w) = self {
            signals.push(w.amount.to_str_radix(10));
            signals.push(w.recipient_address.clone());
        }
        signals
    }
}

fn invalid(reason: impl Into<String>) -> ShroudError {
    ShroudError::InvalidWitness(reason.into())
}
