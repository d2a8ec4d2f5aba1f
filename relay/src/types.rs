//! Relay wire types (JSON, camelCase).

use std::collections::BTreeMap;
use std::fmt;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use shroud_privacy::EncryptedNote;
use shroud_privacy::amount::decimal;

/// Lifecycle of one submission
///
/// ```text
/// built → submitting → pending → success
///              │           └──→ failed
///              └─────────────→ failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Built,
    Submitting,
    Pending,
    Success,
    Failed,
}

impl TxStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    pub fn can_advance_to(&self, next: TxStatus) -> bool {
        use TxStatus::*;
        matches!(
            (self, next),
            (Built, Submitting)
                | (Submitting, Pending)
                | (Submitting, Failed)
                | (Pending, Pending)
                | (Pending, Success)
                | (Pending, Failed)
        )
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Built => "built",
            Self::Submitting => "submitting",
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Payload for `POST /submit-transaction` and `POST /estimate-fees`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelaySubmission {
    #[serde(with = "hex::serde")]
    pub proof: Vec<u8>,
    pub public_signals: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_output_note: Option<EncryptedNote>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_address: Option<String>,
    #[serde(with = "decimal")]
    pub amount: BigUint,
    pub chain_type: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub tx_hash: String,
    pub status: TxStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub tx_hash: String,
    pub status: TxStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmations: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeEstimate {
    #[serde(with = "decimal")]
    pub network_fee: BigUint,
    #[serde(with = "decimal")]
    pub relay_fee: BigUint,
    pub chain_type: String,
}

impl FeeEstimate {
    pub fn total(&self) -> BigUint {
        &self.network_fee + &self.relay_fee
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl HealthResponse {
    pub fn is_healthy(&self) -> bool {
        matches!(self.status.as_str(), "ok" | "healthy")
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub api_key: String,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest").finish_non_exhaustive()
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    /// Token lifetime in seconds
    pub expires_in: u64,
}

impl fmt::Debug for LoginResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginResponse")
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerkleRootResponse {
    #[serde(with = "hex::serde")]
    pub root: [u8; 32],
    #[serde(default)]
    pub leaf_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        use TxStatus::*;
        assert!(Built.can_advance_to(Submitting));
        assert!(Submitting.can_advance_to(Pending));
        assert!(Pending.can_advance_to(Success));
        assert!(Pending.can_advance_to(Failed));
        assert!(!Success.can_advance_to(Pending));
        assert!(!Failed.can_advance_to(Success));
        assert!(!Built.can_advance_to(Success));
        assert!(Success.is_terminal() && Failed.is_terminal() && !Pending.is_terminal());
    }

    #[test]
    fn test_submission_wire_shape() {
        let submission = RelaySubmission {
            proof: vec![0xde, 0xad],
            public_signals: vec!["01".into()],
            encrypted_output_note: None,
            recipient_address: Some("bob".into()),
            amount: BigUint::from(10u32).pow(30),
            chain_type: "solana".into(),
            metadata: BTreeMap::from([("memo".to_string(), "rent".to_string())]),
        };
        let json = serde_json::to_value(&submission).unwrap();
        assert_eq!(json["proof"], "dead");
        assert_eq!(json["publicSignals"][0], "01");
        assert_eq!(json["recipientAddress"], "bob");
        assert_eq!(json["amount"], format!("1{}", "0".repeat(30)));
        assert_eq!(json["chainType"], "solana");
        assert!(json.get("encryptedOutputNote").is_none());

        let back: RelaySubmission = serde_json::from_value(json).unwrap();
        assert_eq!(back, submission);
    }

    #[test]
    fn test_status_response_parse() {
        let resp: StatusResponse =
            serde_json::from_str(r#"{"txHash":"abc","status":"failed","error":"nullifier spent"}"#)
                .unwrap();
        assert_eq!(resp.status, TxStatus::Failed);
        assert_eq!(resp.error.as_deref(), Some("nullifier spent"));
    }

    #[test]
    fn test_login_debug_hides_token() {
        let resp = LoginResponse {
            token: "secret-token".into(),
            expires_in: 3600,
        };
        assert!(!format!("{resp:?}").contains("secret-token"));
    }
}
