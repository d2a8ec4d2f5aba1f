//! Relay transport
//!
//! ```text
//! POST /auth/login                      → bearer token
//! POST /submit-transaction              → txHash
//! GET  /transaction-status/{txHash}
//! POST /estimate-fees
//! GET  /health
//! GET  /merkle/root
//! GET  /merkle/proof/{commitment}
//! ```
//!
//! Transports do no retrying or re-authentication; that is layered on top by
//! [`crate::SubmissionClient`]. A rejected token surfaces as
//! `ShroudError::Relay { status: 401, .. }`.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use shroud_error::{Result, ShroudError};
use shroud_privacy::MerkleProof;
use tracing::debug;

use crate::types::{
    FeeEstimate, HealthResponse, LoginRequest, LoginResponse, MerkleRootResponse,
    RelaySubmission, StatusResponse, SubmitResponse,
};

pub trait RelayTransport: Send + Sync {
    fn login(&self, api_key: &str) -> impl Future<Output = Result<LoginResponse>> + Send;

    fn submit(
        &self,
        token: &str,
        submission: &RelaySubmission,
    ) -> impl Future<Output = Result<SubmitResponse>> + Send;

    fn status(&self, token: &str, tx_hash: &str) -> impl Future<Output = Result<StatusResponse>> + Send;

    fn estimate_fees(
        &self,
        token: &str,
        submission: &RelaySubmission,
    ) -> impl Future<Output = Result<FeeEstimate>> + Send;

    fn health(&self) -> impl Future<Output = Result<HealthResponse>> + Send;

    fn merkle_root(&self, token: &str) -> impl Future<Output = Result<MerkleRootResponse>> + Send;

    fn merkle_proof(
        &self,
        token: &str,
        commitment_hex: &str,
    ) -> impl Future<Output = Result<MerkleProof>> + Send;
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct HttpRelayTransport {
    base_url: String,
    client: reqwest::Client,
    request_timeout: Duration,
}

impl HttpRelayTransport {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ShroudError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let response = request.send().await.map_err(|e| self.map_reqwest(e))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            debug!(status = status.as_u16(), "relay returned error status");
            return Err(ShroudError::Relay {
                status: status.as_u16(),
                message,
            });
        }

        let bytes = response.bytes().await.map_err(|e| self.map_reqwest(e))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ShroudError::Serialization(format!("invalid relay response: {e}")))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, token: Option<&str>) -> Result<T> {
        let mut request = self.client.get(self.url(path));
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        self.send(request).await
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        token: Option<&str>,
        body: &B,
    ) -> Result<T> {
        let mut request = self.client.post(self.url(path)).json(body);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        self.send(request).await
    }

    fn map_reqwest(&self, e: reqwest::Error) -> ShroudError {
        if e.is_timeout() {
            ShroudError::Timeout(self.request_timeout)
        } else {
            ShroudError::Transport(e.to_string())
        }
    }
}

impl RelayTransport for HttpRelayTransport {
    async fn login(&self, api_key: &str) -> Result<LoginResponse> {
        let body = LoginRequest {
            api_key: api_key.to_string(),
        };
        self.post("/auth/login", None, &body).await
    }

    async fn submit(&self, token: &str, submission: &RelaySubmission) -> Result<SubmitResponse> {
        self.post("/submit-transaction", Some(token), submission).await
    }

    async fn status(&self, token: &str, tx_hash: &str) -> Result<StatusResponse> {
        self.get(&format!("/transaction-status/{tx_hash}"), Some(token))
            .await
    }

    async fn estimate_fees(&self, token: &str, submission: &RelaySubmission) -> Result<FeeEstimate> {
        self.post("/estimate-fees", Some(token), submission).await
    }

    async fn health(&self) -> Result<HealthResponse> {
        self.get("/health", None).await
    }

    async fn merkle_root(&self, token: &str) -> Result<MerkleRootResponse> {
        self.get("/merkle/root", Some(token)).await
    }

    async fn merkle_proof(&self, token: &str, commitment_hex: &str) -> Result<MerkleProof> {
        self.get(&format!("/merkle/proof/{commitment_hex}"), Some(token))
            .await
    }
}
