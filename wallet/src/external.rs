//! Collaborators outside the pipeline.

use std::future::Future;

use shroud_error::Result;

/// Optional service that swaps a recipient address for a one-time stealth
/// address before the output note is committed
pub trait StealthAddressProvider: Send + Sync {
    fn derive(&self, recipient_address: &str) -> Result<String>;
}

/// Ledger wallet that signs and broadcasts raw transactions. The pipeline
/// only produces payloads for it.
pub trait LedgerSigner: Send + Sync {
    fn connect(&self) -> impl Future<Output = Result<()>> + Send;

    /// Ledger address of the connected account
    fn address(&self) -> Option<String>;

    /// Returns the ledger transaction hash
    fn sign_and_submit_raw(&self, tx_data: &[u8]) -> impl Future<Output = Result<String>> + Send;
}
