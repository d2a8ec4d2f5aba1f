//! Merkle Proof Client
//!
//! Fetches the commitment tree's root and inclusion paths from a remote
//! [`TreeSource`] (the relay), or serves them from a local mirror when no
//! remote is configured. Remote paths are verified before they are handed
//! to a builder.

use std::future::Future;
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::RwLock;
use shroud_error::{Result, ShroudError};
use shroud_privacy::{Commitment, Hash, LocalTree, MerkleHasher, MerkleProof, RootHistory};
use shroud_relay::{RelayTransport, SubmissionClient};
use shroud_resilience::CallContext;

/// Remote view of the commitment tree
pub trait TreeSource: Send + Sync {
    fn root(&self, ctx: &CallContext) -> impl Future<Output = Result<Hash>> + Send;

    fn proof(
        &self,
        ctx: &CallContext,
        commitment: &Commitment,
    ) -> impl Future<Output = Result<MerkleProof>> + Send;
}

impl<T: RelayTransport> TreeSource for SubmissionClient<T> {
    async fn root(&self, ctx: &CallContext) -> Result<Hash> {
        Ok(self.merkle_root(ctx).await?.root)
    }

    async fn proof(&self, ctx: &CallContext, commitment: &Commitment) -> Result<MerkleProof> {
        self.merkle_proof(ctx, &commitment.to_hex()).await
    }
}

/// Marker for a client that only uses its local mirror
#[derive(Debug, Clone, Copy)]
pub enum NoRemote {}

impl TreeSource for NoRemote {
    async fn root(&self, _ctx: &CallContext) -> Result<Hash> {
        match *self {}
    }

    async fn proof(&self, _ctx: &CallContext, _commitment: &Commitment) -> Result<MerkleProof> {
        match *self {}
    }
}

pub struct MerkleProofClient<S = NoRemote> {
    remote: Option<Arc<S>>,
    local: RwLock<LocalTree>,
    roots: RwLock<RootHistory>,
    hasher: MerkleHasher,
}

impl MerkleProofClient<NoRemote> {
    pub fn local(root_history: usize) -> Self {
        Self::build(None, root_history)
    }
}

impl<S: TreeSource> MerkleProofClient<S> {
    pub fn remote(source: Arc<S>, root_history: usize) -> Self {
        Self::build(Some(source), root_history)
    }

    fn build(remote: Option<Arc<S>>, root_history: usize) -> Self {
        let local = LocalTree::new();
        let mut roots = RootHistory::new(root_history.max(1));
        roots.push(local.root());
        Self {
            remote,
            local: RwLock::new(local),
            roots: RwLock::new(roots),
            hasher: MerkleHasher::new(),
        }
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Current root. Transient remote failures are returned, not retried.
    pub async fn fetch_root(&self, ctx: &CallContext) -> Result<Hash> {
        let root = match &self.remote {
            Some(remote) => remote.root(ctx).await?,
            None => self.local_root(),
        };
        self.roots.write().push(root);
        Ok(root)
    }

    /// Inclusion path for `commitment`
    pub async fn get_inclusion_proof(&self, ctx: &CallContext, commitment: &Commitment) -> Result<MerkleProof> {
        let proof = match &self.remote {
            Some(remote) => {
                let proof = remote.proof(ctx, commitment).await?;
                if !self.verify_path(commitment.as_bytes(), &proof) {
                    warn!("Remote path for {commitment} does not verify");
                    return Err(ShroudError::InvalidMerkleProof(format!(
                        "remote path for {commitment} does not reach its root"
                    )));
                }
                proof
            }
            None => self.local_proof(commitment)?,
        };

        debug!("Inclusion path for {commitment}: leaf {}, depth {}", proof.leaf_index, proof.depth());
        self.roots.write().push(proof.root);
        Ok(proof)
    }

    fn local_proof(&self, commitment: &Commitment) -> Result<MerkleProof> {
        let local = self.local.read();
        let index = local.position(commitment.as_bytes()).ok_or_else(|| {
            ShroudError::InvalidMerkleProof(format!("{commitment} is not in the local tree"))
        })?;
        local
            .proof(index)
            .ok_or_else(|| ShroudError::InvalidMerkleProof(format!("no path for leaf {index}")))
    }

    /// Check `proof` for `leaf` with an arbitrary two-child combinator
    pub fn verify<F>(&self, leaf: &Hash, proof: &MerkleProof, hash_fn: F) -> bool
    where
        F: Fn(&Hash, &Hash) -> Hash,
    {
        shroud_privacy::verify(leaf, proof, hash_fn)
    }

    /// Check `proof` with the tree's own combinator
    pub fn verify_path(&self, leaf: &Hash, proof: &MerkleProof) -> bool {
        self.verify(leaf, proof, |l, r| self.hasher.hash_pair(l, r))
    }

    /// Append leaves to the local mirror; returns the new root
    pub fn update_local_tree(&self, new_leaves: impl IntoIterator<Item = Hash>) -> Hash {
        let root = {
            let mut local = self.local.write();
            local.append(new_leaves);
            debug!("Local tree now {} leaves, depth {}", local.len(), local.depth());
            local.root()
        };
        self.roots.write().push(root);
        root
    }

    pub fn local_root(&self) -> Hash {
        self.local.read().root()
    }

    pub fn local_len(&self) -> usize {
        self.local.read().len()
    }

    /// Whether `root` is among the recently observed roots
    pub fn is_known_root(&self, root: &Hash) -> bool {
        self.roots.read().is_valid(root)
    }
}
