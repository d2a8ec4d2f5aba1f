//! Merkle Tree for Note Commitments
//!
//! Inclusion proofs, a pure verifier parameterised by the two-child hash, and
//! a local mirror tree used when no trusted remote proof source is available.
//!
//! ```text
//!                    Root
//!                   /    \
//!                 H01    H23
//!                /  \   /   \
//!               H0  H1 H2   H3
//!               |   |   |    |
//!              C0  C1  C2   C3  (Note Commitments)
//! ```

use std::collections::VecDeque;

use ark_bls12_381::Fr;
use serde::{Deserialize, Serialize};

use crate::hash::{Hash, bytes_to_field, field_to_bytes, hash_fields};

/// Which side of its parent the running node sits on at a given level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Node is the left child: parent = H(node, sibling)
    Left,
    /// Node is the right child: parent = H(sibling, node)
    Right,
}

impl Direction {
    pub fn flip(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }

    fn from_index(index: u64) -> Self {
        if index & 1 == 1 { Self::Right } else { Self::Left }
    }
}

/// A Merkle path proving inclusion of a leaf under `root`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Sibling hashes from leaf to root
    #[serde(with = "hex_vec")]
    pub siblings: Vec<Hash>,
    pub directions: Vec<Direction>,
    #[serde(with = "hex::serde")]
    pub root: Hash,
    pub leaf_index: u64,
}

impl MerkleProof {
    pub fn depth(&self) -> usize {
        self.siblings.len()
    }

    /// Verify with the Poseidon combinator
    pub fn verify_poseidon(&self, leaf: &Hash) -> bool {
        let hasher = MerkleHasher::new();
        verify(leaf, self, |l, r| hasher.hash_pair(l, r))
    }
}

/// Fold `leaf` through the proof with `hash_fn` and compare to `proof.root`.
///
/// Pure; performs no I/O. A proof whose sibling and direction counts differ
/// never verifies.
pub fn verify<F>(leaf: &Hash, proof: &MerkleProof, hash_fn: F) -> bool
where
    F: Fn(&Hash, &Hash) -> Hash,
{
    if proof.siblings.len() != proof.directions.len() || proof.siblings.is_empty() {
        return false;
    }
    compute_root(leaf, &proof.siblings, &proof.directions, hash_fn) == proof.root
}

/// Recombine a leaf with its path
pub fn compute_root<F>(leaf: &Hash, siblings: &[Hash], directions: &[Direction], hash_fn: F) -> Hash
where
    F: Fn(&Hash, &Hash) -> Hash,
{
    siblings
        .iter()
        .zip(directions)
        .fold(*leaf, |current, (sibling, direction)| match direction {
            Direction::Left => hash_fn(&current, sibling),
            Direction::Right => hash_fn(sibling, &current),
        })
}

/// Poseidon-based Merkle hash function
#[derive(Debug, Clone, Copy)]
pub struct MerkleHasher {
    empty_leaf: Hash,
}

impl MerkleHasher {
    pub fn new() -> Self {
        Self {
            empty_leaf: field_to_bytes(hash_fields(&[Fr::from(0u64)])),
        }
    }

    /// Hash two children to get parent
    pub fn hash_pair(&self, left: &Hash, right: &Hash) -> Hash {
        field_to_bytes(hash_fields(&[bytes_to_field(left), bytes_to_field(right)]))
    }

    /// Padding value for unused leaf slots
    pub fn empty_leaf(&self) -> &Hash {
        &self.empty_leaf
    }
}

impl Default for MerkleHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Dense local mirror of the commitment tree.
///
/// Depth is `ceil(log2(leaf_count))`, minimum 1; unused slots hold the empty
/// leaf. Appends rebuild every level.
#[derive(Debug, Clone)]
pub struct LocalTree {
    leaves: Vec<Hash>,
    /// levels[0] = padded leaves, levels[depth] = [root]
    levels: Vec<Vec<Hash>>,
    hasher: MerkleHasher,
}

impl LocalTree {
    pub fn new() -> Self {
        let mut tree = Self {
            leaves: Vec::new(),
            levels: Vec::new(),
            hasher: MerkleHasher::new(),
        };
        tree.rebuild();
        tree
    }

    pub fn from_leaves(leaves: impl IntoIterator<Item = Hash>) -> Self {
        let mut tree = Self::new();
        tree.append(leaves);
        tree
    }

    /// Append leaves and rebuild
    pub fn append(&mut self, new_leaves: impl IntoIterator<Item = Hash>) {
        self.leaves.extend(new_leaves);
        self.rebuild();
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    pub fn depth(&self) -> usize {
        depth_for(self.leaves.len())
    }

    pub fn root(&self) -> Hash {
        self.levels[self.depth()][0]
    }

    /// Index of the first occurrence of `leaf`
    pub fn position(&self, leaf: &Hash) -> Option<u64> {
        self.leaves.iter().position(|l| l == leaf).map(|i| i as u64)
    }

    /// Inclusion proof for the leaf at `index`
    pub fn proof(&self, index: u64) -> Option<MerkleProof> {
        if index >= self.leaves.len() as u64 {
            return None;
        }

        let depth = self.depth();
        let mut siblings = Vec::with_capacity(depth);
        let mut directions = Vec::with_capacity(depth);
        let mut current = index;

        for level in 0..depth {
            siblings.push(self.levels[level][(current ^ 1) as usize]);
            directions.push(Direction::from_index(current));
            current /= 2;
        }

        Some(MerkleProof {
            siblings,
            directions,
            root: self.root(),
            leaf_index: index,
        })
    }

    fn rebuild(&mut self) {
        let depth = self.depth();
        let width = 1usize << depth;

        let mut level: Vec<Hash> = self.leaves.clone();
        level.resize(width, *self.hasher.empty_leaf());

        let mut levels = Vec::with_capacity(depth + 1);
        for _ in 0..depth {
            let parent = level
                .chunks(2)
                .map(|pair| self.hasher.hash_pair(&pair[0], &pair[1]))
                .collect();
            levels.push(std::mem::replace(&mut level, parent));
        }
        levels.push(level);
        self.levels = levels;
    }
}

impl Default for LocalTree {
    fn default() -> Self {
        Self::new()
    }
}

/// `ceil(log2(n))`, minimum 1
pub fn depth_for(leaf_count: usize) -> usize {
    if leaf_count <= 2 {
        1
    } else {
        (leaf_count - 1).ilog2() as usize + 1
    }
}

/// Root history for the commitment tree
///
/// Stores recent roots to allow transactions to reference
/// slightly stale roots (handles race conditions).
#[derive(Debug, Default)]
pub struct RootHistory {
    /// Recent roots (most recent first)
    roots: VecDeque<Hash>,
    max_size: usize,
}

impl RootHistory {
    pub fn new(max_size: usize) -> Self {
        Self {
            roots: VecDeque::with_capacity(max_size),
            max_size,
        }
    }

    /// Add a new root (consecutive duplicates are collapsed)
    pub fn push(&mut self, root: Hash) {
        if self.roots.front() == Some(&root) {
            return;
        }
        self.roots.push_front(root);
        if self.roots.len() > self.max_size {
            self.roots.pop_back();
        }
    }

    /// Check if a root is valid (current or recent)
    pub fn is_valid(&self, root: &Hash) -> bool {
        self.roots.contains(root)
    }

    /// Get the most recent root
    pub fn current(&self) -> Option<&Hash> {
        self.roots.front()
    }
}

/// Serde adapter: `Vec<[u8; 32]>` <-> list of hex strings
pub mod hex_vec {
    use serde::{Deserialize, Deserializer, Serializer, de::Error, ser::SerializeSeq};

    pub fn serialize<S: Serializer>(values: &[[u8; 32]], s: S) -> Result<S::Ok, S::Error> {
        let mut seq = s.serialize_seq(Some(values.len()))?;
        for v in values {
            seq.serialize_element(&hex::encode(v))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<[u8; 32]>, D::Error> {
        Vec::<String>::deserialize(d)?
            .iter()
            .map(|s| {
                let mut arr = [0u8; 32];
                hex::decode_to_slice(s, &mut arr).map_err(D::Error::custom)?;
                Ok(arr)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    fn random_leaves(rng: &mut StdRng, n: usize) -> Vec<Hash> {
        (0..n).map(|_| rng.r#gen::<[u8; 32]>()).collect()
    }

    #[test]
    fn test_depth_rule() {
        assert_eq!(depth_for(0), 1);
        assert_eq!(depth_for(1), 1);
        assert_eq!(depth_for(2), 1);
        assert_eq!(depth_for(3), 2);
        assert_eq!(depth_for(4), 2);
        assert_eq!(depth_for(5), 3);
        assert_eq!(depth_for(1024), 10);
        assert_eq!(depth_for(1025), 11);
    }

    #[test]
    fn test_empty_tree_has_root() {
        let tree = LocalTree::new();
        let hasher = MerkleHasher::new();
        let empty = *hasher.empty_leaf();
        assert_eq!(tree.root(), hasher.hash_pair(&empty, &empty));
        assert!(tree.proof(0).is_none());
    }

    #[test]
    fn test_round_trip_random_sets() {
        let mut rng = StdRng::seed_from_u64(7);
        for n in [1usize, 2, 3, 5, 8, 13] {
            let leaves = random_leaves(&mut rng, n);
            let tree = LocalTree::from_leaves(leaves.clone());
            for (i, leaf) in leaves.iter().enumerate() {
                let proof = tree.proof(i as u64).unwrap();
                assert_eq!(proof.depth(), depth_for(n));
                assert!(proof.verify_poseidon(leaf), "leaf {i} of {n} should verify");
            }
        }
    }

    #[test]
    fn test_flipped_direction_fails() {
        let mut rng = StdRng::seed_from_u64(11);
        let leaves = random_leaves(&mut rng, 6);
        let tree = LocalTree::from_leaves(leaves.clone());
        let proof = tree.proof(4).unwrap();

        for level in 0..proof.depth() {
            let mut tampered = proof.clone();
            tampered.directions[level] = tampered.directions[level].flip();
            assert!(!tampered.verify_poseidon(&leaves[4]), "flip at level {level}");
        }
    }

    #[test]
    fn test_substituted_sibling_fails() {
        let mut rng = StdRng::seed_from_u64(13);
        let leaves = random_leaves(&mut rng, 7);
        let tree = LocalTree::from_leaves(leaves.clone());
        let proof = tree.proof(2).unwrap();

        for level in 0..proof.depth() {
            let mut tampered = proof.clone();
            tampered.siblings[level][0] ^= 0xFF;
            assert!(!tampered.verify_poseidon(&leaves[2]), "sibling at level {level}");
        }
    }

    #[test]
    fn test_verify_uses_supplied_hash() {
        let concat = |l: &Hash, r: &Hash| *blake3::hash(&[l.as_slice(), r.as_slice()].concat()).as_bytes();
        let leaf = [1u8; 32];
        let sibling = [2u8; 32];
        let root = concat(&sibling, &leaf);
        let proof = MerkleProof {
            siblings: vec![sibling],
            directions: vec![Direction::Right],
            root,
            leaf_index: 1,
        };
        assert!(verify(&leaf, &proof, concat));

        let mut flipped = proof.clone();
        flipped.directions[0] = Direction::Left;
        assert!(!verify(&leaf, &flipped, concat));
    }

    #[test]
    fn test_mismatched_lengths_rejected() {
        let tree = LocalTree::from_leaves([[1u8; 32], [2u8; 32], [3u8; 32]]);
        let mut proof = tree.proof(0).unwrap();
        proof.directions.pop();
        assert!(!proof.verify_poseidon(&[1u8; 32]));
    }

    #[test]
    fn test_append_changes_root() {
        let mut tree = LocalTree::from_leaves([[1u8; 32]]);
        let root1 = tree.root();
        tree.append([[2u8; 32], [3u8; 32]]);
        assert_ne!(root1, tree.root());
        assert_eq!(tree.depth(), 2);
        assert_eq!(tree.position(&[3u8; 32]), Some(2));
    }

    #[test]
    fn test_proof_json_roundtrip() {
        let tree = LocalTree::from_leaves([[1u8; 32], [2u8; 32], [3u8; 32]]);
        let proof = tree.proof(1).unwrap();
        let json = serde_json::to_string(&proof).unwrap();
        assert!(json.contains("\"right\""));
        let back: MerkleProof = serde_json::from_str(&json).unwrap();
        assert_eq!(back, proof);
    }

    #[test]
    fn test_root_history() {
        let mut history = RootHistory::new(2);

        history.push([1u8; 32]);
        history.push([2u8; 32]);
        history.push([2u8; 32]);
        history.push([3u8; 32]);

        assert!(!history.is_valid(&[1u8; 32]), "oldest root should be evicted");
        assert!(history.is_valid(&[2u8; 32]));
        assert!(history.is_valid(&[3u8; 32]));
        assert_eq!(history.current(), Some(&[3u8; 32]));
    }
}
