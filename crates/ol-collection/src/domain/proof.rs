//! # Inclusion and Absence Proofs
//!
//! A proof is self-contained: a verifier holding nothing but the expected
//! collection root can check that a key maps to a record, or that a key is
//! not present at all.
//!
//! Inclusion carries the matched leaf and its audit path. Absence carries
//! the two leaves that would bracket the key in sorted order (one of them
//! may be missing at the edges of the key space), whose adjacent indices
//! prove no leaf lies between them.

use crate::domain::record::Record;
use crate::domain::tree::{collection_root, empty_root, leaf_hash, root_from_path};
use crate::errors::CollectionError;
use serde::{Deserialize, Serialize};
use shared_types::Hash;

/// One leaf together with its position and audit path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofLeaf {
    pub index: u64,
    pub key: Vec<u8>,
    pub record: Record,
    pub path: Vec<Hash>,
}

impl ProofLeaf {
    /// Tree root this leaf reconstructs to, if the path fits.
    fn tree_root(&self, total: u64) -> Option<Hash> {
        let leaf = leaf_hash(&self.key, &self.record.hash());
        root_from_path(&leaf, self.index, total, &self.path)
    }
}

/// Proof that `key` is, or is not, present in a collection of `total`
/// entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub key: Vec<u8>,
    pub total: u64,
    /// The matched leaf; `Some` makes this an inclusion proof.
    pub leaf: Option<ProofLeaf>,
    /// Nearest leaf below `key` (absence proofs only).
    pub left: Option<ProofLeaf>,
    /// Nearest leaf above `key` (absence proofs only).
    pub right: Option<ProofLeaf>,
}

impl Proof {
    /// True when the proof witnesses the key's presence.
    pub fn matches(&self) -> bool {
        self.leaf.is_some()
    }

    /// The proven record, for inclusion proofs.
    pub fn record(&self) -> Option<&Record> {
        self.leaf.as_ref().map(|leaf| &leaf.record)
    }

    /// The proven key and record, for inclusion proofs.
    pub fn key_value(&self) -> Result<(&[u8], &Record), CollectionError> {
        self.leaf
            .as_ref()
            .map(|leaf| (leaf.key.as_slice(), &leaf.record))
            .ok_or_else(|| {
                CollectionError::KeyNotFound(hex_prefix(&self.key))
            })
    }

    /// Verify the proof against `expected_root`.
    pub fn verify(&self, expected_root: &Hash) -> Result<(), CollectionError> {
        match &self.leaf {
            Some(leaf) => self.verify_inclusion(leaf, expected_root),
            None => self.verify_absence(expected_root),
        }
    }

    fn verify_inclusion(&self, leaf: &ProofLeaf, expected_root: &Hash) -> Result<(), CollectionError> {
        if leaf.key != self.key {
            return Err(CollectionError::InvalidProof(
                "leaf key differs from proven key".into(),
            ));
        }
        let tree = leaf
            .tree_root(self.total)
            .ok_or_else(|| CollectionError::InvalidProof("audit path does not fit".into()))?;
        self.check_root(&tree, expected_root)
    }

    fn verify_absence(&self, expected_root: &Hash) -> Result<(), CollectionError> {
        if self.total == 0 {
            if self.left.is_some() || self.right.is_some() {
                return Err(CollectionError::InvalidProof(
                    "neighbors in an empty collection".into(),
                ));
            }
            return self.check_root(&empty_root(), expected_root);
        }

        match (&self.left, &self.right) {
            (Some(left), Some(right)) => {
                if left.index + 1 != right.index {
                    return Err(CollectionError::InvalidProof(
                        "bracketing leaves not adjacent".into(),
                    ));
                }
                if !(left.key.as_slice() < self.key.as_slice()
                    && self.key.as_slice() < right.key.as_slice())
                {
                    return Err(CollectionError::InvalidProof(
                        "key not between bracketing leaves".into(),
                    ));
                }
                let tree_left = left
                    .tree_root(self.total)
                    .ok_or_else(|| CollectionError::InvalidProof("left path does not fit".into()))?;
                let tree_right = right.tree_root(self.total).ok_or_else(|| {
                    CollectionError::InvalidProof("right path does not fit".into())
                })?;
                if tree_left != tree_right {
                    return Err(CollectionError::InvalidProof(
                        "bracketing leaves disagree on the root".into(),
                    ));
                }
                self.check_root(&tree_left, expected_root)
            }
            (None, Some(right)) => {
                if right.index != 0 {
                    return Err(CollectionError::InvalidProof(
                        "first-leaf witness not at index 0".into(),
                    ));
                }
                if self.key.as_slice() >= right.key.as_slice() {
                    return Err(CollectionError::InvalidProof(
                        "key not below the first leaf".into(),
                    ));
                }
                let tree = right
                    .tree_root(self.total)
                    .ok_or_else(|| CollectionError::InvalidProof("path does not fit".into()))?;
                self.check_root(&tree, expected_root)
            }
            (Some(left), None) => {
                if left.index + 1 != self.total {
                    return Err(CollectionError::InvalidProof(
                        "last-leaf witness not at the end".into(),
                    ));
                }
                if self.key.as_slice() <= left.key.as_slice() {
                    return Err(CollectionError::InvalidProof(
                        "key not above the last leaf".into(),
                    ));
                }
                let tree = left
                    .tree_root(self.total)
                    .ok_or_else(|| CollectionError::InvalidProof("path does not fit".into()))?;
                self.check_root(&tree, expected_root)
            }
            (None, None) => Err(CollectionError::InvalidProof(
                "absence proof without witnesses".into(),
            )),
        }
    }

    fn check_root(&self, tree_root: &Hash, expected_root: &Hash) -> Result<(), CollectionError> {
        if &collection_root(self.total, tree_root) == expected_root {
            Ok(())
        } else {
            Err(CollectionError::InvalidProof("root mismatch".into()))
        }
    }
}

fn hex_prefix(key: &[u8]) -> String {
    hex::encode(&key[..key.len().min(8)])
}
