//! # Merkle Tree Arithmetic
//!
//! Binary Merkle tree over the sorted leaf sequence. The split point of a
//! subtree of `n > 1` leaves is the largest power of two below `n`, so the
//! shape is a pure function of the leaf count and audit paths can be
//! verified from `(index, total)` alone.
//!
//! Domain separation: leaves hash under tag `0x00`, interior nodes under
//! tag `0x01`.

use sha2::{Digest, Sha256};
use shared_types::Hash;

const LEAF_TAG: u8 = 0x00;
const NODE_TAG: u8 = 0x01;

/// Hash of a leaf: tag, length-prefixed key, record hash.
pub fn leaf_hash(key: &[u8], record_hash: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_TAG]);
    hasher.update((key.len() as u64).to_le_bytes());
    hasher.update(key);
    hasher.update(record_hash);
    hasher.finalize().into()
}

fn node_hash(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([NODE_TAG]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Root of the empty tree.
pub fn empty_root() -> Hash {
    Sha256::digest([LEAF_TAG]).into()
}

/// Largest power of two strictly below `n`; `n` must be at least 2.
fn split_point(n: usize) -> usize {
    debug_assert!(n >= 2);
    1 << (usize::BITS - 1 - ((n - 1).leading_zeros()))
}

/// Merkle root over the given leaf hashes.
pub fn compute_root(leaves: &[Hash]) -> Hash {
    match leaves.len() {
        0 => empty_root(),
        1 => leaves[0],
        n => {
            let k = split_point(n);
            let left = compute_root(&leaves[..k]);
            let right = compute_root(&leaves[k..]);
            node_hash(&left, &right)
        }
    }
}

/// Sibling hashes on the path from leaf `index` to the root, leaf level
/// first. Panics in debug builds when `index` is out of range.
pub fn audit_path(leaves: &[Hash], index: usize) -> Vec<Hash> {
    debug_assert!(index < leaves.len());
    if leaves.len() <= 1 {
        return Vec::new();
    }
    let k = split_point(leaves.len());
    if index < k {
        let mut path = audit_path(&leaves[..k], index);
        path.push(compute_root(&leaves[k..]));
        path
    } else {
        let mut path = audit_path(&leaves[k..], index - k);
        path.push(compute_root(&leaves[..k]));
        path
    }
}

/// The collection root binds the entry count to the tree root, so absence
/// proofs against the first or last leaf cannot lie about the range.
pub fn collection_root(total: u64, tree_root: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(total.to_le_bytes());
    hasher.update(tree_root);
    hasher.finalize().into()
}

/// Reconstruct the root from one leaf hash and its audit path. Returns
/// `None` when the path length does not fit the claimed `(index, total)`.
pub fn root_from_path(leaf: &Hash, index: u64, total: u64, path: &[Hash]) -> Option<Hash> {
    if total == 0 || index >= total {
        return None;
    }
    if total == 1 {
        return if path.is_empty() { Some(*leaf) } else { None };
    }
    let (top, rest) = path.split_last()?;
    let k = split_point(total as usize) as u64;
    if index < k {
        let sub = root_from_path(leaf, index, k, rest)?;
        Some(node_hash(&sub, top))
    } else {
        let sub = root_from_path(leaf, index - k, total - k, rest)?;
        Some(node_hash(top, &sub))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: u8) -> Vec<Hash> {
        (0..n).map(|i| [i; 32]).collect()
    }

    #[test]
    fn split_points() {
        assert_eq!(split_point(2), 1);
        assert_eq!(split_point(3), 2);
        assert_eq!(split_point(4), 2);
        assert_eq!(split_point(5), 4);
        assert_eq!(split_point(8), 4);
        assert_eq!(split_point(9), 8);
    }

    #[test]
    fn every_audit_path_reconstructs_root() {
        for n in 1..=17u8 {
            let set = leaves(n);
            let root = compute_root(&set);
            for (i, leaf) in set.iter().enumerate() {
                let path = audit_path(&set, i);
                let rebuilt = root_from_path(leaf, i as u64, n as u64, &path)
                    .expect("path should reconstruct");
                assert_eq!(rebuilt, root, "leaf {i} of {n}");
            }
        }
    }

    #[test]
    fn wrong_index_fails() {
        let set = leaves(5);
        let root = compute_root(&set);
        let path = audit_path(&set, 2);
        let rebuilt = root_from_path(&set[2], 3, 5, &path);
        assert_ne!(rebuilt, Some(root));
    }

    #[test]
    fn truncated_path_fails() {
        let set = leaves(6);
        let mut path = audit_path(&set, 1);
        path.pop();
        assert_eq!(root_from_path(&set[1], 1, 6, &path), None);
    }

    #[test]
    fn empty_and_single() {
        assert_eq!(compute_root(&[]), empty_root());
        let one = [[9u8; 32]];
        assert_eq!(compute_root(&one), one[0]);
        assert_eq!(root_from_path(&one[0], 0, 1, &[]), Some(one[0]));
    }
}
