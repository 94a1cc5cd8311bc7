//! The in-memory authenticated collection.

use crate::domain::proof::{Proof, ProofLeaf};
use crate::domain::record::{Record, StateAction, StateChange};
use crate::domain::tree::{audit_path, collection_root, compute_root, leaf_hash};
use crate::errors::CollectionError;
use shared_types::{DarcId, Hash};
use std::collections::BTreeMap;

/// Read-only view of a collection, handed to contracts.
pub trait CollectionView {
    /// The record stored under `key`, if any.
    fn get_record(&self, key: &[u8]) -> Option<Record>;

    /// Value, contract id and darc id under `key`; an absent key is an
    /// error.
    fn get_values(&self, key: &[u8]) -> Result<(Vec<u8>, String, DarcId), CollectionError> {
        self.get_record(key)
            .map(|record| (record.value, record.contract_id, record.darc_id))
            .ok_or_else(|| CollectionError::KeyNotFound(hex_prefix(key)))
    }
}

/// Merkle-hashed map from instance keys to records.
///
/// Entries are kept sorted by key; the root is a pure function of the
/// entry set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Collection {
    entries: BTreeMap<Vec<u8>, Record>,
}

impl Collection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &[u8]) -> Option<&Record> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &Record)> {
        self.entries.iter()
    }

    /// Insert a new entry; the key must not exist yet.
    pub fn add(&mut self, key: Vec<u8>, record: Record) -> Result<(), CollectionError> {
        if self.entries.contains_key(&key) {
            return Err(CollectionError::KeyExists(hex_prefix(&key)));
        }
        self.entries.insert(key, record);
        Ok(())
    }

    /// Replace an existing entry; the key must exist.
    pub fn set(&mut self, key: Vec<u8>, record: Record) -> Result<(), CollectionError> {
        if !self.entries.contains_key(&key) {
            return Err(CollectionError::KeyNotFound(hex_prefix(&key)));
        }
        self.entries.insert(key, record);
        Ok(())
    }

    /// Drop an existing entry; the key must exist.
    pub fn remove(&mut self, key: &[u8]) -> Result<(), CollectionError> {
        self.entries
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| CollectionError::KeyNotFound(hex_prefix(key)))
    }

    /// Apply one state change.
    pub fn apply(&mut self, change: &StateChange) -> Result<(), CollectionError> {
        let key = change.instance_id.to_key();
        match change.action {
            StateAction::Create => self.add(key, change.record()),
            StateAction::Update => self.set(key, change.record()),
            StateAction::Remove => self.remove(&key),
        }
    }

    /// Apply a batch of state changes in order.
    pub fn apply_all(&mut self, changes: &[StateChange]) -> Result<(), CollectionError> {
        for change in changes {
            self.apply(change)?;
        }
        Ok(())
    }

    /// Root hash after applying `changes`, without touching this
    /// collection. Works on a shadow copy, so failure leaves no residue.
    pub fn try_apply(&self, changes: &[StateChange]) -> Result<Hash, CollectionError> {
        let mut shadow = self.clone();
        shadow.apply_all(changes)?;
        Ok(shadow.root_hash())
    }

    /// A snapshot sharing nothing with this collection.
    pub fn snapshot(&self) -> Collection {
        self.clone()
    }

    /// Deterministic root over the current entry set.
    pub fn root_hash(&self) -> Hash {
        let leaves = self.leaf_hashes();
        collection_root(leaves.len() as u64, &compute_root(&leaves))
    }

    /// Inclusion or absence proof for `key`.
    pub fn proof(&self, key: &[u8]) -> Proof {
        let keys: Vec<&Vec<u8>> = self.entries.keys().collect();
        let leaves = self.leaf_hashes();
        let total = leaves.len() as u64;

        match keys.binary_search_by(|k| k.as_slice().cmp(key)) {
            Ok(index) => Proof {
                key: key.to_vec(),
                total,
                leaf: Some(self.proof_leaf(&leaves, index)),
                left: None,
                right: None,
            },
            Err(insertion) => Proof {
                key: key.to_vec(),
                total,
                leaf: None,
                left: insertion
                    .checked_sub(1)
                    .map(|i| self.proof_leaf(&leaves, i)),
                right: (insertion < keys.len()).then(|| self.proof_leaf(&leaves, insertion)),
            },
        }
    }

    fn proof_leaf(&self, leaves: &[Hash], index: usize) -> ProofLeaf {
        let (key, record) = self
            .entries
            .iter()
            .nth(index)
            .expect("index within entry range");
        ProofLeaf {
            index: index as u64,
            key: key.clone(),
            record: record.clone(),
            path: audit_path(leaves, index),
        }
    }

    fn leaf_hashes(&self) -> Vec<Hash> {
        self.entries
            .iter()
            .map(|(key, record)| leaf_hash(key, &record.hash()))
            .collect()
    }
}

impl CollectionView for Collection {
    fn get_record(&self, key: &[u8]) -> Option<Record> {
        self.entries.get(key).cloned()
    }
}

fn hex_prefix(key: &[u8]) -> String {
    hex::encode(&key[..key.len().min(8)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{InstanceId, SubId};

    fn record(n: u8) -> Record {
        Record::new(vec![n; 4], "dummy", DarcId([n; 32]))
    }

    fn key(n: u8) -> Vec<u8> {
        vec![n; 8]
    }

    #[test]
    fn root_independent_of_insertion_order() {
        let mut a = Collection::new();
        a.add(key(1), record(1)).unwrap();
        a.add(key(2), record(2)).unwrap();
        a.add(key(3), record(3)).unwrap();

        let mut b = Collection::new();
        b.add(key(3), record(3)).unwrap();
        b.add(key(1), record(1)).unwrap();
        b.add(key(2), record(2)).unwrap();

        assert_eq!(a.root_hash(), b.root_hash());
    }

    #[test]
    fn root_changes_with_content() {
        let mut coll = Collection::new();
        let empty = coll.root_hash();
        coll.add(key(1), record(1)).unwrap();
        let one = coll.root_hash();
        assert_ne!(empty, one);

        coll.set(key(1), record(2)).unwrap();
        assert_ne!(one, coll.root_hash());

        coll.remove(&key(1)).unwrap();
        assert_eq!(empty, coll.root_hash());
    }

    #[test]
    fn add_set_remove_preconditions() {
        let mut coll = Collection::new();
        assert!(coll.set(key(1), record(1)).is_err());
        assert!(coll.remove(&key(1)).is_err());
        coll.add(key(1), record(1)).unwrap();
        assert!(matches!(
            coll.add(key(1), record(1)),
            Err(CollectionError::KeyExists(_))
        ));
    }

    #[test]
    fn inclusion_proofs_for_every_key() {
        let mut coll = Collection::new();
        for n in 1..=9 {
            coll.add(key(n), record(n)).unwrap();
        }
        let root = coll.root_hash();
        for n in 1..=9 {
            let proof = coll.proof(&key(n));
            assert!(proof.matches());
            assert!(proof.verify(&root).is_ok(), "key {n}");
            assert_eq!(proof.record().unwrap().value, vec![n; 4]);
        }
    }

    #[test]
    fn absence_proofs() {
        let mut coll = Collection::new();
        coll.add(key(2), record(2)).unwrap();
        coll.add(key(4), record(4)).unwrap();
        coll.add(key(6), record(6)).unwrap();
        let root = coll.root_hash();

        // between two leaves, below the first, above the last
        for probe in [key(3), key(1), key(9)] {
            let proof = coll.proof(&probe);
            assert!(!proof.matches());
            assert!(proof.verify(&root).is_ok());
        }

        // empty collection
        let empty = Collection::new();
        let proof = empty.proof(&key(5));
        assert!(!proof.matches());
        assert!(proof.verify(&empty.root_hash()).is_ok());
    }

    #[test]
    fn proof_rejects_wrong_root() {
        let mut coll = Collection::new();
        coll.add(key(1), record(1)).unwrap();
        let proof = coll.proof(&key(1));

        coll.set(key(1), record(9)).unwrap();
        assert!(proof.verify(&coll.root_hash()).is_err());
    }

    #[test]
    fn try_apply_leaves_no_residue() {
        let mut coll = Collection::new();
        coll.add(key(1), record(1)).unwrap();
        let before_root = coll.root_hash();
        let before = coll.clone();

        let id = InstanceId::new(DarcId([5; 32]), SubId::zero());
        let changes = vec![
            StateChange::create(id, "dummy", DarcId([5; 32]), vec![1]),
            // second create of the same key fails mid-batch
            StateChange::create(id, "dummy", DarcId([5; 32]), vec![2]),
        ];
        assert!(coll.try_apply(&changes).is_err());
        assert_eq!(coll, before);
        assert_eq!(coll.root_hash(), before_root);

        // successful try_apply reports the new root without applying
        let ok = vec![StateChange::create(id, "dummy", DarcId([5; 32]), vec![1])];
        let new_root = coll.try_apply(&ok).unwrap();
        assert_ne!(new_root, before_root);
        assert_eq!(coll.root_hash(), before_root);
    }
}
