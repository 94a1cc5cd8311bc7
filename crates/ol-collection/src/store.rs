//! # Collection Persistence
//!
//! Each record is persisted under three sibling keys inside the chain's
//! bucket, distinguished by a leading tag byte: `0` value, `1` contract id,
//! `2` darc id. One applied block becomes one atomic batch; if the batch
//! fails, the in-memory collection is rolled back so the store stays
//! authoritative.

use crate::domain::collection::Collection;
use crate::domain::record::{Record, StateAction, StateChange};
use crate::errors::CollectionError;
use crate::ports::{BatchOperation, KeyValueStore};
use parking_lot::Mutex;
use shared_types::{DarcId, Hash};
use std::sync::Arc;

/// Byte store shared by every per-chain structure of one node.
pub type SharedKVStore = Arc<Mutex<dyn KeyValueStore + Send>>;

const TAG_VALUE: u8 = 0;
const TAG_CONTRACT: u8 = 1;
const TAG_DARC: u8 = 2;

/// A collection bound to its bucket in the byte store.
pub struct CollectionStore {
    collection: Collection,
    store: SharedKVStore,
    bucket: Vec<u8>,
}

impl CollectionStore {
    /// Open the bucket and reconstruct the collection from all persisted
    /// records.
    pub fn open(store: SharedKVStore, bucket: Vec<u8>) -> Result<Self, CollectionError> {
        let mut this = Self {
            collection: Collection::new(),
            store,
            bucket,
        };
        this.load_all()?;
        Ok(this)
    }

    /// Read-only access to the in-memory collection.
    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    pub fn root_hash(&self) -> Hash {
        self.collection.root_hash()
    }

    /// Apply a batch of state changes to memory and store atomically.
    ///
    /// On a store failure, the in-memory mutation is rolled back and the
    /// error is reported as `StoreFailure`; the caller must treat it as
    /// fatal for the chain.
    pub fn apply(&mut self, changes: &[StateChange]) -> Result<Hash, CollectionError> {
        let checkpoint = self.collection.snapshot();
        self.collection.apply_all(changes).map_err(|err| {
            self.collection = checkpoint.clone();
            err
        })?;

        let operations = changes.iter().flat_map(|sc| self.batch_ops(sc)).collect();
        if let Err(err) = self.store.lock().atomic_batch_write(operations) {
            self.collection = checkpoint;
            return Err(CollectionError::StoreFailure(err.to_string()));
        }
        Ok(self.collection.root_hash())
    }

    fn batch_ops(&self, change: &StateChange) -> Vec<BatchOperation> {
        let key = change.instance_id.to_key();
        match change.action {
            StateAction::Create | StateAction::Update => vec![
                BatchOperation::put(self.store_key(TAG_VALUE, &key), change.value.clone()),
                BatchOperation::put(
                    self.store_key(TAG_CONTRACT, &key),
                    change.contract_id.as_bytes(),
                ),
                BatchOperation::put(self.store_key(TAG_DARC, &key), change.darc_id.0.to_vec()),
            ],
            StateAction::Remove => vec![
                BatchOperation::delete(self.store_key(TAG_VALUE, &key)),
                BatchOperation::delete(self.store_key(TAG_CONTRACT, &key)),
                BatchOperation::delete(self.store_key(TAG_DARC, &key)),
            ],
        }
    }

    fn store_key(&self, tag: u8, key: &[u8]) -> Vec<u8> {
        let mut full = Vec::with_capacity(self.bucket.len() + 1 + key.len());
        full.extend_from_slice(&self.bucket);
        full.push(tag);
        full.extend_from_slice(key);
        full
    }

    /// Scan the bucket and rebuild the collection. Value keys drive the
    /// scan; a missing contract or darc sibling means the store is corrupt.
    fn load_all(&mut self) -> Result<(), CollectionError> {
        let store = self.store.lock();
        let mut value_prefix = self.bucket.clone();
        value_prefix.push(TAG_VALUE);

        for (full_key, value) in store.prefix_scan(&value_prefix)? {
            let key = full_key[value_prefix.len()..].to_vec();

            let contract = store
                .get(&self.store_key(TAG_CONTRACT, &key))?
                .ok_or_else(|| {
                    CollectionError::Corrupt(format!(
                        "contract id missing for {}",
                        hex::encode(&key[..key.len().min(8)])
                    ))
                })?;
            let darc = store.get(&self.store_key(TAG_DARC, &key))?.ok_or_else(|| {
                CollectionError::Corrupt(format!(
                    "darc id missing for {}",
                    hex::encode(&key[..key.len().min(8)])
                ))
            })?;
            let darc: [u8; 32] = darc
                .try_into()
                .map_err(|_| CollectionError::Corrupt("darc id is not 32 bytes".into()))?;
            let contract_id = String::from_utf8(contract)
                .map_err(|_| CollectionError::Corrupt("contract id is not utf-8".into()))?;

            self.collection
                .add(key, Record::new(value, contract_id, DarcId(darc)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryKVStore;
    use shared_types::{InstanceId, SubId};

    fn shared_store() -> SharedKVStore {
        Arc::new(Mutex::new(InMemoryKVStore::new()))
    }

    fn change(n: u8) -> StateChange {
        StateChange::create(
            InstanceId::new(DarcId([n; 32]), SubId::zero()),
            "dummy",
            DarcId([n; 32]),
            vec![n; 3],
        )
    }

    #[test]
    fn persists_and_reloads() {
        let store = shared_store();
        let bucket = vec![7u8; 32];

        let root = {
            let mut cs = CollectionStore::open(store.clone(), bucket.clone()).unwrap();
            cs.apply(&[change(1), change(2)]).unwrap()
        };

        let reloaded = CollectionStore::open(store, bucket).unwrap();
        assert_eq!(reloaded.collection().len(), 2);
        assert_eq!(reloaded.root_hash(), root);
    }

    #[test]
    fn buckets_are_isolated() {
        let store = shared_store();
        let mut a = CollectionStore::open(store.clone(), vec![1u8; 32]).unwrap();
        a.apply(&[change(1)]).unwrap();

        let b = CollectionStore::open(store, vec![2u8; 32]).unwrap();
        assert!(b.collection().is_empty());
    }

    #[test]
    fn remove_deletes_all_siblings() {
        let store = shared_store();
        let mut cs = CollectionStore::open(store.clone(), vec![3u8; 32]).unwrap();
        cs.apply(&[change(1)]).unwrap();

        let id = InstanceId::new(DarcId([1; 32]), SubId::zero());
        cs.apply(&[StateChange::remove(id, DarcId([1; 32]))]).unwrap();
        assert!(cs.collection().is_empty());

        // nothing but the bucket scan prefix remains
        let reloaded = CollectionStore::open(store, vec![3u8; 32]).unwrap();
        assert!(reloaded.collection().is_empty());
    }

    #[test]
    fn failed_memory_apply_rolls_back() {
        let store = shared_store();
        let mut cs = CollectionStore::open(store, vec![4u8; 32]).unwrap();
        cs.apply(&[change(1)]).unwrap();
        let root = cs.root_hash();

        // second create of the same instance fails and must leave no trace
        assert!(cs.apply(&[change(2), change(1)]).is_err());
        assert_eq!(cs.root_hash(), root);
        assert_eq!(cs.collection().len(), 1);
    }

    #[test]
    fn store_write_failure_rolls_back_memory() {
        struct FailingStore;
        impl KeyValueStore for FailingStore {
            fn get(&self, _: &[u8]) -> Result<Option<Vec<u8>>, CollectionError> {
                Ok(None)
            }
            fn put(&mut self, _: &[u8], _: &[u8]) -> Result<(), CollectionError> {
                Err(CollectionError::StoreFailure("disk full".into()))
            }
            fn delete(&mut self, _: &[u8]) -> Result<(), CollectionError> {
                Ok(())
            }
            fn atomic_batch_write(
                &mut self,
                _: Vec<BatchOperation>,
            ) -> Result<(), CollectionError> {
                Err(CollectionError::StoreFailure("disk full".into()))
            }
            fn exists(&self, _: &[u8]) -> Result<bool, CollectionError> {
                Ok(false)
            }
            fn prefix_scan(
                &self,
                _: &[u8],
            ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, CollectionError> {
                Ok(vec![])
            }
        }

        let store: SharedKVStore = Arc::new(Mutex::new(FailingStore));
        let mut cs = CollectionStore::open(store, vec![5u8; 32]).unwrap();
        assert!(matches!(
            cs.apply(&[change(1)]),
            Err(CollectionError::StoreFailure(_))
        ));
        assert!(cs.collection().is_empty());
    }
}
