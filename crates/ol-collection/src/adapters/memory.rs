//! In-memory key-value store.

use crate::errors::CollectionError;
use crate::ports::{BatchOperation, KeyValueStore};
use std::collections::BTreeMap;

/// In-memory byte store backing tests and single-process deployments.
///
/// A `BTreeMap` gives ordered prefix scans for free; batch writes are
/// trivially atomic under the single-threaded mutation contract.
#[derive(Default)]
pub struct InMemoryKVStore {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl InMemoryKVStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl KeyValueStore for InMemoryKVStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, CollectionError> {
        Ok(self.data.get(key).cloned())
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), CollectionError> {
        self.data.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), CollectionError> {
        self.data.remove(key);
        Ok(())
    }

    fn atomic_batch_write(
        &mut self,
        operations: Vec<BatchOperation>,
    ) -> Result<(), CollectionError> {
        for op in operations {
            match op {
                BatchOperation::Put { key, value } => {
                    self.data.insert(key, value);
                }
                BatchOperation::Delete { key } => {
                    self.data.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn exists(&self, key: &[u8]) -> Result<bool, CollectionError> {
        Ok(self.data.contains_key(key))
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, CollectionError> {
        Ok(self
            .data
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_operations() {
        let mut store = InMemoryKVStore::new();
        store.put(b"key1", b"value1").unwrap();
        store.put(b"key2", b"value2").unwrap();

        assert_eq!(store.get(b"key1").unwrap(), Some(b"value1".to_vec()));
        assert_eq!(store.get(b"key3").unwrap(), None);
        assert!(store.exists(b"key1").unwrap());

        store.delete(b"key1").unwrap();
        assert!(!store.exists(b"key1").unwrap());
    }

    #[test]
    fn batch_write() {
        let mut store = InMemoryKVStore::new();
        store.put(b"stale", b"x").unwrap();

        store
            .atomic_batch_write(vec![
                BatchOperation::put(b"a".as_slice(), b"1".as_slice()),
                BatchOperation::put(b"b".as_slice(), b"2".as_slice()),
                BatchOperation::delete(b"stale".as_slice()),
            ])
            .unwrap();

        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(b"b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.get(b"stale").unwrap(), None);
    }

    #[test]
    fn prefix_scan_is_exact() {
        let mut store = InMemoryKVStore::new();
        store.put(b"block:1", b"d1").unwrap();
        store.put(b"block:2", b"d2").unwrap();
        store.put(b"meta:1", b"m").unwrap();

        let blocks = store.prefix_scan(b"block:").unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(store.prefix_scan(b"meta:").unwrap().len(), 1);
        assert!(store.prefix_scan(b"other:").unwrap().is_empty());
    }
}
