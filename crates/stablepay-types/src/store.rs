//! Ordered byte-key store abstraction.
//!
//! The host chain provides the real store. This module defines the narrow
//! interface the core needs, an in-memory implementation, and a
//! write-buffering branch used to make every message all-or-nothing:
//!
//! ```text
//! parent store ──▶ CacheStore (reads fall through, writes buffered)
//!                      │
//!                      ├── handler Ok  → commit() → writes applied to parent
//!                      └── handler Err → drop     → parent untouched
//! ```

use std::collections::BTreeMap;

use serde::{Serialize, de::DeserializeOwned};

use crate::{Result, StablepayError};

/// Byte-key store with ordered prefix iteration.
pub trait KvStore {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    fn set(&mut self, key: &[u8], value: Vec<u8>);

    fn delete(&mut self, key: &[u8]);

    fn has(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// All entries whose key starts with `prefix`, in ascending key order.
    fn prefix_iter(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)>;
}

/// Decode a JSON value stored under `key`.
///
/// # Errors
/// Returns `Serialization` if the stored bytes do not decode.
pub fn get_json<T: DeserializeOwned>(store: &dyn KvStore, key: &[u8]) -> Result<Option<T>> {
    store
        .get(key)
        .map(|bytes| serde_json::from_slice(&bytes))
        .transpose()
        .map_err(StablepayError::from)
}

/// Decode a JSON value yielded by [`KvStore::prefix_iter`].
///
/// # Errors
/// Returns `Serialization` if the bytes do not decode.
pub fn decode_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(StablepayError::from)
}

/// Encode `value` as JSON under `key`.
///
/// # Errors
/// Returns `Serialization` if the value does not encode.
pub fn set_json<T: Serialize>(store: &mut dyn KvStore, key: &[u8], value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    store.set(key, bytes);
    Ok(())
}

/// Concatenate a prefix and a key suffix.
#[must_use]
pub fn join_key(prefix: &[u8], suffix: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + suffix.len());
    key.extend_from_slice(prefix);
    key.extend_from_slice(suffix);
    key
}

// ---------------------------------------------------------------------------
// MemStore
// ---------------------------------------------------------------------------

/// In-memory ordered store.
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KvStore for MemStore {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &[u8], value: Vec<u8>) {
        self.entries.insert(key.to_vec(), value);
    }

    fn delete(&mut self, key: &[u8]) {
        self.entries.remove(key);
    }

    fn prefix_iter(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.entries
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// CacheStore
// ---------------------------------------------------------------------------

/// Write-buffering branch over a parent store.
///
/// Reads see buffered writes first. Nothing reaches the parent until
/// [`CacheStore::commit`]; dropping the branch discards every write.
pub struct CacheStore<'a> {
    parent: &'a mut dyn KvStore,
    /// `None` marks a buffered delete.
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl<'a> CacheStore<'a> {
    pub fn new(parent: &'a mut dyn KvStore) -> Self {
        Self {
            parent,
            writes: BTreeMap::new(),
        }
    }

    /// Number of buffered writes and deletes.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    /// Flush buffered writes to the parent in key order.
    pub fn commit(self) {
        for (key, value) in self.writes {
            match value {
                Some(v) => self.parent.set(&key, v),
                None => self.parent.delete(&key),
            }
        }
    }
}

impl KvStore for CacheStore<'_> {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        match self.writes.get(key) {
            Some(buffered) => buffered.clone(),
            None => self.parent.get(key),
        }
    }

    fn set(&mut self, key: &[u8], value: Vec<u8>) {
        self.writes.insert(key.to_vec(), Some(value));
    }

    fn delete(&mut self, key: &[u8]) {
        self.writes.insert(key.to_vec(), None);
    }

    fn prefix_iter(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.parent.prefix_iter(prefix).into_iter().collect();
        for (key, value) in self
            .writes
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
        {
            match value {
                Some(v) => {
                    merged.insert(key.clone(), v.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        merged.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_store_basic_ops() {
        let mut store = MemStore::new();
        store.set(b"a", b"1".to_vec());
        assert_eq!(store.get(b"a"), Some(b"1".to_vec()));
        assert!(store.has(b"a"));
        store.delete(b"a");
        assert!(!store.has(b"a"));
        assert!(store.is_empty());
    }

    #[test]
    fn prefix_iter_is_ordered_and_bounded() {
        let mut store = MemStore::new();
        store.set(b"settlement/\x00\x02", b"2".to_vec());
        store.set(b"settlement/\x00\x01", b"1".to_vec());
        store.set(b"settlemenu", b"x".to_vec());
        store.set(b"batch/\x00\x01", b"b".to_vec());

        let entries = store.prefix_iter(b"settlement/");
        let values: Vec<_> = entries.into_iter().map(|(_, v)| v).collect();
        assert_eq!(values, vec![b"1".to_vec(), b"2".to_vec()]);
    }

    #[test]
    fn cache_store_discards_on_drop() {
        let mut parent = MemStore::new();
        parent.set(b"k", b"old".to_vec());
        {
            let mut cache = CacheStore::new(&mut parent);
            cache.set(b"k", b"new".to_vec());
            cache.set(b"other", b"x".to_vec());
            assert_eq!(cache.get(b"k"), Some(b"new".to_vec()));
        }
        assert_eq!(parent.get(b"k"), Some(b"old".to_vec()));
        assert!(!parent.has(b"other"));
    }

    #[test]
    fn cache_store_commit_applies_writes_and_deletes() {
        let mut parent = MemStore::new();
        parent.set(b"gone", b"1".to_vec());
        let mut cache = CacheStore::new(&mut parent);
        cache.delete(b"gone");
        cache.set(b"new", b"2".to_vec());
        assert!(!cache.has(b"gone"));
        assert_eq!(cache.pending_writes(), 2);
        cache.commit();
        assert!(!parent.has(b"gone"));
        assert_eq!(parent.get(b"new"), Some(b"2".to_vec()));
    }

    #[test]
    fn cache_store_prefix_iter_merges() {
        let mut parent = MemStore::new();
        parent.set(b"p/1", b"a".to_vec());
        parent.set(b"p/2", b"b".to_vec());
        let mut cache = CacheStore::new(&mut parent);
        cache.delete(b"p/1");
        cache.set(b"p/3", b"c".to_vec());
        cache.set(b"p/2", b"B".to_vec());
        let got: Vec<_> = cache.prefix_iter(b"p/");
        assert_eq!(
            got,
            vec![
                (b"p/2".to_vec(), b"B".to_vec()),
                (b"p/3".to_vec(), b"c".to_vec()),
            ]
        );
    }

    #[test]
    fn json_helpers_roundtrip() {
        let mut store = MemStore::new();
        set_json(&mut store, b"n", &42u64).unwrap();
        assert_eq!(get_json::<u64>(&store, b"n").unwrap(), Some(42));
        assert_eq!(get_json::<u64>(&store, b"missing").unwrap(), None);
        store.set(b"bad", b"not json".to_vec());
        assert!(matches!(
            get_json::<u64>(&store, b"bad"),
            Err(StablepayError::Serialization(_))
        ));
    }
}
