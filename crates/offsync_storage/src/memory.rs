//! In-memory key-value store for testing.

use crate::backend::{validate_segment, KeyValueStore};
use crate::error::StorageResult;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// An in-memory key-value store.
///
/// Suitable for unit tests, integration tests and hosts that do not need
/// state to survive a restart.
///
/// # Example
///
/// ```rust
/// use offsync_storage::{InMemoryStore, KeyValueStore};
///
/// let store = InMemoryStore::new();
/// store.put("queue", "items", b"[]").unwrap();
/// assert_eq!(store.keys("queue").unwrap(), vec!["items".to_string()]);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    data: RwLock<BTreeMap<(String, String), Vec<u8>>>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored keys across all namespaces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Removes every key.
    pub fn clear(&self) {
        self.data.write().clear();
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_segment(namespace)?;
        validate_segment(key)?;
        Ok(self
            .data
            .read()
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    fn put(&self, namespace: &str, key: &str, value: &[u8]) -> StorageResult<()> {
        validate_segment(namespace)?;
        validate_segment(key)?;
        self.data
            .write()
            .insert((namespace.to_string(), key.to_string()), value.to_vec());
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> StorageResult<()> {
        validate_segment(namespace)?;
        validate_segment(key)?;
        self.data
            .write()
            .remove(&(namespace.to_string(), key.to_string()));
        Ok(())
    }

    fn keys(&self, namespace: &str) -> StorageResult<Vec<String>> {
        validate_segment(namespace)?;
        Ok(self
            .data
            .read()
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, key)| key.clone())
            .collect())
    }
}
