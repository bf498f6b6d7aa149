//! Key-value store trait definition.

use crate::error::{StorageError, StorageResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A small durable key-value store.
///
/// Values are opaque bytes grouped by namespace so independent components
/// (one per scheduler job kind, the pending queue) never collide.
///
/// # Invariants
///
/// - `get` returns exactly the bytes last written by `put` for that key
/// - A successful `put` survives process termination for durable stores
/// - A `put` is atomic: readers see the old or the new value, never a mix
/// - Stores must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent storage
pub trait KeyValueStore: Send + Sync {
    /// Reads the value stored under `namespace/key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Writes `value` under `namespace/key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn put(&self, namespace: &str, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Removes `namespace/key`. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn delete(&self, namespace: &str, key: &str) -> StorageResult<()>;

    /// Lists the keys of a namespace in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace is invalid or an I/O error occurs.
    fn keys(&self, namespace: &str) -> StorageResult<Vec<String>>;
}

/// Typed CBOR access on top of any [`KeyValueStore`].
pub trait KeyValueStoreExt {
    /// Reads and decodes a CBOR value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Codec`] if the stored bytes do not decode.
    fn get_cbor<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> StorageResult<Option<T>>;

    /// Encodes a value as CBOR and writes it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Codec`] if encoding fails.
    fn put_cbor<T: Serialize>(&self, namespace: &str, key: &str, value: &T) -> StorageResult<()>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStoreExt for S {
    fn get_cbor<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> StorageResult<Option<T>> {
        match self.get(namespace, key)? {
            Some(bytes) => ciborium::de::from_reader(bytes.as_slice())
                .map(Some)
                .map_err(|e| StorageError::Codec(e.to_string())),
            None => Ok(None),
        }
    }

    fn put_cbor<T: Serialize>(&self, namespace: &str, key: &str, value: &T) -> StorageResult<()> {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(value, &mut bytes)
            .map_err(|e| StorageError::Codec(e.to_string()))?;
        self.put(namespace, key, &bytes)
    }
}

/// Checks that a namespace or key is a safe single path segment.
///
/// # Errors
///
/// Returns [`StorageError::InvalidKey`] for empty segments, segments with a
/// leading `.`, or characters outside `[A-Za-z0-9_.-]`.
pub fn validate_segment(segment: &str) -> StorageResult<()> {
    let valid = !segment.is_empty()
        && !segment.starts_with('.')
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(segment.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryStore;
    use proptest::prelude::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct JobState {
        runs: u64,
        enabled: bool,
    }

    #[test]
    fn segment_validation() {
        assert!(validate_segment("refresh").is_ok());
        assert!(validate_segment("pending_queue.v1").is_ok());
        assert!(validate_segment("").is_err());
        assert!(validate_segment("..").is_err());
        assert!(validate_segment(".hidden").is_err());
        assert!(validate_segment("a/b").is_err());
        assert!(validate_segment("white space").is_err());
    }

    #[test]
    fn cbor_roundtrip_through_dyn_store() {
        let store: Box<dyn KeyValueStore> = Box::new(InMemoryStore::new());
        let state = JobState {
            runs: 3,
            enabled: true,
        };
        store.put_cbor("scheduler", "refresh", &state).unwrap();
        let loaded: Option<JobState> = store.get_cbor("scheduler", "refresh").unwrap();
        assert_eq!(loaded, Some(state));
    }

    #[test]
    fn cbor_decode_failure_is_codec_error() {
        let store = InMemoryStore::new();
        store.put("scheduler", "refresh", &[0xff, 0x00]).unwrap();
        let result: StorageResult<Option<JobState>> = store.get_cbor("scheduler", "refresh");
        assert!(matches!(result, Err(StorageError::Codec(_))));
    }

    proptest! {
        #[test]
        fn accepted_segments_never_escape(segment in "[A-Za-z0-9_./-]{0,12}") {
            if validate_segment(&segment).is_ok() {
                prop_assert!(!segment.contains('/'));
                prop_assert!(!segment.starts_with('.'));
                prop_assert_eq!(std::path::Path::new(&segment).components().count(), 1);
            }
        }
    }
}
