//! File-based key-value store for persistent state.

use crate::backend::{validate_segment, KeyValueStore};
use crate::error::StorageResult;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// A file-based key-value store.
///
/// Each value lives in `<root>/<namespace>/<key>`. Writes go to a
/// temporary sibling first and are renamed into place after `sync_all`, so
/// a crash mid-write leaves the previous value intact.
///
/// # Thread Safety
///
/// Writers are serialized by an internal lock; readers never observe a
/// partially written value.
///
/// # Example
///
/// ```no_run
/// use offsync_storage::{FileStore, KeyValueStore};
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("state")).unwrap();
/// store.put("scheduler", "refresh", b"persistent data").unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Opens or creates a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the root directory cannot be created.
    pub fn open(root: &Path) -> StorageResult<Self> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn value_path(&self, namespace: &str, key: &str) -> StorageResult<PathBuf> {
        validate_segment(namespace)?;
        validate_segment(key)?;
        Ok(self.root.join(namespace).join(key))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let path = self.value_path(namespace, key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, namespace: &str, key: &str, value: &[u8]) -> StorageResult<()> {
        let path = self.value_path(namespace, key)?;
        let _guard = self.write_lock.lock();

        let dir = self.root.join(namespace);
        fs::create_dir_all(&dir)?;

        // Temp names start with '.' so `keys` never lists them.
        let tmp = dir.join(format!(".{key}.tmp"));
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp)?;
            file.write_all(value)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;

        // Make the rename itself durable where the platform allows it.
        if let Ok(dir_handle) = File::open(&dir) {
            let _ = dir_handle.sync_all();
        }
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> StorageResult<()> {
        let path = self.value_path(namespace, key)?;
        let _guard = self.write_lock.lock();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self, namespace: &str) -> StorageResult<Vec<String>> {
        validate_segment(namespace)?;
        let dir = self.root.join(namespace);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    keys.push(name.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}
