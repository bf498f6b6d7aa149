//! Local replica access.
//!
//! The engine reads and writes local entities only through the
//! [`Syncable`] contract; the storage format belongs to the
//! [`LocalStore`] implementation.

use crate::error::{SyncError, SyncResult};
use offsync_protocol::{
    EntityType, PendingKey, Record, RemoteDocument, Syncable, Timestamp,
};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::debug;

/// Durable local store of syncable entities, keyed by `(type, id)`.
pub trait LocalStore: Send + Sync {
    /// Loads an entity.
    fn load(&self, entity_type: &EntityType, id: &str) -> SyncResult<Option<Box<dyn Syncable>>>;

    /// Inserts or replaces an entity.
    fn save(&self, record: &dyn Syncable) -> SyncResult<()>;

    /// Removes an entity. Returns true if it existed.
    fn remove(&self, entity_type: &EntityType, id: &str) -> SyncResult<bool>;

    /// Marks an entity synced if its `last_modified` still equals
    /// `uploaded`. An entity edited after the upload snapshot stays dirty.
    ///
    /// Returns true if the flag was cleared.
    fn mark_synced(
        &self,
        entity_type: &EntityType,
        id: &str,
        uploaded: Timestamp,
    ) -> SyncResult<bool>;

    /// Replaces the local entity with an accepted remote version, clean.
    fn apply_remote(&self, entity_type: &EntityType, document: &RemoteDocument) -> SyncResult<()>;

    /// Applies a remote version only if the local entity still exists and
    /// carries `expected` as its `last_modified`. The check and the write are one
    /// step, so a local edit made after `expected` was read survives.
    ///
    /// Returns true if the remote version was written.
    fn apply_remote_if_unchanged(
        &self,
        entity_type: &EntityType,
        document: &RemoteDocument,
        expected: Timestamp,
    ) -> SyncResult<bool>;
}

/// In-memory local store holding generic [`Record`]s.
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    records: RwLock<BTreeMap<PendingKey, Record>>,
}

impl MemoryLocalStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of a stored record.
    pub fn get(&self, entity_type: &EntityType, id: &str) -> Option<Record> {
        self.records
            .read()
            .get(&PendingKey::new(entity_type.clone(), id))
            .cloned()
    }

    /// Inserts a record as-is.
    pub fn insert(&self, record: Record) {
        let key = PendingKey::new(record.entity_type().clone(), record.id());
        self.records.write().insert(key, record);
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Number of dirty records.
    pub fn dirty_count(&self) -> usize {
        self.records.read().values().filter(|r| r.is_dirty()).count()
    }
}

impl LocalStore for MemoryLocalStore {
    fn load(&self, entity_type: &EntityType, id: &str) -> SyncResult<Option<Box<dyn Syncable>>> {
        Ok(self
            .get(entity_type, id)
            .map(|record| Box::new(record) as Box<dyn Syncable>))
    }

    fn save(&self, record: &dyn Syncable) -> SyncResult<()> {
        if record.id().is_empty() {
            return Err(SyncError::LocalStore(format!(
                "cannot store {} entity without an id",
                record.entity_type()
            )));
        }
        let record = Record::capture(record)?;
        self.insert(record);
        Ok(())
    }

    fn remove(&self, entity_type: &EntityType, id: &str) -> SyncResult<bool> {
        Ok(self
            .records
            .write()
            .remove(&PendingKey::new(entity_type.clone(), id))
            .is_some())
    }

    fn mark_synced(
        &self,
        entity_type: &EntityType,
        id: &str,
        uploaded: Timestamp,
    ) -> SyncResult<bool> {
        let mut records = self.records.write();
        match records.get_mut(&PendingKey::new(entity_type.clone(), id)) {
            Some(record) if record.last_modified() == uploaded => {
                record.mark_synced();
                Ok(true)
            }
            Some(_) => {
                debug!(%entity_type, id, "record changed during upload, keeping dirty");
                Ok(false)
            }
            None => Ok(false),
        }
    }

    fn apply_remote(&self, entity_type: &EntityType, document: &RemoteDocument) -> SyncResult<()> {
        let record = Record::from_remote(entity_type.clone(), document).map_err(SyncError::from)?;
        self.insert(record);
        Ok(())
    }

    fn apply_remote_if_unchanged(
        &self,
        entity_type: &EntityType,
        document: &RemoteDocument,
        expected: Timestamp,
    ) -> SyncResult<bool> {
        let record = Record::from_remote(entity_type.clone(), document).map_err(SyncError::from)?;
        let key = PendingKey::new(entity_type.clone(), document.id.clone());
        let mut records = self.records.write();
        match records.get(&key) {
            Some(current) if current.last_modified() == expected => {
                records.insert(key, record);
                Ok(true)
            }
            _ => {
                debug!(%entity_type, id = %document.id, "record changed since conflict check, keeping local");
                Ok(false)
            }
        }
    }
}
