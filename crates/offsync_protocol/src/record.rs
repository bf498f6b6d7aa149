//! The syncable record contract.

use crate::change::RemoteDocument;
use crate::error::{RecordError, RecordResult};
use crate::types::{Document, EntityType, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Payload field carrying the record id.
pub const FIELD_ID: &str = "id";
/// Payload field carrying the creation time in epoch millis.
pub const FIELD_CREATED_AT: &str = "createdAt";
/// Payload field carrying the last modification time in epoch millis.
pub const FIELD_LAST_MODIFIED: &str = "lastModified";

/// Contract every synchronized entity implements.
///
/// The queue and orchestrator only see records through this trait, so they
/// stay agnostic of the concrete entity kinds.
///
/// # Invariants
///
/// - `is_dirty()` is true iff exactly one pending change is queued for
///   `(entity_type(), id())`
/// - `mark_dirty` never moves `last_modified` backwards
/// - `mark_synced` leaves `last_modified` untouched
pub trait Syncable: Send + Sync {
    /// Stable, globally unique id.
    fn id(&self) -> &str;

    /// Kind of record (and remote collection name).
    fn entity_type(&self) -> &EntityType;

    /// True when local changes have not been uploaded yet.
    fn is_dirty(&self) -> bool;

    /// True when the record matches what the remote store holds.
    fn is_synced(&self) -> bool {
        !self.is_dirty()
    }

    /// Time of the last local or accepted remote modification.
    fn last_modified(&self) -> Timestamp;

    /// Creation time.
    fn created_at(&self) -> Timestamp;

    /// Flags the record as changed and bumps `last_modified` to now.
    fn mark_dirty(&mut self);

    /// Clears the dirty flag.
    fn mark_synced(&mut self);

    /// Produces the payload written to the remote store.
    fn serialize(&self) -> RecordResult<Document>;
}

/// A generic syncable record backed by a JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    id: String,
    entity_type: EntityType,
    fields: Document,
    dirty: bool,
    last_modified: Timestamp,
    created_at: Timestamp,
}

impl Record {
    /// Creates a new, dirty record with a random id.
    pub fn new(entity_type: EntityType, fields: Document) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), entity_type, fields)
    }

    /// Creates a new, dirty record with the given id.
    pub fn with_id(id: impl Into<String>, entity_type: EntityType, fields: Document) -> Self {
        let now = Timestamp::now();
        Self {
            id: id.into(),
            entity_type,
            fields,
            dirty: true,
            last_modified: now,
            created_at: now,
        }
    }

    /// Rebuilds a clean record from a remote document.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::MissingField`] if the document carries no
    /// `lastModified` value.
    pub fn from_remote(entity_type: EntityType, document: &RemoteDocument) -> RecordResult<Self> {
        let last_modified = document.last_modified.ok_or_else(|| RecordError::MissingField {
            entity_id: document.id.clone(),
            field: FIELD_LAST_MODIFIED,
        })?;

        let mut fields = document.payload.clone();
        fields.remove(FIELD_ID);
        fields.remove(FIELD_LAST_MODIFIED);
        let created_at = fields
            .remove(FIELD_CREATED_AT)
            .and_then(|v| v.as_i64())
            .map(Timestamp::from_millis)
            .unwrap_or(last_modified);

        Ok(Self {
            id: document.id.clone(),
            entity_type,
            fields,
            dirty: false,
            last_modified,
            created_at,
        })
    }

    /// Copies any syncable entity into a generic record through its
    /// serialized payload, keeping its dirty flag and timestamps.
    ///
    /// # Errors
    ///
    /// Propagates the entity's serialization error.
    pub fn capture<S: Syncable + ?Sized>(source: &S) -> RecordResult<Self> {
        let mut fields = source.serialize()?;
        for reserved in [FIELD_ID, FIELD_CREATED_AT, FIELD_LAST_MODIFIED] {
            fields.remove(reserved);
        }
        Ok(Self {
            id: source.id().to_string(),
            entity_type: source.entity_type().clone(),
            fields,
            dirty: source.is_dirty(),
            last_modified: source.last_modified(),
            created_at: source.created_at(),
        })
    }

    /// Overrides the modification time. Intended for tests and imports.
    #[must_use]
    pub fn with_last_modified(mut self, ts: Timestamp) -> Self {
        self.last_modified = ts;
        self
    }

    /// Overrides the dirty flag. Intended for tests and imports.
    #[must_use]
    pub fn with_dirty(mut self, dirty: bool) -> Self {
        self.dirty = dirty;
        self
    }

    /// Returns the user fields.
    pub fn fields(&self) -> &Document {
        &self.fields
    }

    /// Returns a single field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Sets a field and marks the record dirty.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.fields.insert(key.into(), value);
        self.mark_dirty();
    }
}

impl Syncable for Record {
    fn id(&self) -> &str {
        &self.id
    }

    fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn last_modified(&self) -> Timestamp {
        self.last_modified
    }

    fn created_at(&self) -> Timestamp {
        self.created_at
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
        self.last_modified = Timestamp::now_after(self.last_modified);
    }

    fn mark_synced(&mut self) {
        self.dirty = false;
    }

    fn serialize(&self) -> RecordResult<Document> {
        for reserved in [FIELD_ID, FIELD_CREATED_AT, FIELD_LAST_MODIFIED] {
            if self.fields.contains_key(reserved) {
                return Err(RecordError::invalid(
                    &self.id,
                    format!("field `{reserved}` is reserved"),
                ));
            }
        }

        let mut payload = self.fields.clone();
        payload.insert(FIELD_ID.into(), Value::String(self.id.clone()));
        payload.insert(FIELD_CREATED_AT.into(), self.created_at.as_millis().into());
        payload.insert(
            FIELD_LAST_MODIFIED.into(),
            self.last_modified.as_millis().into(),
        );
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn new_record_is_dirty() {
        let record = Record::new("transactions".into(), fields(json!({"amount": 12})));
        assert!(record.is_dirty());
        assert!(!record.is_synced());
        assert_eq!(record.created_at(), record.last_modified());
    }

    #[test]
    fn mark_dirty_bumps_last_modified() {
        let mut record = Record::with_id("a", "accounts".into(), Document::new())
            .with_dirty(false)
            .with_last_modified(Timestamp::from_millis(10));
        record.mark_dirty();
        assert!(record.is_dirty());
        assert!(record.last_modified() > Timestamp::from_millis(10));
    }

    #[test]
    fn mark_synced_keeps_last_modified() {
        let mut record = Record::with_id("a", "accounts".into(), Document::new());
        let before = record.last_modified();
        record.mark_synced();
        assert!(record.is_synced());
        assert_eq!(record.last_modified(), before);
    }

    #[test]
    fn serialize_includes_bookkeeping_fields() {
        let record = Record::with_id("tx-1", "transactions".into(), fields(json!({"amount": 5})))
            .with_last_modified(Timestamp::from_millis(42));
        let payload = Syncable::serialize(&record).unwrap();
        assert_eq!(payload["id"], json!("tx-1"));
        assert_eq!(payload["lastModified"], json!(42));
        assert_eq!(payload["amount"], json!(5));
    }

    #[test]
    fn serialize_rejects_reserved_fields() {
        let record = Record::with_id("tx-1", "transactions".into(), fields(json!({"id": "x"})));
        assert!(matches!(
            Syncable::serialize(&record),
            Err(RecordError::InvalidData { .. })
        ));
    }

    #[test]
    fn from_remote_strips_bookkeeping() {
        let record = Record::with_id("tx-9", "transactions".into(), fields(json!({"memo": "hi"})))
            .with_last_modified(Timestamp::from_millis(7_000));
        let doc = RemoteDocument::from_payload("tx-9", Syncable::serialize(&record).unwrap());

        let rebuilt = Record::from_remote("transactions".into(), &doc).unwrap();
        assert!(rebuilt.is_synced());
        assert_eq!(rebuilt.last_modified(), Timestamp::from_millis(7_000));
        assert_eq!(rebuilt.created_at(), record.created_at());
        assert_eq!(rebuilt.fields(), record.fields());
    }

    #[test]
    fn capture_keeps_state() {
        let record = Record::with_id("acc-1", "accounts".into(), fields(json!({"name": "cash"})))
            .with_last_modified(Timestamp::from_millis(99));
        let copy = Record::capture(&record).unwrap();
        assert_eq!(copy, record);

        let bad = Record::with_id("acc-2", "accounts".into(), fields(json!({"createdAt": 1})));
        assert!(Record::capture(&bad).is_err());
    }

    #[test]
    fn from_remote_requires_last_modified() {
        let doc = RemoteDocument::new("tx-1", None, Document::new());
        let err = Record::from_remote("transactions".into(), &doc).unwrap_err();
        assert!(matches!(err, RecordError::MissingField { .. }));
    }
}
