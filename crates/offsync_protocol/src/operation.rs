//! Pending change operations.

use crate::types::{EntityType, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Type of local mutation awaiting upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeOperation {
    /// Entity was created locally.
    Create,
    /// Entity was updated locally.
    Update,
    /// Entity was deleted locally.
    Delete,
}

impl ChangeOperation {
    /// Converts to a numeric code.
    pub fn to_code(&self) -> u8 {
        match self {
            ChangeOperation::Create => 1,
            ChangeOperation::Update => 2,
            ChangeOperation::Delete => 3,
        }
    }

    /// Converts from a numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ChangeOperation::Create),
            2 => Some(ChangeOperation::Update),
            3 => Some(ChangeOperation::Delete),
            _ => None,
        }
    }

    /// Returns true if the operation writes a payload.
    pub fn writes_payload(&self) -> bool {
        !matches!(self, ChangeOperation::Delete)
    }
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeOperation::Create => "create",
            ChangeOperation::Update => "update",
            ChangeOperation::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Queue key: at most one pending item exists per key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PendingKey {
    /// Kind of record.
    pub entity_type: EntityType,
    /// Record id.
    pub entity_id: String,
}

impl PendingKey {
    /// Creates a key.
    pub fn new(entity_type: EntityType, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
        }
    }
}

impl fmt::Display for PendingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.entity_id)
    }
}

/// An outstanding upload for one entity.
///
/// `created_at` is the time the entity was first queued; replacing the
/// operation keeps it so ordering and backoff stay fair. `revision` changes
/// on every replacement so a consumer holding an older copy can tell that
/// the item moved on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingChangeItem {
    /// Record id.
    pub entity_id: String,
    /// Kind of record.
    pub entity_type: EntityType,
    /// Operation to upload.
    pub operation: ChangeOperation,
    /// Failed upload attempts so far.
    pub retry_count: u32,
    /// Original queuing time.
    pub created_at: Timestamp,
    /// Queue-assigned version of this item.
    #[serde(default)]
    pub revision: u64,
}

impl PendingChangeItem {
    /// Creates a fresh item queued now.
    pub fn new(
        entity_id: impl Into<String>,
        entity_type: EntityType,
        operation: ChangeOperation,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity_type,
            operation,
            retry_count: 0,
            created_at: Timestamp::now(),
            revision: 0,
        }
    }

    /// Returns the queue key of this item.
    pub fn key(&self) -> PendingKey {
        PendingKey::new(self.entity_type.clone(), self.entity_id.clone())
    }

    /// Returns true if the item belongs to `key`.
    pub fn matches(&self, key: &PendingKey) -> bool {
        self.entity_type == key.entity_type && self.entity_id == key.entity_id
    }
}
