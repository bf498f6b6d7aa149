//! Remote documents and the change notices pushed by the remote store.

use crate::record::FIELD_LAST_MODIFIED;
use crate::types::{Document, Timestamp};
use serde::{Deserialize, Serialize};

/// A document as held by the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDocument {
    /// Document id (the record id).
    pub id: String,
    /// Server-side modification time, if the payload carries one.
    pub last_modified: Option<Timestamp>,
    /// Full payload.
    pub payload: Document,
}

impl RemoteDocument {
    /// Creates a remote document.
    pub fn new(id: impl Into<String>, last_modified: Option<Timestamp>, payload: Document) -> Self {
        Self {
            id: id.into(),
            last_modified,
            payload,
        }
    }

    /// Creates a remote document, reading `lastModified` from the payload.
    pub fn from_payload(id: impl Into<String>, payload: Document) -> Self {
        let last_modified = payload
            .get(FIELD_LAST_MODIFIED)
            .and_then(|v| v.as_i64())
            .map(Timestamp::from_millis);
        Self::new(id, last_modified, payload)
    }
}

/// Type of change reported by a collection listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteChangeKind {
    /// Document appeared in the collection.
    Added,
    /// Document was overwritten.
    Modified,
    /// Document was deleted.
    Removed,
}

/// A single change notice from a remote collection listener.
///
/// Notices for one collection are delivered in server order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteChange {
    /// Type of change.
    pub kind: RemoteChangeKind,
    /// The document after the change (before, for removals).
    pub document: RemoteDocument,
}

impl RemoteChange {
    /// Creates an added notice.
    pub fn added(document: RemoteDocument) -> Self {
        Self {
            kind: RemoteChangeKind::Added,
            document,
        }
    }

    /// Creates a modified notice.
    pub fn modified(document: RemoteDocument) -> Self {
        Self {
            kind: RemoteChangeKind::Modified,
            document,
        }
    }

    /// Creates a removed notice.
    pub fn removed(document: RemoteDocument) -> Self {
        Self {
            kind: RemoteChangeKind::Removed,
            document,
        }
    }

    /// Returns the affected document id.
    pub fn id(&self) -> &str {
        &self.document.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_payload_reads_last_modified() {
        let payload = json!({"lastModified": 1234, "memo": "x"})
            .as_object()
            .cloned()
            .unwrap();
        let doc = RemoteDocument::from_payload("a", payload);
        assert_eq!(doc.last_modified, Some(Timestamp::from_millis(1234)));
    }

    #[test]
    fn from_payload_without_timestamp() {
        let doc = RemoteDocument::from_payload("a", Document::new());
        assert_eq!(doc.last_modified, None);
    }

    #[test]
    fn change_constructors() {
        let doc = RemoteDocument::new("a", None, Document::new());
        assert_eq!(RemoteChange::added(doc.clone()).kind, RemoteChangeKind::Added);
        assert_eq!(RemoteChange::modified(doc.clone()).kind, RemoteChangeKind::Modified);
        let removed = RemoteChange::removed(doc);
        assert_eq!(removed.kind, RemoteChangeKind::Removed);
        assert_eq!(removed.id(), "a");
    }
}
