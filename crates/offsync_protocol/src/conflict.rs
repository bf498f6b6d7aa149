//! Conflict detection and last-write-wins resolution.

use crate::change::RemoteDocument;
use crate::record::Syncable;
use crate::types::{Document, EntityType, Timestamp};
use std::collections::HashMap;
use std::time::Duration;

/// Timestamps closer than this are treated as the same write.
///
/// Absorbs skew between local write times and server-assigned times.
pub const CONFLICT_EPSILON: Duration = Duration::from_secs(1);

/// Which side of a conflict is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    /// Keep the local version; it will be uploaded.
    Local,
    /// Accept the remote version into the local store.
    Remote,
}

/// A divergence between a dirty local record and its remote counterpart.
///
/// Returned to the caller as a value; it is never raised as an error.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConflict {
    /// Record id.
    pub entity_id: String,
    /// Kind of record.
    pub entity_type: EntityType,
    /// Local modification time.
    pub local_modified: Timestamp,
    /// Remote modification time.
    pub remote_modified: Timestamp,
    /// Local payload.
    pub local_payload: Document,
    /// Remote payload.
    pub remote_payload: Document,
}

impl SyncConflict {
    /// Applies last-write-wins to this conflict.
    pub fn winner(&self) -> Winner {
        ConflictResolver::decide(self.local_modified, Some(self.remote_modified))
    }

    /// Returns the payload of the winning side.
    pub fn winning_payload(&self) -> &Document {
        match self.winner() {
            Winner::Local => &self.local_payload,
            Winner::Remote => &self.remote_payload,
        }
    }
}

/// Stateless last-write-wins resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    /// Decides between two modification times.
    ///
    /// A missing remote time or a tie keeps the local side; only a strictly
    /// newer remote write wins.
    pub fn decide(local: Timestamp, remote: Option<Timestamp>) -> Winner {
        match remote {
            Some(remote) if remote > local => Winner::Remote,
            _ => Winner::Local,
        }
    }

    /// Resolves a local record against a remote document.
    pub fn resolve<S: Syncable + ?Sized>(local: &S, remote: &RemoteDocument) -> Winner {
        Self::decide(local.last_modified(), remote.last_modified)
    }

    /// Finds dirty local records whose remote counterpart diverged.
    ///
    /// Only records present in `remote_snapshot` with a remote timestamp
    /// more than [`CONFLICT_EPSILON`] away from the local one are reported.
    /// Records that fail to serialize are left out; the upload path reports
    /// them as invalid data.
    pub fn detect_conflicts<'a, S, I>(
        local_items: I,
        remote_snapshot: &[RemoteDocument],
    ) -> Vec<SyncConflict>
    where
        S: Syncable + ?Sized + 'a,
        I: IntoIterator<Item = &'a S>,
    {
        let remote_by_id: HashMap<&str, &RemoteDocument> = remote_snapshot
            .iter()
            .map(|doc| (doc.id.as_str(), doc))
            .collect();

        let mut conflicts = Vec::new();
        for local in local_items {
            if !local.is_dirty() {
                continue;
            }
            let Some(remote) = remote_by_id.get(local.id()) else {
                continue;
            };
            let Some(remote_modified) = remote.last_modified else {
                continue;
            };
            if local.last_modified().abs_diff(remote_modified) <= CONFLICT_EPSILON {
                continue;
            }
            let Ok(local_payload) = local.serialize() else {
                continue;
            };

            conflicts.push(SyncConflict {
                entity_id: local.id().to_string(),
                entity_type: local.entity_type().clone(),
                local_modified: local.last_modified(),
                remote_modified,
                local_payload,
                remote_payload: remote.payload.clone(),
            });
        }
        conflicts
    }
}
