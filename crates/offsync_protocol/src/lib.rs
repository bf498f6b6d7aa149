//! # offsync protocol
//!
//! Value types shared by every offsync crate.
//!
//! This crate provides:
//! - The [`Syncable`] record contract and the generic [`Record`]
//! - [`PendingChangeItem`] and [`ChangeOperation`] for the upload queue
//! - [`RemoteDocument`] and [`RemoteChange`] for the download path
//! - [`SyncConflict`] and the last-write-wins [`ConflictResolver`]
//!
//! This is a pure crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change;
mod conflict;
mod error;
mod operation;
mod record;
mod types;

pub use change::{RemoteChange, RemoteChangeKind, RemoteDocument};
pub use conflict::{ConflictResolver, SyncConflict, Winner, CONFLICT_EPSILON};
pub use error::{RecordError, RecordResult};
pub use operation::{ChangeOperation, PendingChangeItem, PendingKey};
pub use record::{Record, Syncable, FIELD_CREATED_AT, FIELD_ID, FIELD_LAST_MODIFIED};
pub use types::{Document, EntityType, Timestamp};
