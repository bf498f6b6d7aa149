//! # offsync storage
//!
//! Durable key-value storage for engine state that must outlive the
//! process: scheduler run history and the persisted pending queue.
//!
//! ## Design Principles
//!
//! - Stores are opaque byte maps grouped by namespace
//! - No knowledge of what the engine writes into them
//! - Must be `Send + Sync` for concurrent access
//! - Typed access goes through CBOR helpers on [`KeyValueStoreExt`]
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and ephemeral state
//! - [`FileStore`] - One file per key under a root directory
//!
//! ## Example
//!
//! ```rust
//! use offsync_storage::{InMemoryStore, KeyValueStore};
//!
//! let store = InMemoryStore::new();
//! store.put("scheduler", "refresh", b"state").unwrap();
//! assert_eq!(store.get("scheduler", "refresh").unwrap(), Some(b"state".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::{validate_segment, KeyValueStore, KeyValueStoreExt};
pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::InMemoryStore;
