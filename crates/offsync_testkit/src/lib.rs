//! # offsync Testkit
//!
//! Test utilities for offsync.
//!
//! This crate provides:
//! - A wired harness over in-memory stores with a controllable network
//! - Property-based test generators using proptest
//! - Concurrency stress helpers for the pending change queue
//!
//! ## Usage
//!
//! ```rust,ignore
//! use offsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn uploads() {
//!     let h = SyncHarness::new();
//!     h.create("notes", "n1");
//!     h.orchestrator.sync_now().await.unwrap();
//!     assert!(h.queue.is_empty());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;
