//! # offsync engine
//!
//! Offline-first synchronization between a local replica and an
//! authoritative remote document store.
//!
//! This crate provides:
//! - The pending change queue (deduplicated, snapshot-drained)
//! - Network monitoring and the sync eligibility policy
//! - Batched uploads with exponential backoff
//! - The sync orchestrator and its autosync loop
//! - The remote change listener (download path)
//! - Background job scheduling with persisted run history
//!
//! ## Architecture
//!
//! Uploads flow local mutation → queue → orchestrator → remote store.
//! Downloads flow remote listener → conflict check → local store. Each
//! cycle pulls a remote snapshot for the pending entity types before
//! pushing, so last-write-wins is decided before anything is overwritten.
//!
//! ## Key Invariants
//!
//! - At most one sync cycle is active; a new one supersedes the old
//! - An entity is dirty iff exactly one pending item exists for it
//! - Queue items leave only after their batch commits
//! - Batches already committed in a failed cycle stay committed
//! - Background runs never crash the host

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod auth;
mod cancel;
mod config;
mod error;
mod listener;
mod local;
mod network;
mod orchestrator;
mod queue;
mod remote;
mod retry;
mod scheduler;

pub use auth::{AuthProvider, StaticAuth};
pub use cancel::CancelToken;
pub use config::{SchedulerConfig, SyncConfiguration, JITTER_FRACTION};
pub use error::{SyncError, SyncResult};
pub use listener::{ApplyOutcome, ListenerStats, RemoteChangeListener};
pub use local::{LocalStore, MemoryLocalStore};
pub use network::{
    ConnectionKind, ConnectivityStream, ManualPathMonitor, NetworkMonitor, NetworkStatus,
    PathMonitor, PathSink,
};
pub use orchestrator::{
    group_by_type, SyncOrchestrator, SyncOrchestratorBuilder, SyncReport, SyncState,
    SyncStatistics,
};
pub use queue::{EnqueueOutcome, PendingChangeQueue};
pub use remote::{ChangeSubscription, CollectionRef, DocumentWrite, MemoryRemoteStore, RemoteStore};
pub use retry::commit_with_retry;
pub use scheduler::{
    BackgroundScheduler, HostScheduler, JobHandler, JobKind, JobOutcome, JobRecord, JobRequest,
    JobStore, RunOutcome, TokioHostScheduler,
};
