//! Test fixtures and harness helpers.
//!
//! Wires an orchestrator over in-memory stores with a network monitor the
//! test controls, plus a few stand-ins for host integrations.

use offsync_engine::{
    CollectionRef, ConnectionKind, HostScheduler, JobKind, JobRequest, ManualPathMonitor,
    MemoryLocalStore, MemoryRemoteStore, NetworkMonitor, NetworkStatus, PendingChangeQueue,
    RemoteChangeListener, StaticAuth, SyncConfiguration, SyncOrchestrator, SyncResult,
};
use offsync_protocol::{
    ChangeOperation, Document, EntityType, Record, Syncable, Timestamp, FIELD_LAST_MODIFIED,
};
use offsync_storage::FileStore;
use parking_lot::Mutex;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Principal every harness signs in as.
pub const TEST_PRINCIPAL: &str = "tester";

/// Default configuration with retry delays short enough for real-time tests.
pub fn fast_config() -> SyncConfiguration {
    SyncConfiguration::new()
        .with_base_retry_delay(Duration::from_millis(10))
        .with_max_retry_delay(Duration::from_millis(100))
}

/// Fields of a sample note.
pub fn note_fields(title: &str) -> Document {
    let mut fields = Document::new();
    fields.insert("title".into(), Value::from(title));
    fields
}

/// An orchestrator over in-memory collaborators.
pub struct SyncHarness {
    /// The orchestrator under test.
    pub orchestrator: SyncOrchestrator,
    /// The remote store.
    pub remote: Arc<MemoryRemoteStore>,
    /// The local replica.
    pub local: Arc<MemoryLocalStore>,
    /// Connectivity source; `set` it to simulate network changes.
    pub path: Arc<ManualPathMonitor>,
    /// Started network monitor fed by `path`.
    pub network: Arc<NetworkMonitor>,
    /// Signed in as [`TEST_PRINCIPAL`].
    pub auth: Arc<StaticAuth>,
    /// The pending change queue.
    pub queue: Arc<PendingChangeQueue>,
}

impl SyncHarness {
    /// Creates a harness with [`fast_config`], online over an unmetered
    /// connection.
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    /// Creates a harness with `config` and an in-memory queue.
    pub fn with_config(config: SyncConfiguration) -> Self {
        Self::with_queue(config, Arc::new(PendingChangeQueue::new()))
    }

    /// Creates a harness around an existing queue.
    pub fn with_queue(config: SyncConfiguration, queue: Arc<PendingChangeQueue>) -> Self {
        let remote = Arc::new(MemoryRemoteStore::new());
        let local = Arc::new(MemoryLocalStore::new());
        let path = Arc::new(ManualPathMonitor::new(NetworkStatus::connected(
            ConnectionKind::Unmetered,
        )));
        let network = Arc::new(NetworkMonitor::new(path.clone()));
        network.start();
        let auth = Arc::new(StaticAuth::signed_in(TEST_PRINCIPAL));
        let orchestrator = SyncOrchestrator::builder(
            remote.clone(),
            local.clone(),
            auth.clone(),
            network.clone(),
        )
        .queue(queue.clone())
        .configuration(config)
        .build();

        Self {
            orchestrator,
            remote,
            local,
            path,
            network,
            auth,
            queue,
        }
    }

    /// Remote collection of `entity_type` for the test principal.
    pub fn collection(&self, entity_type: &str) -> CollectionRef {
        CollectionRef::new(TEST_PRINCIPAL, EntityType::new(entity_type))
    }

    /// Creates a note locally and queues it.
    pub fn create(&self, entity_type: &str, id: &str) -> Record {
        let mut record = Record::with_id(id, EntityType::new(entity_type), note_fields(id));
        self.orchestrator
            .record_change(&mut record, ChangeOperation::Create)
            .expect("Failed to record create");
        record
    }

    /// Creates `count` notes with ids `{prefix}-{index}`.
    pub fn create_many(&self, entity_type: &str, prefix: &str, count: usize) -> Vec<Record> {
        (0..count)
            .map(|index| self.create(entity_type, &format!("{prefix}-{index:04}")))
            .collect()
    }

    /// Sets a field on `record` and queues an update.
    pub fn update(&self, record: &mut Record, field: &str, value: Value) {
        record.set(field, value);
        self.orchestrator
            .record_change(record, ChangeOperation::Update)
            .expect("Failed to record update");
    }

    /// Deletes `record` locally and queues the delete.
    pub fn delete(&self, record: &mut Record) {
        self.orchestrator
            .record_change(record, ChangeOperation::Delete)
            .expect("Failed to record delete");
    }

    /// Writes a document to the remote store as another device would.
    pub fn seed_remote(
        &self,
        entity_type: &str,
        id: &str,
        mut fields: Document,
        last_modified: Timestamp,
    ) {
        fields.insert(
            FIELD_LAST_MODIFIED.into(),
            Value::from(last_modified.as_millis()),
        );
        self.remote
            .put_document(&self.collection(entity_type), id, fields);
    }

    /// Local copy of a record, if present.
    pub fn local_record(&self, entity_type: &str, id: &str) -> Option<Record> {
        self.local.get(&EntityType::new(entity_type), id)
    }

    /// True when the local record is dirty.
    pub fn is_dirty(&self, entity_type: &str, id: &str) -> bool {
        self.local_record(entity_type, id)
            .is_some_and(|record| record.is_dirty())
    }

    /// Drops the connection.
    pub fn go_offline(&self) {
        self.path.set(NetworkStatus::Disconnected);
    }

    /// Restores the connection over `kind`.
    pub fn go_online(&self, kind: ConnectionKind) {
        self.path.set(NetworkStatus::connected(kind));
    }

    /// A remote change listener sharing the harness collaborators.
    pub fn listener(&self) -> RemoteChangeListener {
        RemoteChangeListener::new(
            self.remote.clone(),
            self.local.clone(),
            self.auth.clone(),
            self.queue.clone(),
        )
    }
}

impl Default for SyncHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Host scheduler that only records what it was asked to do.
#[derive(Default)]
pub struct RecordingHost {
    submitted: Mutex<Vec<JobRequest>>,
    cancelled: Mutex<Vec<JobKind>>,
}

impl RecordingHost {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests submitted so far, in order.
    pub fn submitted(&self) -> Vec<JobRequest> {
        self.submitted.lock().clone()
    }

    /// Kinds cancelled so far, in order.
    pub fn cancelled(&self) -> Vec<JobKind> {
        self.cancelled.lock().clone()
    }
}

impl HostScheduler for RecordingHost {
    fn submit(&self, request: JobRequest) -> SyncResult<()> {
        self.submitted.lock().push(request);
        Ok(())
    }

    fn cancel(&self, kind: JobKind) {
        self.cancelled.lock().push(kind);
    }
}

/// A state directory that outlives individual [`FileStore`] handles, for
/// restart tests.
pub struct TempStateDir {
    dir: TempDir,
}

impl TempStateDir {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Directory path.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Opens a fresh store handle, as a restarted process would.
    pub fn open(&self) -> Arc<FileStore> {
        Arc::new(FileStore::open(self.dir.path()).expect("Failed to open file store"))
    }
}

impl Default for TempStateDir {
    fn default() -> Self {
        Self::new()
    }
}
