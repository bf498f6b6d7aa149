//! Sync orchestrator.
//!
//! Drives one sync cycle at a time: eligibility checks, a pull-before-push
//! conflict pass per entity type, then batched uploads with retry. A newer
//! `sync_now` cancels and supersedes the cycle in flight.

use crate::auth::AuthProvider;
use crate::cancel::CancelToken;
use crate::config::SyncConfiguration;
use crate::error::{SyncError, SyncResult};
use crate::local::LocalStore;
use crate::network::NetworkMonitor;
use crate::queue::{EnqueueOutcome, PendingChangeQueue};
use crate::remote::{CollectionRef, DocumentWrite, RemoteStore};
use crate::retry::commit_with_retry;
use offsync_protocol::{
    ChangeOperation, ConflictResolver, EntityType, PendingChangeItem, PendingKey, Syncable,
    Timestamp, Winner,
};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Orchestrator-wide sync state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    /// No cycle running.
    Idle,
    /// A cycle is running.
    Syncing,
    /// The network policy blocks syncing, or the connection dropped.
    WaitingForNetwork,
    /// The last cycle failed.
    Error(String),
}

impl SyncState {
    /// Returns true while a cycle runs.
    pub fn is_syncing(&self) -> bool {
        matches!(self, SyncState::Syncing)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Idle => f.write_str("idle"),
            SyncState::Syncing => f.write_str("syncing"),
            SyncState::WaitingForNetwork => f.write_str("waiting for network"),
            SyncState::Error(message) => write!(f, "error: {message}"),
        }
    }
}

/// Counters for the current (or last) cycle. Reset when a cycle starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatistics {
    /// Entities uploaded.
    pub total_uploaded: u64,
    /// Remote versions written locally.
    pub total_downloaded: u64,
    /// Conflicts decided by last-write-wins.
    pub total_conflicts_resolved: u64,
    /// Batches that exhausted their retries plus entities that failed to
    /// serialize.
    pub total_errors: u64,
    /// Duration of the last successful cycle.
    pub last_sync_duration: Option<Duration>,
}

/// Outcome of a successful cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Entities uploaded.
    pub uploaded: u64,
    /// Remote versions written locally.
    pub downloaded: u64,
    /// Conflicts resolved.
    pub conflicts_resolved: u64,
    /// Batches committed.
    pub batches_committed: u64,
    /// Entities skipped because they failed to serialize. They stay queued.
    pub invalid: Vec<PendingKey>,
    /// Queued creates/updates whose local entity no longer exists. Their
    /// queue items are dropped.
    pub missing: Vec<PendingKey>,
    /// Cycle duration.
    pub duration: Duration,
}

/// Builder for [`SyncOrchestrator`].
pub struct SyncOrchestratorBuilder {
    remote: Arc<dyn RemoteStore>,
    local: Arc<dyn LocalStore>,
    auth: Arc<dyn AuthProvider>,
    network: Arc<NetworkMonitor>,
    queue: Option<Arc<PendingChangeQueue>>,
    config: SyncConfiguration,
}

impl SyncOrchestratorBuilder {
    /// Uses `queue` instead of a fresh in-memory one.
    pub fn queue(mut self, queue: Arc<PendingChangeQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Sets the initial configuration.
    pub fn configuration(mut self, config: SyncConfiguration) -> Self {
        self.config = config;
        self
    }

    /// Builds the orchestrator. Autosync is not started.
    pub fn build(self) -> SyncOrchestrator {
        let (state, _) = watch::channel(SyncState::Idle);
        SyncOrchestrator {
            inner: Arc::new(Inner {
                remote: self.remote,
                local: self.local,
                auth: self.auth,
                network: self.network,
                queue: self
                    .queue
                    .unwrap_or_else(|| Arc::new(PendingChangeQueue::new())),
                config: RwLock::new(Arc::new(self.config)),
                state,
                stats: Mutex::new(SyncStatistics::default()),
                last_sync_date: RwLock::new(None),
                current: Mutex::new(None),
                cycle_seq: AtomicU64::new(0),
                cycle_lock: tokio::sync::Mutex::new(()),
                autosync: Mutex::new(None),
            }),
        }
    }
}

struct Inner {
    remote: Arc<dyn RemoteStore>,
    local: Arc<dyn LocalStore>,
    auth: Arc<dyn AuthProvider>,
    network: Arc<NetworkMonitor>,
    queue: Arc<PendingChangeQueue>,
    config: RwLock<Arc<SyncConfiguration>>,
    state: watch::Sender<SyncState>,
    stats: Mutex<SyncStatistics>,
    last_sync_date: RwLock<Option<Timestamp>>,
    /// Id and token of the cycle that currently owns the orchestrator.
    current: Mutex<Option<(u64, CancelToken)>>,
    cycle_seq: AtomicU64,
    /// Held for the body of a cycle; a superseding cycle waits here for the
    /// cancelled one to wind down.
    cycle_lock: tokio::sync::Mutex<()>,
    autosync: Mutex<Option<(CancelToken, JoinHandle<()>)>>,
}

/// Coordinates uploads, conflict resolution and autosync.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

impl SyncOrchestrator {
    /// Starts building an orchestrator over the given collaborators.
    pub fn builder(
        remote: Arc<dyn RemoteStore>,
        local: Arc<dyn LocalStore>,
        auth: Arc<dyn AuthProvider>,
        network: Arc<NetworkMonitor>,
    ) -> SyncOrchestratorBuilder {
        SyncOrchestratorBuilder {
            remote,
            local,
            auth,
            network,
            queue: None,
            config: SyncConfiguration::default(),
        }
    }

    /// Current state.
    pub fn state(&self) -> SyncState {
        self.inner.state.borrow().clone()
    }

    /// Subscribes to state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.inner.state.subscribe()
    }

    /// Statistics of the current or last cycle.
    pub fn statistics(&self) -> SyncStatistics {
        self.inner.stats.lock().clone()
    }

    /// Completion time of the last successful cycle.
    pub fn last_sync_date(&self) -> Option<Timestamp> {
        *self.inner.last_sync_date.read()
    }

    /// Outstanding uploads.
    pub fn pending_changes_count(&self) -> usize {
        self.inner.queue.pending_changes_count()
    }

    /// The pending change queue.
    pub fn queue(&self) -> &Arc<PendingChangeQueue> {
        &self.inner.queue
    }

    /// The network monitor.
    pub fn network(&self) -> &Arc<NetworkMonitor> {
        &self.inner.network
    }

    /// Configuration used by the next cycle.
    pub fn configuration(&self) -> Arc<SyncConfiguration> {
        Arc::clone(&self.inner.config.read())
    }

    /// Replaces the configuration. A running cycle keeps its snapshot.
    pub fn set_configuration(&self, config: SyncConfiguration) {
        debug!(?config, "configuration replaced");
        *self.inner.config.write() = Arc::new(config);
    }

    /// Records a local mutation: updates the local store and queues the
    /// upload.
    ///
    /// Creates and updates mark the record dirty and save it; deletes
    /// remove it. If a delete cancels a create that was never uploaded,
    /// nothing is sent.
    ///
    /// # Errors
    ///
    /// Returns an error if the local store or the persistent queue fails.
    pub fn record_change(
        &self,
        record: &mut dyn Syncable,
        operation: ChangeOperation,
    ) -> SyncResult<EnqueueOutcome> {
        match operation {
            ChangeOperation::Delete => {
                self.inner.local.remove(record.entity_type(), record.id())?;
            }
            ChangeOperation::Create | ChangeOperation::Update => {
                record.mark_dirty();
                self.inner.local.save(record)?;
            }
        }
        self.inner
            .queue
            .enqueue(record.id(), record.entity_type().clone(), operation)
    }

    /// Runs a sync cycle now, superseding any cycle in flight.
    ///
    /// # Errors
    ///
    /// - [`SyncError::NotAuthenticated`] without a principal
    /// - [`SyncError::NetworkUnavailable`] when the network policy fails
    /// - [`SyncError::Cancelled`] when superseded or stopped
    /// - the first unrecoverable batch error otherwise
    pub async fn sync_now(&self) -> SyncResult<SyncReport> {
        self.sync_now_with(&CancelToken::new()).await
    }

    /// Like [`sync_now`](Self::sync_now), additionally cancelled by
    /// `external` (a stop or expiration signal).
    pub async fn sync_now_with(&self, external: &CancelToken) -> SyncResult<SyncReport> {
        let inner = &self.inner;

        let Some(principal) = inner.auth.principal() else {
            warn!("sync requested without an authenticated principal");
            self.set_preflight_state(SyncState::Error(SyncError::NotAuthenticated.to_string()));
            return Err(SyncError::NotAuthenticated);
        };

        let config = self.configuration();
        if !inner.network.should_sync_with(&config) {
            info!(status = %inner.network.current(), "network policy blocks sync");
            self.set_preflight_state(SyncState::WaitingForNetwork);
            return Err(SyncError::NetworkUnavailable);
        }

        let token = CancelToken::new();
        let cycle_id = inner.cycle_seq.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((previous, old)) = inner.current.lock().replace((cycle_id, token.clone())) {
            info!(previous, cycle = cycle_id, "superseding sync cycle");
            old.cancel();
        }

        let _guard = inner.cycle_lock.lock().await;
        let cancel = token.joined(external);
        let result = if cancel.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            *inner.stats.lock() = SyncStatistics::default();
            self.set_state(SyncState::Syncing);
            info!(cycle = cycle_id, pending = inner.queue.pending_changes_count(), "sync started");
            self.run_cycle(&principal, &config, &cancel).await
        };
        // Releases the helper tasks behind `joined`.
        cancel.cancel();

        let owns_state = {
            let mut current = inner.current.lock();
            let owns = matches!(current.as_ref(), Some((id, _)) if *id == cycle_id);
            if owns {
                *current = None;
            }
            owns
        };

        match &result {
            Ok(report) => {
                inner.stats.lock().last_sync_duration = Some(report.duration);
                *inner.last_sync_date.write() = Some(Timestamp::now());
                info!(
                    cycle = cycle_id,
                    uploaded = report.uploaded,
                    downloaded = report.downloaded,
                    conflicts = report.conflicts_resolved,
                    batches = report.batches_committed,
                    duration_ms = report.duration.as_millis() as u64,
                    "sync completed"
                );
            }
            Err(err) => {
                warn!(cycle = cycle_id, error = %err, "sync cycle ended with error");
            }
        }

        if owns_state {
            self.set_state(match &result {
                Ok(_) | Err(SyncError::Cancelled) => SyncState::Idle,
                Err(err) if err.is_transient() => SyncState::WaitingForNetwork,
                Err(err) => SyncState::Error(err.to_string()),
            });
        }
        result
    }

    async fn run_cycle(
        &self,
        principal: &str,
        config: &SyncConfiguration,
        cancel: &CancelToken,
    ) -> SyncResult<SyncReport> {
        let started = Instant::now();
        let mut report = SyncReport::default();

        let snapshot = self.inner.queue.snapshot();
        for (entity_type, items) in group_by_type(snapshot) {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let collection = CollectionRef::new(principal, entity_type);
            let items = self
                .reconcile(&collection, items, &mut report, cancel)
                .await?;
            for batch in items.chunks(config.upload_batch_size.max(1)) {
                self.upload_batch(&collection, batch, config, cancel, &mut report)
                    .await?;
            }
        }

        report.duration = started.elapsed();
        Ok(report)
    }

    /// Pull-before-push: decides every diverged dirty entity of the group
    /// against the remote snapshot. Remote winners are written locally and
    /// leave the upload set; local winners stay queued.
    async fn reconcile(
        &self,
        collection: &CollectionRef,
        items: Vec<PendingChangeItem>,
        report: &mut SyncReport,
        cancel: &CancelToken,
    ) -> SyncResult<Vec<PendingChangeItem>> {
        let inner = &self.inner;
        let entity_type = collection.entity_type();

        let mut locals: Vec<Box<dyn Syncable>> = Vec::new();
        for item in items.iter().filter(|item| item.operation.writes_payload()) {
            if let Some(record) = inner.local.load(entity_type, &item.entity_id)? {
                locals.push(record);
            }
        }
        if locals.is_empty() {
            return Ok(items);
        }

        let remote_docs = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            docs = inner.remote.fetch_collection(collection) => docs,
        };
        let remote_docs = match remote_docs {
            Ok(docs) => docs,
            Err(err) if err.is_transient() => return Err(err),
            Err(err) => {
                warn!(%collection, error = %err, "remote snapshot unavailable, uploading without conflict check");
                return Ok(items);
            }
        };

        let conflicts =
            ConflictResolver::detect_conflicts(locals.iter().map(|b| b.as_ref()), &remote_docs);
        let mut superseded = Vec::new();
        for conflict in conflicts {
            let winner = conflict.winner();
            info!(
                %collection,
                id = %conflict.entity_id,
                local = conflict.local_modified.as_millis(),
                remote = conflict.remote_modified.as_millis(),
                ?winner,
                "resolved conflict"
            );
            if winner == Winner::Remote {
                let Some(doc) = remote_docs.iter().find(|d| d.id == conflict.entity_id) else {
                    continue;
                };
                // The entity may have been edited locally while the
                // snapshot was in flight; that edit is newer than both.
                if !inner
                    .local
                    .apply_remote_if_unchanged(entity_type, doc, conflict.local_modified)?
                {
                    continue;
                }
                superseded.push(PendingKey::new(entity_type.clone(), conflict.entity_id.clone()));
                report.downloaded += 1;
                inner.stats.lock().total_downloaded += 1;
            }
            report.conflicts_resolved += 1;
            inner.stats.lock().total_conflicts_resolved += 1;
        }

        if superseded.is_empty() {
            return Ok(items);
        }
        let (dropped, kept): (Vec<_>, Vec<_>) = items
            .into_iter()
            .partition(|item| superseded.iter().any(|key| item.matches(key)));
        // Revision-exact, so a change queued after the snapshot stays.
        inner.queue.remove_if_present(&dropped)?;
        Ok(kept)
    }

    async fn upload_batch(
        &self,
        collection: &CollectionRef,
        batch: &[PendingChangeItem],
        config: &SyncConfiguration,
        cancel: &CancelToken,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let inner = &self.inner;
        let entity_type = collection.entity_type();

        let mut writes = Vec::with_capacity(batch.len());
        let mut included: Vec<(&PendingChangeItem, Option<Timestamp>)> = Vec::new();
        let mut missing = Vec::new();

        for item in batch {
            match item.operation {
                ChangeOperation::Delete => {
                    writes.push(DocumentWrite::Delete {
                        collection: collection.clone(),
                        id: item.entity_id.clone(),
                    });
                    included.push((item, None));
                }
                ChangeOperation::Create | ChangeOperation::Update => {
                    let Some(record) = inner.local.load(entity_type, &item.entity_id)? else {
                        warn!(%collection, id = %item.entity_id, "queued entity missing locally, dropping");
                        report.missing.push(item.key());
                        missing.push(item);
                        continue;
                    };
                    match record.serialize() {
                        Ok(payload) => {
                            writes.push(DocumentWrite::Set {
                                collection: collection.clone(),
                                id: item.entity_id.clone(),
                                payload,
                                merge: item.operation == ChangeOperation::Update,
                            });
                            included.push((item, Some(record.last_modified())));
                        }
                        Err(err) => {
                            error!(%collection, id = %item.entity_id, error = %err, "skipping invalid entity");
                            report.invalid.push(item.key());
                            inner.stats.lock().total_errors += 1;
                        }
                    }
                }
            }
        }

        if !missing.is_empty() {
            inner.queue.remove_if_present(missing)?;
        }
        if writes.is_empty() {
            return Ok(());
        }

        debug!(%collection, writes = writes.len(), "committing batch");
        let committed = commit_with_retry(
            inner.remote.as_ref(),
            &writes,
            config,
            &inner.network,
            cancel,
        )
        .await;

        if let Err(err) = committed {
            if matches!(err, SyncError::MaxRetriesExceeded { .. }) {
                inner.stats.lock().total_errors += 1;
            }
            if !matches!(err, SyncError::Cancelled) {
                inner
                    .queue
                    .record_failure(included.iter().map(|(item, _)| *item))?;
            }
            return Err(err);
        }

        for (item, uploaded) in &included {
            if let Some(uploaded) = uploaded {
                if let Err(err) = inner.local.mark_synced(entity_type, &item.entity_id, *uploaded) {
                    warn!(%collection, id = %item.entity_id, error = %err, "could not mark entity synced");
                }
            }
        }
        inner
            .queue
            .remove_if_present(included.iter().map(|(item, _)| *item))?;

        let uploaded = included.len() as u64;
        report.uploaded += uploaded;
        report.batches_committed += 1;
        inner.stats.lock().total_uploaded += uploaded;
        info!(%collection, uploaded, "batch uploaded");
        Ok(())
    }

    /// Starts the autosync loop. Calling it while running is a no-op.
    pub fn start(&self) {
        let mut autosync = self.inner.autosync.lock();
        if autosync.is_some() {
            return;
        }
        let stop = CancelToken::new();
        let handle = tokio::spawn(self.clone().autosync_loop(stop.clone()));
        *autosync = Some((stop, handle));
        info!("autosync started");
    }

    /// Stops the autosync loop and cancels the cycle in flight.
    pub fn stop(&self) {
        if let Some((stop, _handle)) = self.inner.autosync.lock().take() {
            stop.cancel();
            info!("autosync stopped");
        }
        if let Some((_, token)) = self.inner.current.lock().as_ref() {
            token.cancel();
        }
    }

    /// Returns true while the autosync loop runs.
    pub fn is_running(&self) -> bool {
        self.inner
            .autosync
            .lock()
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished())
    }

    async fn autosync_loop(self, stop: CancelToken) {
        let mut connectivity = self.inner.network.observe_connectivity();
        let mut watching = true;

        loop {
            if stop.is_cancelled() {
                break;
            }
            let config = self.configuration();
            if self.inner.network.should_sync_with(&config) {
                if let Err(err) = self.sync_now_with(&stop).await {
                    debug!(error = %err, "autosync cycle failed");
                }
            }

            let sleep = tokio::time::sleep(config.auto_sync_interval);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => return,
                    _ = &mut sleep => break,
                    status = connectivity.changed(), if watching => match status {
                        Some(status)
                            if status.is_connected() && self.pending_changes_count() > 0 =>
                        {
                            info!(%status, pending = self.pending_changes_count(), "connectivity restored, syncing");
                            break;
                        }
                        Some(_) => {}
                        None => watching = false,
                    },
                }
            }
        }
    }

    /// Publishes the state of a request refused before it started a cycle.
    /// A cycle in flight owns the state and publishes its own outcome.
    fn set_preflight_state(&self, state: SyncState) {
        let current = self.inner.current.lock();
        if let Some((cycle, _)) = current.as_ref() {
            debug!(cycle = *cycle, %state, "cycle in flight, keeping its state");
            return;
        }
        self.set_state(state);
    }

    fn set_state(&self, state: SyncState) {
        let changed = self.inner.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state.clone();
                true
            }
        });
        if changed {
            debug!(%state, "sync state changed");
        }
    }
}

impl fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("state", &self.state())
            .field("pending", &self.pending_changes_count())
            .finish()
    }
}

/// Groups items by entity type, keeping first-seen type order and the
/// queue order within each group.
pub fn group_by_type(items: Vec<PendingChangeItem>) -> Vec<(EntityType, Vec<PendingChangeItem>)> {
    let mut groups: Vec<(EntityType, Vec<PendingChangeItem>)> = Vec::new();
    for item in items {
        match groups.iter_mut().find(|(t, _)| *t == item.entity_type) {
            Some((_, group)) => group.push(item),
            None => groups.push((item.entity_type.clone(), vec![item])),
        }
    }
    groups
}
