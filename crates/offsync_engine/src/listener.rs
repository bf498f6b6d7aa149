//! Remote change listener.
//!
//! Bridges per-collection push notifications into the local replica.
//! Applying a change is idempotent: a remote version that is not newer than
//! the local one is skipped, so replays never overwrite newer local edits.

use crate::auth::AuthProvider;
use crate::cancel::CancelToken;
use crate::error::{SyncError, SyncResult};
use crate::local::LocalStore;
use crate::queue::PendingChangeQueue;
use crate::remote::{CollectionRef, RemoteStore};
use offsync_protocol::{
    ChangeOperation, ConflictResolver, EntityType, PendingKey, RecordError, RemoteChange,
    RemoteChangeKind, Winner, FIELD_LAST_MODIFIED,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What [`RemoteChangeListener::apply_change`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The remote version was written locally.
    Applied,
    /// The remote version was not newer; nothing changed.
    Skipped,
    /// A pending local change won the conflict and stays queued.
    ConflictKeptLocal,
    /// The remote version won over a dirty local record.
    ConflictAcceptedRemote,
    /// The local record was removed.
    Removed,
}

/// Counters of applied changes since the listener was created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerStats {
    /// Remote versions written.
    pub applied: u64,
    /// Changes ignored as not newer.
    pub skipped: u64,
    /// Conflicts decided for the local record.
    pub conflicts_kept_local: u64,
    /// Conflicts decided for the remote document.
    pub conflicts_accepted_remote: u64,
    /// Local records removed.
    pub removed: u64,
    /// Changes that failed to apply.
    pub errors: u64,
}

struct Inner {
    remote: Arc<dyn RemoteStore>,
    local: Arc<dyn LocalStore>,
    auth: Arc<dyn AuthProvider>,
    queue: Arc<PendingChangeQueue>,
    subscriptions: Mutex<HashMap<CollectionRef, CancelToken>>,
    stats: Mutex<ListenerStats>,
}

/// Keeps one subscription per `(entity type, owner)` and applies incoming
/// changes to the local store.
#[derive(Clone)]
pub struct RemoteChangeListener {
    inner: Arc<Inner>,
}

impl RemoteChangeListener {
    /// Creates a listener. `queue` must be the orchestrator's queue so that
    /// accepted remote versions retire the matching pending uploads.
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        local: Arc<dyn LocalStore>,
        auth: Arc<dyn AuthProvider>,
        queue: Arc<PendingChangeQueue>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                remote,
                local,
                auth,
                queue,
                subscriptions: Mutex::new(HashMap::new()),
                stats: Mutex::new(ListenerStats::default()),
            }),
        }
    }

    /// Subscribes to `entity_type` for the current principal.
    ///
    /// Returns false if that subscription is already active.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotAuthenticated`] without a principal, or the
    /// remote store's error if it refuses the listener.
    pub fn start(&self, entity_type: EntityType) -> SyncResult<bool> {
        let owner = self
            .inner
            .auth
            .principal()
            .ok_or(SyncError::NotAuthenticated)?;
        let collection = CollectionRef::new(owner, entity_type);

        let mut subscriptions = self.inner.subscriptions.lock();
        if subscriptions.contains_key(&collection) {
            return Ok(false);
        }
        let mut subscription = self.inner.remote.listen(&collection)?;
        let stop = CancelToken::new();
        subscriptions.insert(collection.clone(), stop.clone());
        drop(subscriptions);

        info!(%collection, "listening for remote changes");
        let listener = self.clone();
        tokio::spawn(async move {
            loop {
                let change = tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    change = subscription.next() => change,
                };
                let Some(change) = change else {
                    debug!(%collection, "remote closed the listener");
                    break;
                };
                if let Err(err) = listener.apply_change(collection.entity_type(), &change) {
                    warn!(%collection, id = change.id(), error = %err, "failed to apply remote change");
                }
            }
            subscription.close();
            listener.forget(&collection, &stop);
        });
        Ok(true)
    }

    /// Cancels the subscription to `entity_type` for the current principal.
    /// Returns false if none was active.
    pub fn stop(&self, entity_type: &EntityType) -> bool {
        let Some(owner) = self.inner.auth.principal() else {
            return false;
        };
        let collection = CollectionRef::new(owner, entity_type.clone());
        match self.inner.subscriptions.lock().remove(&collection) {
            Some(stop) => {
                stop.cancel();
                info!(%collection, "stopped listening");
                true
            }
            None => false,
        }
    }

    /// Cancels every subscription.
    pub fn stop_all(&self) {
        let drained: Vec<_> = self.inner.subscriptions.lock().drain().collect();
        for (collection, stop) in drained {
            stop.cancel();
            debug!(%collection, "stopped listening");
        }
    }

    /// Active subscriptions, sorted.
    pub fn active_subscriptions(&self) -> Vec<CollectionRef> {
        let mut active: Vec<_> = self.inner.subscriptions.lock().keys().cloned().collect();
        active.sort();
        active
    }

    /// Counters so far.
    pub fn stats(&self) -> ListenerStats {
        self.inner.stats.lock().clone()
    }

    /// Applies one remote change to the local store.
    ///
    /// - A change not newer than the local record is skipped.
    /// - A change against a dirty local record goes through the
    ///   last-write-wins resolver; an accepted remote version retires the
    ///   pending upload.
    /// - A removal of a dirty local record keeps the local record, which is
    ///   uploaded again.
    /// - A document whose local delete is still queued is not restored.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidData`] for an added or modified document
    /// without `lastModified`, or the local store's error.
    pub fn apply_change(
        &self,
        entity_type: &EntityType,
        change: &RemoteChange,
    ) -> SyncResult<ApplyOutcome> {
        let result = self.apply_inner(entity_type, change);
        let mut stats = self.inner.stats.lock();
        match &result {
            Ok(ApplyOutcome::Applied) => stats.applied += 1,
            Ok(ApplyOutcome::Skipped) => stats.skipped += 1,
            Ok(ApplyOutcome::ConflictKeptLocal) => stats.conflicts_kept_local += 1,
            Ok(ApplyOutcome::ConflictAcceptedRemote) => stats.conflicts_accepted_remote += 1,
            Ok(ApplyOutcome::Removed) => stats.removed += 1,
            Err(_) => stats.errors += 1,
        }
        drop(stats);
        if let Ok(outcome) = &result {
            debug!(%entity_type, id = change.id(), kind = ?change.kind, ?outcome, "remote change");
        }
        result
    }

    fn apply_inner(
        &self,
        entity_type: &EntityType,
        change: &RemoteChange,
    ) -> SyncResult<ApplyOutcome> {
        let inner = &self.inner;
        let document = &change.document;
        let local = inner.local.load(entity_type, &document.id)?;

        if change.kind == RemoteChangeKind::Removed {
            return match local {
                None => Ok(ApplyOutcome::Skipped),
                Some(local) if local.is_dirty() => Ok(ApplyOutcome::ConflictKeptLocal),
                Some(_) => {
                    inner.local.remove(entity_type, &document.id)?;
                    Ok(ApplyOutcome::Removed)
                }
            };
        }

        let Some(remote_modified) = document.last_modified else {
            return Err(RecordError::MissingField {
                entity_id: document.id.clone(),
                field: FIELD_LAST_MODIFIED,
            }
            .into());
        };

        let key = PendingKey::new(entity_type.clone(), document.id.clone());
        match local {
            None => {
                // A local delete waiting for upload outranks the replayed
                // remote copy.
                if inner
                    .queue
                    .get(&key)
                    .is_some_and(|item| item.operation == ChangeOperation::Delete)
                {
                    return Ok(ApplyOutcome::ConflictKeptLocal);
                }
                inner.local.apply_remote(entity_type, document)?;
                Ok(ApplyOutcome::Applied)
            }
            Some(local) if local.is_dirty() => {
                match ConflictResolver::resolve(local.as_ref(), document) {
                    Winner::Remote => {
                        let queued = inner.queue.get(&key);
                        if !inner.local.apply_remote_if_unchanged(
                            entity_type,
                            document,
                            local.last_modified(),
                        )? {
                            return Ok(ApplyOutcome::ConflictKeptLocal);
                        }
                        inner.queue.remove_if_present(queued.as_ref())?;
                        Ok(ApplyOutcome::ConflictAcceptedRemote)
                    }
                    Winner::Local => Ok(ApplyOutcome::ConflictKeptLocal),
                }
            }
            Some(local) if remote_modified > local.last_modified() => {
                inner.local.apply_remote(entity_type, document)?;
                Ok(ApplyOutcome::Applied)
            }
            Some(_) => Ok(ApplyOutcome::Skipped),
        }
    }

    /// Drops the bookkeeping of a subscription that ended on its own. A
    /// cancelled subscription was already removed by `stop`.
    fn forget(&self, collection: &CollectionRef, stop: &CancelToken) {
        if !stop.is_cancelled() {
            self.inner.subscriptions.lock().remove(collection);
        }
    }
}
