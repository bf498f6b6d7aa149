//! The pending change queue.
//!
//! Every local mutation lands here before it is uploaded. All mutations go
//! through one lock with short, non-async critical sections, so local
//! writers and an in-progress drain never interleave. Drains work on an
//! immutable [`PendingChangeQueue::snapshot`] and remove only the exact
//! item revisions they committed.

use crate::error::SyncResult;
use offsync_protocol::{ChangeOperation, EntityType, PendingChangeItem, PendingKey, Timestamp};
use offsync_storage::{KeyValueStore, KeyValueStoreExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

const QUEUE_NAMESPACE: &str = "pending_queue";
const QUEUE_KEY: &str = "items";

/// What `enqueue` did with the new operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// No item existed for the key; a new one was appended.
    Queued,
    /// An existing item was replaced; carries the operation it had.
    Replaced(ChangeOperation),
    /// A delete cancelled a create that was never uploaded. Nothing is
    /// queued for the key any more and the caller should treat the record
    /// as clean.
    Dropped,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueState {
    items: Vec<PendingChangeItem>,
    next_revision: u64,
}

/// Ordered, deduplicated collection of outstanding uploads.
pub struct PendingChangeQueue {
    state: Mutex<QueueState>,
    store: Option<Arc<dyn KeyValueStore>>,
    count: watch::Sender<usize>,
}

impl PendingChangeQueue {
    /// Creates an in-memory queue.
    pub fn new() -> Self {
        Self::from_state(QueueState::default(), None)
    }

    /// Creates a queue persisted to `store`, reloading any saved items.
    ///
    /// # Errors
    ///
    /// Returns an error if the saved queue cannot be read or decoded.
    pub fn persistent(store: Arc<dyn KeyValueStore>) -> SyncResult<Self> {
        let state: QueueState = store
            .get_cbor(QUEUE_NAMESPACE, QUEUE_KEY)?
            .unwrap_or_default();
        debug!(items = state.items.len(), "restored pending queue");
        Ok(Self::from_state(state, Some(store)))
    }

    fn from_state(state: QueueState, store: Option<Arc<dyn KeyValueStore>>) -> Self {
        let (count, _) = watch::channel(state.items.len());
        Self {
            state: Mutex::new(state),
            store,
            count,
        }
    }

    /// Queues `operation` for `(entity_type, entity_id)`.
    ///
    /// Any existing item for the key is removed and the new one appended,
    /// keeping the original `created_at` and `retry_count`. Two rules refine
    /// "latest operation wins":
    ///
    /// - `Delete` over a queued `Create` drops both, since the remote store
    ///   never saw the record.
    /// - `Update` over a queued `Create` stays a `Create`.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue is persistent and cannot be saved. The
    /// in-memory queue is updated either way.
    pub fn enqueue(
        &self,
        entity_id: impl Into<String>,
        entity_type: EntityType,
        operation: ChangeOperation,
    ) -> SyncResult<EnqueueOutcome> {
        let key = PendingKey::new(entity_type, entity_id);
        let mut state = self.state.lock();

        let previous = state
            .items
            .iter()
            .position(|item| item.matches(&key))
            .map(|index| state.items.remove(index));

        let outcome = match previous {
            Some(prev)
                if prev.operation == ChangeOperation::Create
                    && operation == ChangeOperation::Delete =>
            {
                EnqueueOutcome::Dropped
            }
            Some(prev) => {
                let effective = if prev.operation == ChangeOperation::Create
                    && operation == ChangeOperation::Update
                {
                    ChangeOperation::Create
                } else {
                    operation
                };
                let revision = Self::bump(&mut state);
                state.items.push(PendingChangeItem {
                    entity_id: key.entity_id.clone(),
                    entity_type: key.entity_type.clone(),
                    operation: effective,
                    retry_count: prev.retry_count,
                    created_at: prev.created_at,
                    revision,
                });
                EnqueueOutcome::Replaced(prev.operation)
            }
            None => {
                let revision = Self::bump(&mut state);
                state.items.push(PendingChangeItem {
                    entity_id: key.entity_id.clone(),
                    entity_type: key.entity_type.clone(),
                    operation,
                    retry_count: 0,
                    created_at: Timestamp::now(),
                    revision,
                });
                EnqueueOutcome::Queued
            }
        };

        debug!(key = %key, %operation, ?outcome, "enqueued change");
        self.commit(&state)?;
        Ok(outcome)
    }

    /// Returns an immutable copy of the queue in queue order.
    pub fn snapshot(&self) -> Vec<PendingChangeItem> {
        self.state.lock().items.clone()
    }

    /// Removes the given items if they are still queued at the same
    /// revision. Items replaced after the snapshot was taken are kept.
    ///
    /// Returns the number of items removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue is persistent and cannot be saved.
    pub fn remove_if_present<'a, I>(&self, committed: I) -> SyncResult<usize>
    where
        I: IntoIterator<Item = &'a PendingChangeItem>,
    {
        let committed: HashSet<(PendingKey, u64)> = committed
            .into_iter()
            .map(|item| (item.key(), item.revision))
            .collect();
        if committed.is_empty() {
            return Ok(0);
        }

        let mut state = self.state.lock();
        let before = state.items.len();
        state
            .items
            .retain(|item| !committed.contains(&(item.key(), item.revision)));
        let removed = before - state.items.len();
        self.commit(&state)?;
        Ok(removed)
    }

    /// Bumps `retry_count` of the given items that are still queued.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue is persistent and cannot be saved.
    pub fn record_failure<'a, I>(&self, failed: I) -> SyncResult<()>
    where
        I: IntoIterator<Item = &'a PendingChangeItem>,
    {
        let failed: HashSet<PendingKey> = failed.into_iter().map(|item| item.key()).collect();
        let mut state = self.state.lock();
        for item in state.items.iter_mut() {
            if failed.contains(&item.key()) {
                item.retry_count = item.retry_count.saturating_add(1);
            }
        }
        self.commit(&state)
    }

    /// Returns the queued item for `key`.
    pub fn get(&self, key: &PendingKey) -> Option<PendingChangeItem> {
        self.state
            .lock()
            .items
            .iter()
            .find(|item| item.matches(key))
            .cloned()
    }

    /// Returns true if an item is queued for `key`.
    pub fn contains(&self, key: &PendingKey) -> bool {
        self.state.lock().items.iter().any(|item| item.matches(key))
    }

    /// Number of outstanding uploads.
    pub fn pending_changes_count(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.pending_changes_count() == 0
    }

    /// Removes every item.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue is persistent and cannot be saved.
    pub fn clear(&self) -> SyncResult<()> {
        let mut state = self.state.lock();
        state.items.clear();
        self.commit(&state)
    }

    /// Subscribes to the pending count. The receiver starts with the
    /// current value.
    pub fn subscribe_count(&self) -> watch::Receiver<usize> {
        self.count.subscribe()
    }

    fn bump(state: &mut QueueState) -> u64 {
        state.next_revision += 1;
        state.next_revision
    }

    /// Publishes the new count and writes through to the store. Called with
    /// the state lock held so saved snapshots are written in mutation order.
    fn commit(&self, state: &QueueState) -> SyncResult<()> {
        self.count.send_replace(state.items.len());
        if let Some(store) = &self.store {
            if let Err(e) = store.put_cbor(QUEUE_NAMESPACE, QUEUE_KEY, state) {
                warn!(error = %e, "failed to persist pending queue");
                return Err(e.into());
            }
        }
        Ok(())
    }
}

impl Default for PendingChangeQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PendingChangeQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingChangeQueue")
            .field("pending", &self.pending_changes_count())
            .field("persistent", &self.store.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_storage::InMemoryStore;

    fn tx() -> EntityType {
        EntityType::new("transactions")
    }

    #[test]
    fn enqueue_appends_in_order() {
        let queue = PendingChangeQueue::new();
        queue.enqueue("a", tx(), ChangeOperation::Create).unwrap();
        queue.enqueue("b", tx(), ChangeOperation::Create).unwrap();

        let ids: Vec<_> = queue.snapshot().into_iter().map(|i| i.entity_id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(queue.pending_changes_count(), 2);
    }

    #[test]
    fn update_then_update_collapses() {
        let queue = PendingChangeQueue::new();
        queue.enqueue("a", tx(), ChangeOperation::Update).unwrap();
        let first = queue.snapshot()[0].clone();
        let outcome = queue.enqueue("a", tx(), ChangeOperation::Update).unwrap();

        assert_eq!(outcome, EnqueueOutcome::Replaced(ChangeOperation::Update));
        let items = queue.snapshot();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].operation, ChangeOperation::Update);
        assert_eq!(items[0].created_at, first.created_at);
        assert!(items[0].revision > first.revision);
    }

    #[test]
    fn delete_supersedes_update() {
        let queue = PendingChangeQueue::new();
        queue.enqueue("a", tx(), ChangeOperation::Update).unwrap();
        let outcome = queue.enqueue("a", tx(), ChangeOperation::Delete).unwrap();

        assert_eq!(outcome, EnqueueOutcome::Replaced(ChangeOperation::Update));
        assert_eq!(queue.snapshot()[0].operation, ChangeOperation::Delete);
    }

    #[test]
    fn delete_of_never_uploaded_create_drops_both() {
        let queue = PendingChangeQueue::new();
        queue.enqueue("a", tx(), ChangeOperation::Create).unwrap();
        let outcome = queue.enqueue("a", tx(), ChangeOperation::Delete).unwrap();

        assert_eq!(outcome, EnqueueOutcome::Dropped);
        assert!(queue.is_empty());
    }

    #[test]
    fn update_over_create_stays_create() {
        let queue = PendingChangeQueue::new();
        queue.enqueue("a", tx(), ChangeOperation::Create).unwrap();
        queue.enqueue("a", tx(), ChangeOperation::Update).unwrap();
        assert_eq!(queue.snapshot()[0].operation, ChangeOperation::Create);

        // Still never uploaded, so a later delete drops it.
        assert_eq!(
            queue.enqueue("a", tx(), ChangeOperation::Delete).unwrap(),
            EnqueueOutcome::Dropped
        );
    }

    #[test]
    fn same_id_different_type_are_distinct() {
        let queue = PendingChangeQueue::new();
        queue.enqueue("a", tx(), ChangeOperation::Create).unwrap();
        queue
            .enqueue("a", EntityType::new("accounts"), ChangeOperation::Create)
            .unwrap();
        assert_eq!(queue.pending_changes_count(), 2);
    }

    #[test]
    fn remove_keeps_items_replaced_after_snapshot() {
        let queue = PendingChangeQueue::new();
        queue.enqueue("a", tx(), ChangeOperation::Create).unwrap();
        queue.enqueue("b", tx(), ChangeOperation::Create).unwrap();
        let snapshot = queue.snapshot();

        // Local edit lands while the drain is committing.
        queue.enqueue("b", tx(), ChangeOperation::Update).unwrap();
        queue.enqueue("c", tx(), ChangeOperation::Create).unwrap();

        let removed = queue.remove_if_present(&snapshot).unwrap();
        assert_eq!(removed, 1);
        let ids: Vec<_> = queue.snapshot().into_iter().map(|i| i.entity_id).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn record_failure_bumps_retry_count_and_survives_replacement() {
        let queue = PendingChangeQueue::new();
        queue.enqueue("a", tx(), ChangeOperation::Update).unwrap();
        let snapshot = queue.snapshot();
        queue.record_failure(&snapshot).unwrap();
        queue.enqueue("a", tx(), ChangeOperation::Update).unwrap();

        let item = queue.get(&PendingKey::new(tx(), "a")).unwrap();
        assert_eq!(item.retry_count, 1);
    }

    #[test]
    fn count_subscription_tracks_mutations() {
        let queue = PendingChangeQueue::new();
        let rx = queue.subscribe_count();
        assert_eq!(*rx.borrow(), 0);

        queue.enqueue("a", tx(), ChangeOperation::Create).unwrap();
        assert_eq!(*rx.borrow(), 1);

        queue.clear().unwrap();
        assert_eq!(*rx.borrow(), 0);
    }

    #[test]
    fn persistent_queue_survives_restart() {
        let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
        {
            let queue = PendingChangeQueue::persistent(Arc::clone(&store)).unwrap();
            queue.enqueue("a", tx(), ChangeOperation::Create).unwrap();
            queue.enqueue("b", tx(), ChangeOperation::Delete).unwrap();
        }

        let queue = PendingChangeQueue::persistent(store).unwrap();
        let items = queue.snapshot();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].operation, ChangeOperation::Delete);

        // Revisions keep increasing after a reload.
        queue.enqueue("c", tx(), ChangeOperation::Create).unwrap();
        let c = queue.get(&PendingKey::new(tx(), "c")).unwrap();
        assert!(c.revision > items[1].revision);
    }

    #[test]
    fn file_backed_queue_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = Arc::new(offsync_storage::FileStore::open(dir.path()).unwrap());
            let queue = PendingChangeQueue::persistent(store).unwrap();
            queue.enqueue("a", tx(), ChangeOperation::Update).unwrap();
        }

        let store = Arc::new(offsync_storage::FileStore::open(dir.path()).unwrap());
        let queue = PendingChangeQueue::persistent(store).unwrap();
        assert!(queue.contains(&PendingKey::new(tx(), "a")));
        assert_eq!(*queue.subscribe_count().borrow(), 1);
    }

    proptest::proptest! {
        #[test]
        fn at_most_one_item_per_key(
            ops in proptest::collection::vec((0u8..4, 1u8..=3), 0..64)
        ) {
            let queue = PendingChangeQueue::new();
            for (id, code) in &ops {
                let op = ChangeOperation::from_code(*code).unwrap();
                queue.enqueue(format!("e{id}"), tx(), op).unwrap();
            }

            let items = queue.snapshot();
            let keys: HashSet<PendingKey> = items.iter().map(|i| i.key()).collect();
            proptest::prop_assert_eq!(keys.len(), items.len());
            proptest::prop_assert_eq!(queue.pending_changes_count(), items.len());
            for item in &items {
                let last = ops
                    .iter()
                    .rev()
                    .find(|(id, _)| format!("e{id}") == item.entity_id)
                    .map(|(_, code)| ChangeOperation::from_code(*code).unwrap());
                // A queued item never keeps an operation older than the
                // latest one, except Update folding into a pending Create.
                proptest::prop_assert!(
                    last == Some(item.operation)
                        || (last == Some(ChangeOperation::Update)
                            && item.operation == ChangeOperation::Create)
                );
            }
        }
    }
}
