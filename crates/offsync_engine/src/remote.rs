//! Remote document store abstraction.
//!
//! The engine only needs batched commits, collection reads, single
//! document access and per-collection change listeners. The wire protocol
//! and authentication live behind [`RemoteStore`].

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use offsync_protocol::{Document, EntityType, RemoteChange, RemoteDocument};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

/// One owner's collection of one entity type.
///
/// Documents live at `users/{owner}/{entity_type}/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionRef {
    owner: String,
    entity_type: EntityType,
}

impl CollectionRef {
    /// Creates a collection reference.
    pub fn new(owner: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            owner: owner.into(),
            entity_type,
        }
    }

    /// Owning principal.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Entity type stored in the collection.
    pub fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    /// Collection path.
    pub fn path(&self) -> String {
        format!("users/{}/{}", self.owner, self.entity_type)
    }

    /// Path of a document in the collection.
    pub fn document_path(&self, id: &str) -> String {
        format!("{}/{}", self.path(), id)
    }
}

impl fmt::Display for CollectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// A single write inside a batch commit.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentWrite {
    /// Writes a payload. With `merge`, fields absent from `payload` are kept.
    Set {
        /// Target collection.
        collection: CollectionRef,
        /// Document id.
        id: String,
        /// Payload to write.
        payload: Document,
        /// Merge into the existing document instead of replacing it.
        merge: bool,
    },
    /// Deletes a document. Deleting a missing document is not an error.
    Delete {
        /// Target collection.
        collection: CollectionRef,
        /// Document id.
        id: String,
    },
}

impl DocumentWrite {
    /// Document id of the write.
    pub fn id(&self) -> &str {
        match self {
            DocumentWrite::Set { id, .. } | DocumentWrite::Delete { id, .. } => id,
        }
    }

    /// Collection of the write.
    pub fn collection(&self) -> &CollectionRef {
        match self {
            DocumentWrite::Set { collection, .. } | DocumentWrite::Delete { collection, .. } => {
                collection
            }
        }
    }
}

/// A live collection listener.
///
/// Changes arrive in server order. Dropping the subscription (or calling
/// [`close`](Self::close)) cancels it.
pub struct ChangeSubscription {
    rx: mpsc::UnboundedReceiver<RemoteChange>,
}

impl ChangeSubscription {
    /// Wraps a receiver fed by a remote store implementation.
    pub fn new(rx: mpsc::UnboundedReceiver<RemoteChange>) -> Self {
        Self { rx }
    }

    /// Next change, or `None` once the remote side closed the listener.
    pub async fn next(&mut self) -> Option<RemoteChange> {
        self.rx.recv().await
    }

    /// Stops delivery. Buffered changes can still be drained.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// The authoritative remote document store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Applies `writes` atomically: either all of them land or none.
    async fn commit(&self, writes: &[DocumentWrite]) -> SyncResult<()>;

    /// Reads every document of a collection.
    async fn fetch_collection(&self, collection: &CollectionRef) -> SyncResult<Vec<RemoteDocument>>;

    /// Reads a single document.
    async fn get_document(
        &self,
        collection: &CollectionRef,
        id: &str,
    ) -> SyncResult<Option<RemoteDocument>>;

    /// Writes a single document outside a batch.
    async fn set_document(
        &self,
        collection: &CollectionRef,
        id: &str,
        payload: Document,
        merge: bool,
    ) -> SyncResult<()>;

    /// Subscribes to changes of a collection. Current documents are
    /// delivered first as `Added` notices.
    fn listen(&self, collection: &CollectionRef) -> SyncResult<ChangeSubscription>;
}

type CommitHook = Box<dyn Fn(u64) + Send + Sync>;

/// In-process remote store.
///
/// Backs the CLI simulator and the tests. Supports failure injection and
/// records the size of every successful commit.
#[derive(Default)]
pub struct MemoryRemoteStore {
    collections: Mutex<BTreeMap<CollectionRef, BTreeMap<String, Document>>>,
    listeners: Mutex<Vec<(CollectionRef, mpsc::UnboundedSender<RemoteChange>)>>,
    failures: Mutex<VecDeque<SyncError>>,
    fail_always: Mutex<Option<SyncError>>,
    commit_hook: Mutex<Option<CommitHook>>,
    commit_attempts: AtomicU64,
    committed_batches: Mutex<Vec<usize>>,
}

impl MemoryRemoteStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `count` commits with a retryable error.
    pub fn fail_next_commits(&self, count: usize) {
        let mut failures = self.failures.lock();
        for _ in 0..count {
            failures.push_back(SyncError::commit_retryable("injected failure"));
        }
    }

    /// Fails the next commit with `error`.
    pub fn fail_next_with(&self, error: SyncError) {
        self.failures.lock().push_back(error);
    }

    /// Fails every commit with `error` until cleared with `None`.
    pub fn set_fail_always(&self, error: Option<SyncError>) {
        *self.fail_always.lock() = error;
    }

    /// Installs a hook called with the 1-based attempt number at the start
    /// of every commit attempt.
    pub fn on_commit(&self, hook: impl Fn(u64) + Send + Sync + 'static) {
        *self.commit_hook.lock() = Some(Box::new(hook));
    }

    /// Commit attempts so far, including failed ones.
    pub fn commit_attempts(&self) -> u64 {
        self.commit_attempts.load(Ordering::SeqCst)
    }

    /// Sizes of the successful commits, in order.
    pub fn committed_batches(&self) -> Vec<usize> {
        self.committed_batches.lock().clone()
    }

    /// Reads a document without going through the async API.
    pub fn document(&self, collection: &CollectionRef, id: &str) -> Option<Document> {
        self.collections
            .lock()
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    /// Number of documents in a collection.
    pub fn document_count(&self, collection: &CollectionRef) -> usize {
        self.collections
            .lock()
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    /// Writes a document directly, as another device would, and notifies
    /// listeners.
    pub fn put_document(&self, collection: &CollectionRef, id: &str, payload: Document) {
        self.apply(&[DocumentWrite::Set {
            collection: collection.clone(),
            id: id.to_string(),
            payload,
            merge: false,
        }]);
    }

    /// Deletes a document directly and notifies listeners.
    pub fn remove_document(&self, collection: &CollectionRef, id: &str) {
        self.apply(&[DocumentWrite::Delete {
            collection: collection.clone(),
            id: id.to_string(),
        }]);
    }

    /// Live listener count across all collections.
    pub fn listener_count(&self) -> usize {
        let mut listeners = self.listeners.lock();
        listeners.retain(|(_, tx)| !tx.is_closed());
        listeners.len()
    }

    fn apply(&self, writes: &[DocumentWrite]) {
        let mut changes = Vec::with_capacity(writes.len());
        {
            let mut collections = self.collections.lock();
            for write in writes {
                let docs = collections.entry(write.collection().clone()).or_default();
                match write {
                    DocumentWrite::Set {
                        collection,
                        id,
                        payload,
                        merge,
                    } => {
                        let existed = docs.contains_key(id);
                        let doc = docs.entry(id.clone()).or_default();
                        if *merge {
                            for (k, v) in payload {
                                doc.insert(k.clone(), v.clone());
                            }
                        } else {
                            *doc = payload.clone();
                        }
                        let document = RemoteDocument::from_payload(id.clone(), doc.clone());
                        let change = if existed {
                            RemoteChange::modified(document)
                        } else {
                            RemoteChange::added(document)
                        };
                        changes.push((collection.clone(), change));
                    }
                    DocumentWrite::Delete { collection, id } => {
                        if let Some(old) = docs.remove(id) {
                            let document = RemoteDocument::from_payload(id.clone(), old);
                            changes.push((collection.clone(), RemoteChange::removed(document)));
                        }
                    }
                }
            }
        }

        let mut listeners = self.listeners.lock();
        listeners.retain(|(_, tx)| !tx.is_closed());
        for (collection, change) in changes {
            for (target, tx) in listeners.iter() {
                if *target == collection {
                    let _ = tx.send(change.clone());
                }
            }
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn commit(&self, writes: &[DocumentWrite]) -> SyncResult<()> {
        let attempt = self.commit_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(hook) = self.commit_hook.lock().as_ref() {
            hook(attempt);
        }
        if let Some(err) = self.failures.lock().pop_front() {
            debug!(attempt, error = %err, "injected commit failure");
            return Err(err);
        }
        if let Some(err) = self.fail_always.lock().clone() {
            return Err(err);
        }

        self.apply(writes);
        self.committed_batches.lock().push(writes.len());
        debug!(attempt, writes = writes.len(), "batch committed");
        Ok(())
    }

    async fn fetch_collection(&self, collection: &CollectionRef) -> SyncResult<Vec<RemoteDocument>> {
        Ok(self
            .collections
            .lock()
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, payload)| RemoteDocument::from_payload(id.clone(), payload.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_document(
        &self,
        collection: &CollectionRef,
        id: &str,
    ) -> SyncResult<Option<RemoteDocument>> {
        Ok(self
            .document(collection, id)
            .map(|payload| RemoteDocument::from_payload(id, payload)))
    }

    async fn set_document(
        &self,
        collection: &CollectionRef,
        id: &str,
        payload: Document,
        merge: bool,
    ) -> SyncResult<()> {
        self.apply(&[DocumentWrite::Set {
            collection: collection.clone(),
            id: id.to_string(),
            payload,
            merge,
        }]);
        Ok(())
    }

    fn listen(&self, collection: &CollectionRef) -> SyncResult<ChangeSubscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        // Hold the collections lock so no write slips between the initial
        // snapshot and registration.
        let collections = self.collections.lock();
        if let Some(docs) = collections.get(collection) {
            for (id, payload) in docs {
                let document = RemoteDocument::from_payload(id.clone(), payload.clone());
                let _ = tx.send(RemoteChange::added(document));
            }
        }
        self.listeners.lock().push((collection.clone(), tx));
        drop(collections);
        debug!(collection = %collection, "listener attached");
        Ok(ChangeSubscription::new(rx))
    }
}

impl fmt::Debug for MemoryRemoteStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryRemoteStore")
            .field("collections", &self.collections.lock().len())
            .field("commit_attempts", &self.commit_attempts())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_protocol::RemoteChangeKind;
    use serde_json::json;

    fn payload(value: i64, modified: i64) -> Document {
        let mut doc = Document::new();
        doc.insert("value".into(), json!(value));
        doc.insert("lastModified".into(), json!(modified));
        doc
    }

    fn budgets() -> CollectionRef {
        CollectionRef::new("u1", "budgets".into())
    }

    #[test]
    fn collection_paths() {
        let c = budgets();
        assert_eq!(c.path(), "users/u1/budgets");
        assert_eq!(c.document_path("b1"), "users/u1/budgets/b1");
    }

    #[tokio::test]
    async fn commit_applies_all_writes() {
        let store = MemoryRemoteStore::new();
        let writes = vec![
            DocumentWrite::Set {
                collection: budgets(),
                id: "a".into(),
                payload: payload(1, 10),
                merge: false,
            },
            DocumentWrite::Set {
                collection: budgets(),
                id: "b".into(),
                payload: payload(2, 10),
                merge: false,
            },
        ];
        store.commit(&writes).await.unwrap();
        assert_eq!(store.document_count(&budgets()), 2);
        assert_eq!(store.committed_batches(), vec![2]);

        store
            .commit(&[DocumentWrite::Delete {
                collection: budgets(),
                id: "a".into(),
            }])
            .await
            .unwrap();
        assert_eq!(store.document_count(&budgets()), 1);
        assert_eq!(store.commit_attempts(), 2);
    }

    #[tokio::test]
    async fn injected_failures_leave_store_untouched() {
        let store = MemoryRemoteStore::new();
        store.fail_next_commits(1);
        let write = [DocumentWrite::Set {
            collection: budgets(),
            id: "a".into(),
            payload: payload(1, 10),
            merge: false,
        }];

        let err = store.commit(&write).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(store.document_count(&budgets()), 0);

        store.commit(&write).await.unwrap();
        assert_eq!(store.document_count(&budgets()), 1);
        assert_eq!(store.commit_attempts(), 2);
    }

    #[tokio::test]
    async fn merge_keeps_existing_fields() {
        let store = MemoryRemoteStore::new();
        let mut extra = payload(1, 10);
        extra.insert("note".into(), json!("keep"));
        store.put_document(&budgets(), "a", extra);

        store
            .set_document(&budgets(), "a", payload(5, 20), true)
            .await
            .unwrap();
        let doc = store.get_document(&budgets(), "a").await.unwrap().unwrap();
        assert_eq!(doc.payload["value"], json!(5));
        assert_eq!(doc.payload["note"], json!("keep"));
        assert_eq!(doc.last_modified.map(|t| t.as_millis()), Some(20));
    }

    #[tokio::test]
    async fn listener_gets_snapshot_then_changes() {
        let store = MemoryRemoteStore::new();
        store.put_document(&budgets(), "a", payload(1, 10));

        let mut sub = store.listen(&budgets()).unwrap();
        let first = sub.next().await.unwrap();
        assert_eq!(first.kind, RemoteChangeKind::Added);
        assert_eq!(first.id(), "a");

        store.put_document(&budgets(), "a", payload(2, 20));
        store.remove_document(&budgets(), "a");
        // Other collections are not delivered.
        store.put_document(&CollectionRef::new("u2", "budgets".into()), "x", payload(1, 1));

        assert_eq!(sub.next().await.unwrap().kind, RemoteChangeKind::Modified);
        assert_eq!(sub.next().await.unwrap().kind, RemoteChangeKind::Removed);
        assert_eq!(store.listener_count(), 1);

        drop(sub);
        assert_eq!(store.listener_count(), 0);
    }
}
