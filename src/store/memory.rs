//! In-process record store.
//!
//! Backs the replay binary and the engine tests. Besides the store contract
//! it keeps a journal of every committed write and a read counter, so tests
//! can assert exactly which nodes an operation touched.

use super::{TraceStore, WriteBatch};
use crate::error::StoreError;
use crate::models::{Trace, TraceId};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// A committed write, as recorded in the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    Create(TraceId),
    Delete(TraceId),
    Batch {
        puts: Vec<TraceId>,
        deletes: Vec<TraceId>,
    },
}

impl JournalEntry {
    /// Every id this entry wrote to.
    pub fn touched(&self) -> Vec<TraceId> {
        match self {
            JournalEntry::Create(id) | JournalEntry::Delete(id) => vec![id.clone()],
            JournalEntry::Batch { puts, deletes } => {
                puts.iter().chain(deletes.iter()).cloned().collect()
            }
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    traces: HashMap<TraceId, Trace>,
    /// parent id -> direct children
    children: HashMap<TraceId, BTreeSet<TraceId>>,
}

impl Inner {
    fn link(&mut self, trace: &Trace) {
        if let Some(parent) = trace.parent_id() {
            self.children
                .entry(parent.clone())
                .or_default()
                .insert(trace.id().clone());
        }
    }

    fn unlink(&mut self, trace: &Trace) {
        if let Some(parent) = trace.parent_id() {
            if let Some(siblings) = self.children.get_mut(parent) {
                siblings.remove(trace.id());
                if siblings.is_empty() {
                    self.children.remove(parent);
                }
            }
        }
    }

    fn insert(&mut self, trace: Trace) {
        if let Some(previous) = self.traces.remove(trace.id()) {
            self.unlink(&previous);
        }
        self.link(&trace);
        self.traces.insert(trace.id().clone(), trace);
    }

    fn remove(&mut self, id: &TraceId) -> Option<Trace> {
        let trace = self.traces.remove(id)?;
        self.unlink(&trace);
        Some(trace)
    }
}

/// Map-backed [`TraceStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    journal: Mutex<Vec<JournalEntry>>,
    reads: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node without any checks. Lets tests build states the engine
    /// would never produce, such as dangling parent pointers.
    pub async fn insert_raw(&self, trace: Trace) {
        self.inner.write().await.insert(trace);
    }

    /// All nodes, sorted by id.
    pub async fn snapshot(&self) -> Vec<Trace> {
        let inner = self.inner.read().await;
        let mut traces: Vec<Trace> = inner.traces.values().cloned().collect();
        traces.sort_by(|a, b| a.id().cmp(b.id()));
        traces
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.traces.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.traces.is_empty()
    }

    pub async fn journal(&self) -> Vec<JournalEntry> {
        self.journal.lock().await.clone()
    }

    pub async fn clear_journal(&self) {
        self.journal.lock().await.clear();
        self.reads.store(0, Ordering::SeqCst);
    }

    /// Number of keyed and listing reads served since the last journal reset.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Make every following write fail with `Unavailable`.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }

    async fn record(&self, entry: JournalEntry) {
        self.journal.lock().await.push(entry);
    }
}

#[async_trait]
impl TraceStore for MemoryStore {
    async fn get(&self, id: &TraceId) -> Result<Trace, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner
            .read()
            .await
            .traces
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn create(&self, trace: Trace) -> Result<(), StoreError> {
        self.check_writable()?;

        let id = trace.id().clone();
        {
            let mut inner = self.inner.write().await;
            if inner.traces.contains_key(&id) {
                return Err(StoreError::AlreadyExists(id));
            }
            inner.insert(trace);
        }

        self.record(JournalEntry::Create(id)).await;
        Ok(())
    }

    async fn delete(&self, id: &TraceId) -> Result<(), StoreError> {
        self.check_writable()?;

        if self.inner.write().await.remove(id).is_none() {
            return Err(StoreError::NotFound(id.clone()));
        }

        self.record(JournalEntry::Delete(id.clone())).await;
        Ok(())
    }

    async fn apply(&self, batch: WriteBatch) -> Result<(), StoreError> {
        self.check_writable()?;

        let entry = JournalEntry::Batch {
            puts: batch.puts().iter().map(|t| t.id().clone()).collect(),
            deletes: batch.deletes().to_vec(),
        };

        {
            let mut inner = self.inner.write().await;

            // Validate everything before touching anything.
            let missing = batch
                .puts()
                .iter()
                .map(Trace::id)
                .chain(batch.deletes().iter())
                .find(|id| !inner.traces.contains_key(*id));
            if let Some(id) = missing {
                return Err(StoreError::NotFound(id.clone()));
            }

            debug!("Applying batch of {} writes", batch.len());

            let WriteBatch { puts, deletes } = batch;
            for trace in puts {
                inner.insert(trace);
            }
            for id in &deletes {
                inner.remove(id);
            }
        }

        self.record(entry).await;
        Ok(())
    }

    async fn list_by_ids(&self, ids: &[TraceId]) -> Result<Vec<Trace>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| inner.traces.get(id).cloned())
            .collect())
    }

    async fn list_children(&self, parent: &TraceId) -> Result<Vec<Trace>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.read().await;
        Ok(inner
            .children
            .get(parent)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.traces.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn id(raw: &str) -> TraceId {
        TraceId::new(raw).unwrap()
    }

    fn node(raw: &str, parent: Option<&str>) -> Trace {
        Trace::new(id(raw), parent.map(id))
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = MemoryStore::new();
        assert_ok!(store.create(node("a", None)).await);

        let trace = assert_ok!(store.get(&id("a")).await);
        assert_eq!(trace.id(), &id("a"));
        assert_eq!(store.reads(), 1);
    }

    #[tokio::test]
    async fn test_create_duplicate_fails() {
        let store = MemoryStore::new();
        assert_ok!(store.create(node("a", None)).await);

        let err = assert_err!(store.create(node("a", None)).await);
        assert_eq!(err, StoreError::AlreadyExists(id("a")));
    }

    #[tokio::test]
    async fn test_children_index_follows_parent_changes() {
        let store = MemoryStore::new();
        store.create(node("p", None)).await.unwrap();
        store.create(node("q", None)).await.unwrap();
        store.create(node("c", Some("p"))).await.unwrap();

        assert_eq!(store.list_children(&id("p")).await.unwrap().len(), 1);

        let moved = node("c", Some("q"));
        store.batch_update(vec![moved]).await.unwrap();

        assert!(store.list_children(&id("p")).await.unwrap().is_empty());
        assert_eq!(store.list_children(&id("q")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_batch_is_all_or_nothing() {
        let store = MemoryStore::new();
        store.create(node("a", None)).await.unwrap();

        let mut batch = WriteBatch::new();
        batch.put(node("a", None).with_actual(Duration::seconds(5)));
        batch.put(node("ghost", None));

        let err = assert_err!(store.apply(batch).await);
        assert_eq!(err, StoreError::NotFound(id("ghost")));
        assert_eq!(store.get(&id("a")).await.unwrap().actual(), Duration::zero());
    }

    #[tokio::test]
    async fn test_batch_with_delete() {
        let store = MemoryStore::new();
        store.create(node("p", None)).await.unwrap();
        store.create(node("c", Some("p"))).await.unwrap();

        let mut batch = WriteBatch::new();
        batch.put(node("p", None).with_actual(Duration::seconds(1)));
        batch.delete(id("c"));
        assert_ok!(store.apply(batch).await);

        assert_eq!(store.len().await, 1);
        assert!(store.list_children(&id("p")).await.unwrap().is_empty());

        let journal = store.journal().await;
        assert_eq!(
            journal.last().unwrap().touched(),
            vec![id("p"), id("c")]
        );
    }

    #[tokio::test]
    async fn test_list_by_ids_skips_missing() {
        let store = MemoryStore::new();
        store.create(node("a", None)).await.unwrap();

        let found = store.list_by_ids(&[id("a"), id("zzz")]).await.unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_fail_writes() {
        let store = MemoryStore::new();
        store.fail_writes(true);

        let err = assert_err!(store.create(node("a", None)).await);
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(store.is_empty().await);
        assert!(store.journal().await.is_empty());
    }
}
