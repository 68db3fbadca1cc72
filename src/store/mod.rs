//! Record store abstraction used by the trace engine.
//!
//! The engine only needs keyed reads, create/delete and an all-or-nothing
//! batch write. Locking and transactions are the store's business.

pub mod memory;

pub use memory::{JournalEntry, MemoryStore};

use crate::error::StoreError;
use crate::models::{Trace, TraceId};
use async_trait::async_trait;

/// A set of node writes that must become visible together.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    puts: Vec<Trace>,
    deletes: Vec<TraceId>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace an existing node with a new value.
    pub fn put(&mut self, trace: Trace) {
        self.puts.push(trace);
    }

    /// Remove an existing node.
    pub fn delete(&mut self, id: TraceId) {
        self.deletes.push(id);
    }

    pub fn puts(&self) -> &[Trace] {
        &self.puts
    }

    pub fn deletes(&self) -> &[TraceId] {
        &self.deletes
    }

    pub fn len(&self) -> usize {
        self.puts.len() + self.deletes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.puts.is_empty() && self.deletes.is_empty()
    }
}

impl FromIterator<Trace> for WriteBatch {
    fn from_iter<I: IntoIterator<Item = Trace>>(iter: I) -> Self {
        Self {
            puts: iter.into_iter().collect(),
            deletes: Vec::new(),
        }
    }
}

/// Keyed record store holding trace nodes.
#[async_trait]
pub trait TraceStore: Send + Sync {
    /// Fetch a node by id.
    async fn get(&self, id: &TraceId) -> Result<Trace, StoreError>;

    /// Insert a new node. Fails with `AlreadyExists` on a duplicate id.
    async fn create(&self, trace: Trace) -> Result<(), StoreError>;

    /// Remove a node. Fails with `NotFound` if it is absent.
    async fn delete(&self, id: &TraceId) -> Result<(), StoreError>;

    /// Commit a batch. Either every write lands or none does; any put or
    /// delete naming an absent node fails the whole batch with `NotFound`.
    async fn apply(&self, batch: WriteBatch) -> Result<(), StoreError>;

    /// Replace several existing nodes at once.
    async fn batch_update(&self, traces: Vec<Trace>) -> Result<(), StoreError> {
        self.apply(traces.into_iter().collect()).await
    }

    /// Fetch the nodes that exist among `ids`; missing ids are skipped.
    async fn list_by_ids(&self, ids: &[TraceId]) -> Result<Vec<Trace>, StoreError>;

    /// Fetch the direct children of a node.
    async fn list_children(&self, parent: &TraceId) -> Result<Vec<Trace>, StoreError>;
}
