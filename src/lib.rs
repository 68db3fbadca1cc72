//! focus-trace - hierarchical time accounting for task trees.
//!
//! Every tracked task owns a trace node. The engine keeps each node's
//! `actual` equal to the time recorded anywhere in its subtree while timers
//! stop, corrections land, tasks are deleted and subtrees move, touching
//! only the ancestors whose totals actually change.

pub mod analysis;
pub mod engine;
pub mod error;
pub mod events;
pub mod models;
pub mod report;
pub mod store;

pub use engine::{EngineOptions, ReparentWeight, TraceService};
pub use error::{StoreError, TraceError, TraceResult};
pub use models::{TaskStatus, Trace, TraceId, TraceView};
pub use store::{MemoryStore, TraceStore, WriteBatch};
