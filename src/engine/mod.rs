//! The duration aggregation engine.
//!
//! Keeps every node's `actual` equal to the total time recorded in its
//! subtree while timers stop, corrections land, nodes are deleted and
//! subtrees move.

pub mod ancestry;
pub mod service;

pub use ancestry::{divergence_index, exclusive_time, find_ancestors};
pub use service::{EngineOptions, ReparentWeight, TraceService};
