//! Error types for the trace engine and its record store.

use crate::models::TraceId;
use thiserror::Error;

/// Errors raised by a [`TraceStore`](crate::store::TraceStore) implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("trace `{0}` not found")]
    NotFound(TraceId),

    #[error("trace `{0}` already exists")]
    AlreadyExists(TraceId),

    #[error("record store unavailable: {0}")]
    Unavailable(String),
}

/// Errors returned by the trace engine.
#[derive(Debug, Error)]
pub enum TraceError {
    /// The named node does not exist.
    #[error("trace `{0}` not found")]
    NotFound(TraceId),

    /// A referenced parent does not exist at creation or reparent time.
    #[error("parent trace `{0}` not found")]
    ParentNotFound(TraceId),

    #[error("trace id must not be empty")]
    InvalidId,

    #[error("invalid task status `{0}` (expected todo, doing or done)")]
    InvalidStatus(String),

    #[error("{field} must not be negative (got {millis}ms)")]
    InvalidDuration { field: &'static str, millis: i64 },

    /// A duration given in whole seconds does not fit a `chrono::Duration`.
    #[error("{field} of {secs}s is out of range")]
    DurationOutOfRange { field: &'static str, secs: i64 },

    /// Rolling a delta into a node's total left the representable range.
    #[error("total of `{id}` would overflow")]
    DurationOverflow { id: TraceId },

    #[error("moving `{id}` under `{parent}` would make it its own ancestor")]
    CycleDetected { id: TraceId, parent: TraceId },

    /// A parent pointer refers to a node the store does not have.
    #[error("ancestor chain of `{from}` is broken: `{missing}` does not exist")]
    BrokenChain { from: TraceId, missing: TraceId },

    /// Following parent pointers from `from` came back to `at`.
    #[error("ancestor chain of `{from}` loops back to `{at}`")]
    CyclicChain { from: TraceId, at: TraceId },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TraceError {
    /// Domain errors are ordinary "not found" answers for the caller. Anything
    /// else is either bad input or a defect that should be logged.
    pub fn is_domain(&self) -> bool {
        matches!(self, TraceError::NotFound(_) | TraceError::ParentNotFound(_))
    }

    /// Broken or looping ancestor chains can only come from corrupted state.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            TraceError::BrokenChain { .. } | TraceError::CyclicChain { .. }
        )
    }
}

pub type TraceResult<T> = Result<T, TraceError>;
