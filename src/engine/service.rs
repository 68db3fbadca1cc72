//! Trace lifecycle operations.
//!
//! Every operation reads what it needs (the node, its ancestor chain, maybe
//! its children), computes the new values in memory and hands them to the
//! store as one batch. Nothing here locks; callers that may race on the same
//! tree must serialize access or run inside a store transaction.

use super::ancestry::{divergence_index, exclusive_time, find_ancestors};
use crate::error::{StoreError, TraceError, TraceResult};
use crate::models::{TaskStatus, Trace, TraceId, TraceView};
use crate::store::{TraceStore, WriteBatch};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// How much time leaves the old ancestors when a node is reparented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReparentWeight {
    /// Only the node's exclusive time moves; its children's totals stay
    /// with the old ancestors.
    #[default]
    Exclusive,
    /// The node's whole `actual` moves with it.
    Subtree,
}

/// Engine tuning knobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineOptions {
    pub reparent_weight: ReparentWeight,
}

/// The aggregation engine, generic over its record store.
pub struct TraceService<S> {
    store: S,
    options: EngineOptions,
}

impl<S: TraceStore> TraceService<S> {
    pub fn new(store: S) -> Self {
        Self::with_options(store, EngineOptions::default())
    }

    pub fn with_options(store: S, options: EngineOptions) -> Self {
        Self { store, options }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn options(&self) -> EngineOptions {
        self.options
    }

    /// Start tracking a task. New nodes carry no time, so ancestors are
    /// left alone.
    pub async fn create_trace(&self, id: TraceId, parent_id: Option<TraceId>) -> TraceResult<()> {
        if let Some(parent) = &parent_id {
            self.fetch_parent(parent).await?;
        }

        let trace = Trace::new(id, parent_id);
        self.store.create(trace.clone()).await?;

        info!(
            "Created trace {} (parent: {})",
            trace.id(),
            trace.parent_id().map_or("-", |p| p.as_str())
        );
        Ok(())
    }

    /// Remove a node and take its total out of every ancestor.
    ///
    /// The node is assumed to be a leaf; callers delete children first.
    pub async fn delete_trace(&self, id: &TraceId) -> TraceResult<()> {
        let trace = self.fetch(id).await?;
        let ancestors = find_ancestors(&self.store, id, trace.parent_id()).await?;

        let mut batch = ancestors
            .iter()
            .map(|ancestor| ancestor.with_actual_delta(-trace.actual()))
            .collect::<TraceResult<WriteBatch>>()?;
        batch.delete(id.clone());

        self.store.apply(batch).await?;

        info!(
            "Deleted trace {} ({} ancestors adjusted by -{}ms)",
            id,
            ancestors.len(),
            trace.actual().num_milliseconds()
        );
        Ok(())
    }

    /// Overwrite a node's `actual` and shift every ancestor by the change.
    pub async fn set_actual(&self, id: &TraceId, actual: Duration) -> TraceResult<()> {
        ensure_non_negative("actual", actual)?;

        let trace = self.fetch(id).await?;
        let diff = actual
            .checked_sub(&trace.actual())
            .ok_or_else(|| TraceError::DurationOverflow { id: id.clone() })?;
        if diff == Duration::zero() {
            debug!("Actual of {} unchanged, nothing to write", id);
            return Ok(());
        }

        let ancestors = find_ancestors(&self.store, id, trace.parent_id()).await?;

        let mut batch = WriteBatch::new();
        batch.put(trace.with_actual(actual));
        for ancestor in &ancestors {
            batch.put(ancestor.with_actual_delta(diff)?);
        }

        self.store.apply(batch).await?;

        info!(
            "Set actual of {} to {}ms ({} ancestors shifted by {}ms)",
            id,
            actual.num_milliseconds(),
            ancestors.len(),
            diff.num_milliseconds()
        );
        Ok(())
    }

    /// Set a node's planned duration. Estimates are not rolled up.
    pub async fn set_estimated(&self, id: &TraceId, estimated: Duration) -> TraceResult<()> {
        ensure_non_negative("estimated", estimated)?;

        let trace = self.fetch(id).await?;
        self.store
            .batch_update(vec![trace.with_estimated(estimated)])
            .await?;

        info!("Set estimate of {} to {}ms", id, estimated.num_milliseconds());
        Ok(())
    }

    /// React to a task status change: entering `doing` starts the timer,
    /// leaving it commits the elapsed time.
    pub async fn update_status(
        &self,
        id: &TraceId,
        status: TaskStatus,
        now: DateTime<Utc>,
    ) -> TraceResult<()> {
        let trace = self.fetch(id).await?;

        if status.is_in_progress() {
            self.start_timer(trace, now).await
        } else {
            self.stop_timer(trace, now).await
        }
    }

    /// Move a node under a new parent (or make it a root).
    ///
    /// Only the ancestors past the point where the old and new root paths
    /// diverge change: the old suffix loses the moved time, the new suffix
    /// gains it, and shared ancestors see no difference.
    pub async fn update_parent(
        &self,
        id: &TraceId,
        new_parent_id: Option<TraceId>,
    ) -> TraceResult<()> {
        let trace = self.fetch(id).await?;

        if trace.parent_id() == new_parent_id.as_ref() {
            debug!("Trace {} already under requested parent", id);
            return Ok(());
        }

        let new_path = match &new_parent_id {
            Some(parent) => {
                self.fetch_parent(parent).await?;
                let path = find_ancestors(&self.store, id, Some(parent)).await?;
                if path.iter().any(|ancestor| ancestor.id() == id) {
                    return Err(TraceError::CycleDetected {
                        id: id.clone(),
                        parent: parent.clone(),
                    });
                }
                path
            }
            None => Vec::new(),
        };

        let score = self.reparent_score(&trace).await?;

        let mut batch = WriteBatch::new();
        batch.put(trace.with_parent(new_parent_id.clone()));

        if score > Duration::zero() {
            let old_path = find_ancestors(&self.store, id, trace.parent_id()).await?;
            let pivot = divergence_index(&old_path, &new_path);

            debug!(
                "Reparenting {}: pivot {} of old depth {} / new depth {}",
                id,
                pivot,
                old_path.len(),
                new_path.len()
            );

            for ancestor in &old_path[pivot..] {
                batch.put(ancestor.with_actual_delta(-score)?);
            }
            for ancestor in &new_path[pivot..] {
                batch.put(ancestor.with_actual_delta(score)?);
            }
        }

        let writes = batch.len();
        self.store.apply(batch).await?;

        info!(
            "Moved trace {} under {} ({}ms moved, {} writes)",
            id,
            new_parent_id.as_ref().map_or("-", |p| p.as_str()),
            score.num_milliseconds().max(0),
            writes
        );
        Ok(())
    }

    /// Fetch a single node, parent pointer included.
    pub async fn get_trace(&self, id: &TraceId) -> TraceResult<Trace> {
        self.fetch(id).await
    }

    /// Batch read. Unknown ids are skipped; order is not guaranteed.
    pub async fn list_traces(&self, ids: &[TraceId]) -> TraceResult<Vec<TraceView>> {
        let traces = self.store.list_by_ids(ids).await?;
        Ok(traces.iter().map(TraceView::from).collect())
    }

    async fn start_timer(&self, trace: Trace, now: DateTime<Utc>) -> TraceResult<()> {
        if trace.started_at().is_some() {
            debug!("Timer of {} already running", trace.id());
            return Ok(());
        }

        // Running timers do not touch aggregates until they stop.
        self.store
            .batch_update(vec![trace.with_started_at(Some(now))])
            .await?;

        info!("Started timer of {} at {}", trace.id(), now);
        Ok(())
    }

    /// Commit the elapsed time to the node and every ancestor. Only this
    /// node's timer is cleared; a timer running on an ancestor keeps running
    /// and commits its own time when it stops.
    async fn stop_timer(&self, trace: Trace, now: DateTime<Utc>) -> TraceResult<()> {
        let Some(started_at) = trace.started_at() else {
            debug!("Timer of {} already stopped", trace.id());
            return Ok(());
        };

        let mut elapsed = now - started_at;
        if elapsed < Duration::zero() {
            warn!(
                "Timer of {} stopped at {} before it started at {}; committing nothing",
                trace.id(),
                now,
                started_at
            );
            elapsed = Duration::zero();
        }

        let ancestors = find_ancestors(&self.store, trace.id(), trace.parent_id()).await?;

        let mut batch = ancestors
            .iter()
            .map(|ancestor| ancestor.with_actual_delta(elapsed))
            .collect::<TraceResult<WriteBatch>>()?;
        batch.put(trace.with_actual_delta(elapsed)?.with_started_at(None));

        self.store.apply(batch).await?;

        info!(
            "Stopped timer of {} after {}ms ({} ancestors updated)",
            trace.id(),
            elapsed.num_milliseconds(),
            ancestors.len()
        );
        Ok(())
    }

    async fn reparent_score(&self, trace: &Trace) -> TraceResult<Duration> {
        match self.options.reparent_weight {
            ReparentWeight::Subtree => Ok(trace.actual()),
            ReparentWeight::Exclusive => {
                let children = self.store.list_children(trace.id()).await?;
                exclusive_time(trace, &children)
            }
        }
    }

    async fn fetch(&self, id: &TraceId) -> TraceResult<Trace> {
        match self.store.get(id).await {
            Ok(trace) => Ok(trace),
            Err(StoreError::NotFound(_)) => Err(TraceError::NotFound(id.clone())),
            Err(e) => Err(e.into()),
        }
    }

    async fn fetch_parent(&self, id: &TraceId) -> TraceResult<Trace> {
        match self.store.get(id).await {
            Ok(trace) => Ok(trace),
            Err(StoreError::NotFound(_)) => Err(TraceError::ParentNotFound(id.clone())),
            Err(e) => Err(e.into()),
        }
    }
}

fn ensure_non_negative(field: &'static str, value: Duration) -> TraceResult<()> {
    if value < Duration::zero() {
        return Err(TraceError::InvalidDuration {
            field,
            millis: value.num_milliseconds(),
        });
    }
    Ok(())
}
