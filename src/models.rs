//! Data models for the trace engine.
//!
//! This module contains the core data structures shared by the engine,
//! the record store and the report: trace identifiers, trace nodes,
//! task statuses and the read models handed back to callers.

use crate::error::{TraceError, TraceResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a trace node (one per tracked task).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TraceId(String);

impl TraceId {
    /// Create an identifier, rejecting the empty string.
    pub fn new(raw: impl Into<String>) -> Result<Self, TraceError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(TraceError::InvalidId);
        }
        Ok(Self(raw))
    }

    /// Parse an optional parent reference where the empty string means "root".
    pub fn parent(raw: Option<&str>) -> Result<Option<Self>, TraceError> {
        match raw {
            None | Some("") => Ok(None),
            Some(raw) => Self::new(raw).map(Some),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TraceId {
    type Error = TraceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TraceId> for String {
    fn from(id: TraceId) -> Self {
        id.0
    }
}

/// Status of the task a trace belongs to.
///
/// Only `Doing` runs a timer; every other status stops it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Todo,
    Doing,
    Done,
}

impl TaskStatus {
    pub fn is_in_progress(&self) -> bool {
        matches!(self, TaskStatus::Doing)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Todo => write!(f, "todo"),
            TaskStatus::Doing => write!(f, "doing"),
            TaskStatus::Done => write!(f, "done"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = TraceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "todo" => Ok(TaskStatus::Todo),
            "doing" => Ok(TaskStatus::Doing),
            "done" => Ok(TaskStatus::Done),
            other => Err(TraceError::InvalidStatus(other.to_string())),
        }
    }
}

/// Timer dimension of a trace node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Stopped,
    Running { since: DateTime<Utc> },
}

/// One aggregation node in the trace forest.
///
/// `actual` is the rolled-up total of the whole subtree rooted here. Nodes
/// are treated as values: the `with_*` methods return an updated copy and
/// leave the original untouched, so a batch of changes is only visible once
/// the store commits it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    id: TraceId,
    parent_id: Option<TraceId>,
    #[serde(with = "duration_millis")]
    estimated: Duration,
    #[serde(with = "duration_millis")]
    actual: Duration,
    started_at: Option<DateTime<Utc>>,
}

impl Trace {
    /// A fresh node: zero durations, timer stopped.
    pub fn new(id: TraceId, parent_id: Option<TraceId>) -> Self {
        Self {
            id,
            parent_id,
            estimated: Duration::zero(),
            actual: Duration::zero(),
            started_at: None,
        }
    }

    pub fn id(&self) -> &TraceId {
        &self.id
    }

    pub fn parent_id(&self) -> Option<&TraceId> {
        self.parent_id.as_ref()
    }

    pub fn estimated(&self) -> Duration {
        self.estimated
    }

    pub fn actual(&self) -> Duration {
        self.actual
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn timer(&self) -> TimerState {
        match self.started_at {
            Some(since) => TimerState::Running { since },
            None => TimerState::Stopped,
        }
    }

    pub fn with_parent(&self, parent_id: Option<TraceId>) -> Self {
        Self {
            parent_id,
            ..self.clone()
        }
    }

    pub fn with_estimated(&self, estimated: Duration) -> Self {
        Self {
            estimated,
            ..self.clone()
        }
    }

    pub fn with_actual(&self, actual: Duration) -> Self {
        Self {
            actual,
            ..self.clone()
        }
    }

    /// Shift `actual` by a signed delta, failing if the total would leave
    /// the range of `chrono::Duration`.
    pub fn with_actual_delta(&self, delta: Duration) -> TraceResult<Self> {
        self.actual
            .checked_add(&delta)
            .map(|actual| self.with_actual(actual))
            .ok_or_else(|| TraceError::DurationOverflow {
                id: self.id.clone(),
            })
    }

    pub fn with_started_at(&self, started_at: Option<DateTime<Utc>>) -> Self {
        Self {
            started_at,
            ..self.clone()
        }
    }
}

/// What `list_traces` exposes for a node. The parent pointer stays internal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceView {
    pub id: TraceId,
    #[serde(with = "duration_millis")]
    pub estimated: Duration,
    #[serde(with = "duration_millis")]
    pub actual: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

impl From<&Trace> for TraceView {
    fn from(trace: &Trace) -> Self {
        Self {
            id: trace.id.clone(),
            estimated: trace.estimated,
            actual: trace.actual,
            started_at: trace.started_at,
        }
    }
}

/// Serialize a signed duration as whole milliseconds.
pub mod duration_millis {
    use chrono::Duration;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(duration.num_milliseconds())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = i64::deserialize(deserializer)?;
        Duration::try_milliseconds(millis)
            .ok_or_else(|| D::Error::custom(format!("{}ms is out of range", millis)))
    }
}

/// Render a duration as `1h 02m 03s`, keeping the sign.
pub fn format_duration(duration: Duration) -> String {
    let sign = if duration < Duration::zero() { "-" } else { "" };
    let total = duration.num_seconds().abs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);

    if hours > 0 {
        format!("{}{}h {:02}m {:02}s", sign, hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}{}m {:02}s", sign, minutes, seconds)
    } else {
        format!("{}{}s", sign, seconds)
    }
}

/// Metadata about a replay report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Path of the replayed event script.
    pub script: String,
    /// Date and time the report was generated.
    pub generated_at: DateTime<Utc>,
    /// Events that were applied successfully.
    pub events_applied: usize,
    /// Events the engine rejected.
    pub events_failed: usize,
    /// Wall-clock duration of the replay in seconds.
    pub duration_seconds: f64,
}

/// A node as it appears in the report, with its derived exclusive time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportNode {
    pub id: TraceId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<TraceId>,
    pub depth: usize,
    #[serde(with = "duration_millis")]
    pub estimated: Duration,
    #[serde(with = "duration_millis")]
    pub actual: Duration,
    #[serde(with = "duration_millis")]
    pub exclusive: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

/// The complete forest report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub metadata: ReportMetadata,
    /// Nodes in depth-first order, roots sorted by id.
    pub nodes: Vec<ReportNode>,
    pub audit: crate::analysis::AuditReport,
    /// Messages from events the engine rejected.
    pub failures: Vec<String>,
}
