//! Task lifecycle events and their translation into engine calls.
//!
//! The task tracker raises one event per lifecycle change. Each event maps
//! to exactly one engine operation; handlers log what failed and hand the
//! error back so the caller decides whether to keep going.

use crate::engine::TraceService;
use crate::error::{TraceError, TraceResult};
use crate::models::{TaskStatus, TraceId};
use crate::store::TraceStore;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::{debug, warn};

/// A task lifecycle change, as raised by the task tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    TaskCreated {
        task_id: String,
        #[serde(default)]
        parent_id: Option<String>,
    },
    TaskDeleted {
        task_id: String,
    },
    TaskRelationUpdated {
        task_id: String,
        #[serde(default)]
        old_parent_id: Option<String>,
        #[serde(default)]
        new_parent_id: Option<String>,
    },
    TaskStatusUpdated {
        task_id: String,
        status: String,
        at: DateTime<Utc>,
    },
    ActualSet {
        task_id: String,
        actual_secs: i64,
    },
    EstimateSet {
        task_id: String,
        estimated_secs: i64,
    },
}

impl TaskEvent {
    pub fn task_id(&self) -> &str {
        match self {
            TaskEvent::TaskCreated { task_id, .. }
            | TaskEvent::TaskDeleted { task_id }
            | TaskEvent::TaskRelationUpdated { task_id, .. }
            | TaskEvent::TaskStatusUpdated { task_id, .. }
            | TaskEvent::ActualSet { task_id, .. }
            | TaskEvent::EstimateSet { task_id, .. } => task_id,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            TaskEvent::TaskCreated { .. } => "create",
            TaskEvent::TaskDeleted { .. } => "delete",
            TaskEvent::TaskRelationUpdated { .. } => "update parent",
            TaskEvent::TaskStatusUpdated { .. } => "update status",
            TaskEvent::ActualSet { .. } => "set actual",
            TaskEvent::EstimateSet { .. } => "set estimate",
        }
    }
}

impl fmt::Display for TaskEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.task_id())
    }
}

/// What happened to a dispatched event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// The event carries no change for the engine.
    Skipped,
}

/// Route one event to the engine.
pub async fn dispatch<S: TraceStore>(
    service: &TraceService<S>,
    event: &TaskEvent,
) -> TraceResult<Outcome> {
    let result = apply(service, event).await;
    if let Err(e) = &result {
        warn!("Failed to {}: {}", event, e);
    }
    result
}

async fn apply<S: TraceStore>(
    service: &TraceService<S>,
    event: &TaskEvent,
) -> TraceResult<Outcome> {
    match event {
        TaskEvent::TaskCreated { task_id, parent_id } => {
            let parent = TraceId::parent(parent_id.as_deref())?;
            service.create_trace(TraceId::new(task_id.as_str())?, parent).await?;
        }
        TaskEvent::TaskDeleted { task_id } => {
            service.delete_trace(&TraceId::new(task_id.as_str())?).await?;
        }
        TaskEvent::TaskRelationUpdated {
            task_id,
            old_parent_id,
            new_parent_id,
        } => {
            let old_parent = TraceId::parent(old_parent_id.as_deref())?;
            let new_parent = TraceId::parent(new_parent_id.as_deref())?;
            if old_parent == new_parent {
                // Sibling reorders arrive as relation updates too.
                debug!("Relation update of {} keeps its parent", task_id);
                return Ok(Outcome::Skipped);
            }
            service
                .update_parent(&TraceId::new(task_id.as_str())?, new_parent)
                .await?;
        }
        TaskEvent::TaskStatusUpdated {
            task_id,
            status,
            at,
        } => {
            let status: TaskStatus = status.parse()?;
            service
                .update_status(&TraceId::new(task_id.as_str())?, status, *at)
                .await?;
        }
        TaskEvent::ActualSet {
            task_id,
            actual_secs,
        } => {
            let actual = seconds("actual", *actual_secs)?;
            service
                .set_actual(&TraceId::new(task_id.as_str())?, actual)
                .await?;
        }
        TaskEvent::EstimateSet {
            task_id,
            estimated_secs,
        } => {
            let estimated = seconds("estimated", *estimated_secs)?;
            service
                .set_estimated(&TraceId::new(task_id.as_str())?, estimated)
                .await?;
        }
    }

    Ok(Outcome::Applied)
}

fn seconds(field: &'static str, secs: i64) -> TraceResult<Duration> {
    Duration::try_seconds(secs).ok_or(TraceError::DurationOutOfRange { field, secs })
}

/// An ordered list of events read from a JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventScript {
    pub events: Vec<TaskEvent>,
}

impl EventScript {
    /// Load a script from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read event script: {}", path.display()))?;

        Self::parse(&content)
            .with_context(|| format!("Failed to parse event script: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use std::io::Write;
    use tokio_test::{assert_err, assert_ok};

    fn created(task: &str, parent: Option<&str>) -> TaskEvent {
        TaskEvent::TaskCreated {
            task_id: task.to_string(),
            parent_id: parent.map(String::from),
        }
    }

    fn trace_id(raw: &str) -> TraceId {
        TraceId::new(raw).unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_lifecycle() {
        let service = TraceService::new(MemoryStore::new());
        let at = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap();

        let events = vec![
            created("r", None),
            created("x", Some("r")),
            TaskEvent::TaskStatusUpdated {
                task_id: "x".to_string(),
                status: "doing".to_string(),
                at,
            },
            TaskEvent::TaskStatusUpdated {
                task_id: "x".to_string(),
                status: "done".to_string(),
                at: at + Duration::seconds(90),
            },
            TaskEvent::EstimateSet {
                task_id: "x".to_string(),
                estimated_secs: 120,
            },
        ];
        for event in &events {
            assert_eq!(assert_ok!(dispatch(&service, event).await), Outcome::Applied);
        }

        let root = service.get_trace(&trace_id("r")).await.unwrap();
        assert_eq!(root.actual(), Duration::seconds(90));
        let x = service.get_trace(&trace_id("x")).await.unwrap();
        assert_eq!(x.estimated(), Duration::seconds(120));

        let delete = TaskEvent::TaskDeleted {
            task_id: "x".to_string(),
        };
        assert_ok!(dispatch(&service, &delete).await);
        let root = service.get_trace(&trace_id("r")).await.unwrap();
        assert_eq!(root.actual(), Duration::zero());
    }

    #[tokio::test]
    async fn test_relation_update_with_same_parent_is_skipped() {
        let service = TraceService::new(MemoryStore::new());
        dispatch(&service, &created("r", None)).await.unwrap();
        dispatch(&service, &created("x", Some("r"))).await.unwrap();
        service.store().clear_journal().await;

        let reorder = TaskEvent::TaskRelationUpdated {
            task_id: "x".to_string(),
            old_parent_id: Some("r".to_string()),
            new_parent_id: Some("r".to_string()),
        };

        assert_eq!(dispatch(&service, &reorder).await.unwrap(), Outcome::Skipped);
        assert!(service.store().journal().await.is_empty());
    }

    #[tokio::test]
    async fn test_relation_update_to_root() {
        let service = TraceService::new(MemoryStore::new());
        dispatch(&service, &created("r", None)).await.unwrap();
        dispatch(&service, &created("x", Some("r"))).await.unwrap();

        let detach = TaskEvent::TaskRelationUpdated {
            task_id: "x".to_string(),
            old_parent_id: Some("r".to_string()),
            new_parent_id: Some(String::new()),
        };

        assert_ok!(dispatch(&service, &detach).await);
        assert!(service.get_trace(&trace_id("x")).await.unwrap().is_root());
    }

    #[tokio::test]
    async fn test_dispatch_rejects_bad_input() {
        let service = TraceService::new(MemoryStore::new());

        let err = assert_err!(dispatch(&service, &created("", None)).await);
        assert!(matches!(err, TraceError::InvalidId));

        dispatch(&service, &created("x", None)).await.unwrap();
        let bad_status = TaskEvent::TaskStatusUpdated {
            task_id: "x".to_string(),
            status: "paused".to_string(),
            at: Utc::now(),
        };
        let err = assert_err!(dispatch(&service, &bad_status).await);
        assert!(matches!(err, TraceError::InvalidStatus(_)));

        let err = assert_err!(dispatch(&service, &created("y", Some("nope"))).await);
        assert!(err.is_domain());
    }

    #[tokio::test]
    async fn test_out_of_range_seconds_are_rejected() {
        let service = TraceService::new(MemoryStore::new());
        dispatch(&service, &created("r", None)).await.unwrap();

        let script = EventScript::parse(
            r#"{"events": [
                {"type": "actual_set", "task_id": "r", "actual_secs": 9223372036854775807},
                {"type": "estimate_set", "task_id": "r", "estimated_secs": -9223372036854775808}
            ]}"#,
        )
        .unwrap();

        let err = assert_err!(dispatch(&service, &script.events[0]).await);
        assert!(matches!(
            err,
            TraceError::DurationOutOfRange { field: "actual", secs: i64::MAX }
        ));
        let err = assert_err!(dispatch(&service, &script.events[1]).await);
        assert!(matches!(
            err,
            TraceError::DurationOutOfRange { field: "estimated", .. }
        ));

        let root = service.get_trace(&trace_id("r")).await.unwrap();
        assert_eq!(root.actual(), Duration::zero());
        assert_eq!(root.estimated(), Duration::zero());
    }

    #[test]
    fn test_parse_script() {
        let script = EventScript::parse(
            r#"{
                "events": [
                    {"type": "task_created", "task_id": "r"},
                    {"type": "task_created", "task_id": "a", "parent_id": "r"},
                    {"type": "actual_set", "task_id": "a", "actual_secs": 30},
                    {"type": "task_status_updated", "task_id": "a", "status": "doing",
                     "at": "2026-05-01T12:00:00Z"},
                    {"type": "task_relation_updated", "task_id": "a",
                     "old_parent_id": "r", "new_parent_id": null}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(script.events.len(), 5);
        assert_eq!(script.events[0], created("r", None));
        assert_eq!(script.events[2].to_string(), "set actual a");
    }

    #[test]
    fn test_load_script_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"events": [{{"type": "task_deleted", "task_id": "gone"}}]}}"#
        )
        .unwrap();

        let script = EventScript::load(file.path()).unwrap();
        assert_eq!(script.events.len(), 1);
        assert_eq!(script.events[0].task_id(), "gone");
    }

    #[tokio::test]
    async fn test_replay_sprint_fixture() {
        let script = EventScript::parse(include_str!("../fixtures/sprint.json")).unwrap();
        let service = TraceService::new(MemoryStore::new());

        let mut outcomes = Vec::new();
        for event in &script.events {
            outcomes.push(dispatch(&service, event).await);
        }

        let skipped = outcomes
            .iter()
            .filter(|o| matches!(o, Ok(Outcome::Skipped)))
            .count();
        assert_eq!(skipped, 1);
        let failed: Vec<_> = outcomes.iter().filter_map(|o| o.as_ref().err()).collect();
        assert_eq!(failed.len(), 1);
        assert!(matches!(failed[0], TraceError::NotFound(_)));

        let expected = [("project", 100), ("design", 90), ("build", 10), ("api", 60)];
        for (raw, minutes) in expected {
            let trace = service.get_trace(&trace_id(raw)).await.unwrap();
            assert_eq!(trace.actual(), Duration::minutes(minutes), "{}", raw);
        }

        let snapshot = service.store().snapshot().await;
        assert_eq!(snapshot.len(), 4);
        assert!(crate::analysis::audit(&snapshot).is_clean());
    }

    #[test]
    fn test_load_script_missing_file() {
        let err = EventScript::load(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read event script"));
    }
}
