//! Forest audit and statistics.
//!
//! Works on a plain snapshot of nodes, independent of the store, and reports
//! anything that breaks the rollup: negative exclusive time, dangling parent
//! pointers, parent loops.

use crate::models::{duration_millis, Trace, TraceId};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Something wrong with a node in the forest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// The children account for more time than the node itself.
    NegativeExclusive {
        id: TraceId,
        #[serde(with = "duration_millis")]
        exclusive: Duration,
    },
    NegativeActual {
        id: TraceId,
        #[serde(with = "duration_millis")]
        actual: Duration,
    },
    DanglingParent { id: TraceId, parent: TraceId },
    ParentLoop { id: TraceId },
}

impl Violation {
    pub fn id(&self) -> &TraceId {
        match self {
            Violation::NegativeExclusive { id, .. }
            | Violation::NegativeActual { id, .. }
            | Violation::DanglingParent { id, .. }
            | Violation::ParentLoop { id } => id,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Violation::NegativeExclusive { id, exclusive } => format!(
                "{}: children exceed node total by {}ms",
                id,
                -exclusive.num_milliseconds()
            ),
            Violation::NegativeActual { id, actual } => {
                format!("{}: negative total {}ms", id, actual.num_milliseconds())
            }
            Violation::DanglingParent { id, parent } => {
                format!("{}: parent {} does not exist", id, parent)
            }
            Violation::ParentLoop { id } => format!("{}: parent chain loops", id),
        }
    }
}

/// Result of auditing a forest snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditReport {
    pub node_count: usize,
    pub root_count: usize,
    pub max_depth: usize,
    /// Sum of root totals: all time recorded anywhere in the forest.
    #[serde(with = "duration_millis")]
    pub total_actual: Duration,
    /// Sum of every node's own estimate.
    #[serde(with = "duration_millis")]
    pub total_estimated: Duration,
    pub running_timers: Vec<TraceId>,
    pub violations: Vec<Violation>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Time attributed to each node itself, keyed by id.
pub fn exclusive_times(traces: &[Trace]) -> HashMap<TraceId, Duration> {
    let mut exclusive: HashMap<TraceId, Duration> = traces
        .iter()
        .map(|t| (t.id().clone(), t.actual()))
        .collect();

    for trace in traces {
        if let Some(parent) = trace.parent_id() {
            if let Some(total) = exclusive.get_mut(parent) {
                *total = saturating_add(*total, -trace.actual());
            }
        }
    }

    exclusive
}

/// Nodes in depth-first order with their depth; roots and siblings sorted by
/// id. Nodes unreachable from a root (dangling or looping) are left out.
pub fn depth_first(traces: &[Trace]) -> Vec<(usize, &Trace)> {
    let mut children: BTreeMap<Option<&TraceId>, Vec<&Trace>> = BTreeMap::new();
    for trace in traces {
        children.entry(trace.parent_id()).or_default().push(trace);
    }
    for siblings in children.values_mut() {
        siblings.sort_by(|a, b| a.id().cmp(b.id()));
    }

    let mut ordered = Vec::with_capacity(traces.len());
    let mut stack: Vec<(usize, &Trace)> = children
        .get(&None)
        .map(|roots| roots.iter().rev().map(|t| (0, *t)).collect())
        .unwrap_or_default();

    while let Some((depth, trace)) = stack.pop() {
        ordered.push((depth, trace));
        if let Some(kids) = children.get(&Some(trace.id())) {
            stack.extend(kids.iter().rev().map(|t| (depth + 1, *t)));
        }
    }

    ordered
}

/// Audit a forest snapshot.
pub fn audit(traces: &[Trace]) -> AuditReport {
    let by_id: HashMap<&TraceId, &Trace> = traces.iter().map(|t| (t.id(), t)).collect();
    let exclusive = exclusive_times(traces);
    let mut report = AuditReport {
        node_count: traces.len(),
        ..AuditReport::default()
    };

    for trace in traces {
        report.total_estimated = saturating_add(report.total_estimated, trace.estimated());

        if trace.started_at().is_some() {
            report.running_timers.push(trace.id().clone());
        }

        if trace.actual() < Duration::zero() {
            report.violations.push(Violation::NegativeActual {
                id: trace.id().clone(),
                actual: trace.actual(),
            });
        }

        if let Some(&own) = exclusive.get(trace.id()) {
            if own < Duration::zero() {
                report.violations.push(Violation::NegativeExclusive {
                    id: trace.id().clone(),
                    exclusive: own,
                });
            }
        }

        match walk_to_root(trace, &by_id) {
            Ok(depth) => {
                if depth == 0 {
                    report.root_count += 1;
                    report.total_actual = saturating_add(report.total_actual, trace.actual());
                }
                report.max_depth = report.max_depth.max(depth);
            }
            Err(violation) => report.violations.push(violation),
        }
    }

    report.running_timers.sort();
    report
}

/// Addition that clamps at the bounds of `Duration`.
fn saturating_add(a: Duration, b: Duration) -> Duration {
    a.checked_add(&b).unwrap_or_else(|| {
        if b < Duration::zero() {
            Duration::min_value()
        } else {
            Duration::max_value()
        }
    })
}

/// Depth of `trace` below its root, or the reason the chain never gets there.
fn walk_to_root(trace: &Trace, by_id: &HashMap<&TraceId, &Trace>) -> Result<usize, Violation> {
    let mut seen = HashSet::new();
    let mut depth = 0;
    let mut current = trace;

    while let Some(parent_id) = current.parent_id() {
        if !seen.insert(current.id()) {
            return Err(Violation::ParentLoop {
                id: trace.id().clone(),
            });
        }
        let Some(&parent) = by_id.get(parent_id) else {
            return Err(Violation::DanglingParent {
                id: current.id().clone(),
                parent: parent_id.clone(),
            });
        };
        current = parent;
        depth += 1;
    }

    Ok(depth)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> TraceId {
        TraceId::new(raw).unwrap()
    }

    fn node(raw: &str, parent: Option<&str>, actual: i64) -> Trace {
        Trace::new(id(raw), parent.map(id)).with_actual(Duration::seconds(actual))
    }

    fn forest() -> Vec<Trace> {
        vec![
            node("r", None, 15),
            node("a", Some("r"), 10),
            node("b", Some("r"), 5),
            node("a1", Some("a"), 10),
            node("solo", None, 2),
        ]
    }

    #[test]
    fn test_exclusive_times() {
        let exclusive = exclusive_times(&forest());

        assert_eq!(exclusive[&id("r")], Duration::zero());
        assert_eq!(exclusive[&id("a")], Duration::zero());
        assert_eq!(exclusive[&id("a1")], Duration::seconds(10));
        assert_eq!(exclusive[&id("solo")], Duration::seconds(2));
    }

    #[test]
    fn test_audit_clean_forest() {
        let report = audit(&forest());

        assert!(report.is_clean());
        assert_eq!(report.node_count, 5);
        assert_eq!(report.root_count, 2);
        assert_eq!(report.max_depth, 2);
        assert_eq!(report.total_actual, Duration::seconds(17));
        assert!(report.running_timers.is_empty());
    }

    #[test]
    fn test_audit_totals_clamp_at_duration_bounds() {
        let huge = i64::MAX / 1000 - 1;
        let traces = vec![node("r1", None, huge), node("r2", None, huge)];

        let report = audit(&traces);

        assert_eq!(report.root_count, 2);
        assert_eq!(report.total_actual, Duration::max_value());
        assert!(report.is_clean());
    }

    #[test]
    fn test_audit_negative_exclusive() {
        let traces = vec![node("r", None, 3), node("a", Some("r"), 5)];

        let report = audit(&traces);

        assert_eq!(
            report.violations,
            vec![Violation::NegativeExclusive {
                id: id("r"),
                exclusive: Duration::seconds(-2),
            }]
        );
        assert!(report.violations[0].describe().contains("2000ms"));
    }

    #[test]
    fn test_audit_dangling_and_loops() {
        let traces = vec![
            node("orphan", Some("gone"), 0),
            node("x", Some("y"), 0),
            node("y", Some("x"), 0),
        ];

        let report = audit(&traces);

        assert_eq!(report.root_count, 0);
        assert!(report
            .violations
            .contains(&Violation::DanglingParent { id: id("orphan"), parent: id("gone") }));
        assert_eq!(
            report
                .violations
                .iter()
                .filter(|v| matches!(v, Violation::ParentLoop { .. }))
                .count(),
            2
        );
    }

    #[test]
    fn test_depth_first_order() {
        let traces = forest();
        let order: Vec<(usize, &str)> = depth_first(&traces)
            .into_iter()
            .map(|(depth, t)| (depth, t.id().as_str()))
            .collect();

        assert_eq!(
            order,
            vec![(0, "r"), (1, "a"), (2, "a1"), (1, "b"), (0, "solo")]
        );
    }
}
