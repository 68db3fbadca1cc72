//! Ancestor walks and the path arithmetic used by reparenting.

use crate::error::{StoreError, TraceError, TraceResult};
use crate::models::{Trace, TraceId};
use crate::store::TraceStore;
use chrono::Duration;
use std::collections::HashSet;
use tracing::{debug, error};

/// Collect the ancestor chain starting at `start` and ending at its root,
/// returned root-first (index 0 is the root, the last entry is `start`).
///
/// `from` names the node whose chain is being walked and is only used for
/// error reporting. A pointer to a node the store does not have, or a chain
/// that loops, means the forest is corrupt; both are reported as invariant
/// violations rather than ordinary lookups that missed.
pub async fn find_ancestors<S>(
    store: &S,
    from: &TraceId,
    start: Option<&TraceId>,
) -> TraceResult<Vec<Trace>>
where
    S: TraceStore + ?Sized,
{
    let mut path = Vec::new();
    let mut seen = HashSet::new();
    let mut next = start.cloned();

    while let Some(id) = next {
        if !seen.insert(id.clone()) {
            error!("Ancestor chain of {} loops back to {}", from, id);
            return Err(TraceError::CyclicChain {
                from: from.clone(),
                at: id,
            });
        }

        let parent = match store.get(&id).await {
            Ok(parent) => parent,
            Err(StoreError::NotFound(missing)) => {
                error!(
                    "Ancestor chain of {} is broken: {} does not exist",
                    from, missing
                );
                return Err(TraceError::BrokenChain {
                    from: from.clone(),
                    missing,
                });
            }
            Err(e) => return Err(e.into()),
        };

        next = parent.parent_id().cloned();
        path.push(parent);
    }

    path.reverse();
    debug!("Walked {} ancestors of {}", path.len(), from);
    Ok(path)
}

/// First index at which two root-first paths name different nodes.
///
/// Everything below the returned index is shared by both paths. When one
/// path is a prefix of the other, the shorter length is returned.
pub fn divergence_index(old_path: &[Trace], new_path: &[Trace]) -> usize {
    old_path
        .iter()
        .zip(new_path)
        .take_while(|(old, new)| old.id() == new.id())
        .count()
}

/// Time attributed to `node` itself: its total minus its children's totals.
pub fn exclusive_time(node: &Trace, children: &[Trace]) -> TraceResult<Duration> {
    children.iter().try_fold(node.actual(), |acc, child| {
        acc.checked_sub(&child.actual())
            .ok_or_else(|| TraceError::DurationOverflow {
                id: node.id().clone(),
            })
    })
}
