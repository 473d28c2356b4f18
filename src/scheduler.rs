//! Pure task selection: no I/O, no clock, referentially transparent.
//!
//! Given the same snapshot and session, `pick` returns the same task, which
//! lets the tests assert exact ordering without fixtures.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::collections::BTreeSet;

use tracing::warn;

use crate::model::{Session, Task, TaskStatus};

/// A task is ready when it is open, unassigned, and every task it is
/// blocked by has reached `done`. References to tasks that no longer exist
/// are treated as satisfied so a deleted blocker can never gate forever.
pub fn is_ready(task: &Task, tasks: &BTreeMap<String, Task>) -> bool {
    if task.status != TaskStatus::Open || task.assignee.is_some() {
        return false;
    }
    for blocker_id in &task.blocked_by {
        match tasks.get(blocker_id) {
            Some(blocker) => {
                if blocker.status != TaskStatus::Done {
                    return false;
                }
            }
            None => {
                warn!(
                    task_id = %task.id,
                    blocker_id = %blocker_id,
                    "blocked_by references a missing task; treating as satisfied"
                );
            }
        }
    }
    true
}

/// Cardinality of the intersection of task labels with the session's
/// interests.
pub fn affinity(task: &Task, interests: &BTreeSet<String>) -> usize {
    task.labels.iter().filter(|l| interests.contains(*l)).count()
}

/// Pick the next task for `session`: the minimum of the ready set under
/// `(−affinity, priority, created_at, id)`. Returns `None` when nothing is
/// ready or the session already holds `max_concurrent` claims.
pub fn pick<'a>(
    tasks: &'a BTreeMap<String, Task>,
    session: &Session,
    preferred_labels: &BTreeSet<String>,
    max_concurrent: usize,
) -> Option<&'a Task> {
    let held = tasks
        .values()
        .filter(|t| t.assignee.as_deref() == Some(session.session_id.as_str()))
        .count();
    if held >= max_concurrent {
        return None;
    }

    let interests: BTreeSet<String> = session
        .labels
        .union(preferred_labels)
        .cloned()
        .collect();

    tasks
        .values()
        .filter(|t| is_ready(t, tasks))
        .min_by(|a, b| rank(a, &interests).cmp(&rank(b, &interests)))
}

fn rank<'a>(
    task: &'a Task,
    interests: &BTreeSet<String>,
) -> (
    Reverse<usize>,
    u8,
    chrono::DateTime<chrono::Utc>,
    &'a str,
) {
    (
        Reverse(affinity(task, interests)),
        task.priority,
        task.created_at,
        task.id.as_str(),
    )
}
