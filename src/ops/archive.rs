//! Archival of old completed tasks into the append-only archive log.
//!
//! A task leaves the live set only together with its whole subtree: a
//! parent is never archived away from a live child and vice versa, which
//! keeps the parent/subtask invariant intact.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use crate::error::{CoreError, Result};
use crate::model::{numeric_suffix, Event, EventKind, Task, TaskStatus};
use crate::store::Snapshot;

use super::ArchiveReport;

pub fn archive_done(
    snap: &mut Snapshot,
    now: DateTime<Utc>,
    days_old: i64,
    dry_run: bool,
) -> ArchiveReport {
    let cutoff = now - Duration::days(days_old);

    let mut eligible: BTreeSet<String> = snap
        .tasks
        .values()
        .filter(|t| t.status == TaskStatus::Done && t.updated_at < cutoff)
        .map(|t| t.id.clone())
        .collect();

    // Shrink to a closed set: drop tasks whose live relatives stay behind.
    loop {
        let to_drop: Vec<String> = eligible
            .iter()
            .filter(|id| {
                let task = &snap.tasks[id.as_str()];
                let children_leave = task
                    .subtasks
                    .iter()
                    .all(|s| !snap.tasks.contains_key(s) || eligible.contains(s));
                let parent_leaves = task
                    .parent_id
                    .as_ref()
                    .map_or(true, |p| !snap.tasks.contains_key(p) || eligible.contains(p));
                !(children_leave && parent_leaves)
            })
            .cloned()
            .collect();
        if to_drop.is_empty() {
            break;
        }
        for id in to_drop {
            eligible.remove(&id);
        }
    }

    let tasks: Vec<Task> = eligible
        .iter()
        .filter_map(|id| snap.tasks.get(id).cloned())
        .collect();

    if dry_run || tasks.is_empty() {
        return ArchiveReport {
            archived: tasks.len(),
            tasks,
            dry_run,
        };
    }

    for id in &eligible {
        snap.tasks.remove(id);
    }
    snap.dirty.tasks = true;
    snap.queue_archive(tasks.clone());
    snap.record(Event::new(
        now,
        EventKind::TasksArchived,
        "system",
        json!({ "count": tasks.len(), "days_old": days_old }),
    ));

    ArchiveReport {
        archived: tasks.len(),
        tasks,
        dry_run: false,
    }
}

/// Return an archived task to the live set as `open`. Severed links are
/// repaired: a vanished parent is forgotten, stale subtask references are
/// dropped.
pub fn restore_task(
    snap: &mut Snapshot,
    mut task: Task,
    session_id: &str,
    now: DateTime<Utc>,
) -> Result<Task> {
    if snap.tasks.contains_key(&task.id) {
        return Err(CoreError::Conflict(format!(
            "task id '{}' is already in use by a live task",
            task.id
        )));
    }

    task.status = TaskStatus::Open;
    task.assignee = None;

    if let Some(parent_id) = task.parent_id.clone() {
        match snap.tasks.get_mut(&parent_id) {
            Some(parent) => {
                if !parent.subtasks.contains(&task.id) {
                    parent.subtasks.push(task.id.clone());
                    parent.updated_at = now;
                }
            }
            None => {
                task.parent_id = None;
                task.is_subtask = false;
            }
        }
    }
    let task_id = task.id.clone();
    task.subtasks.retain(|sid| {
        snap.tasks
            .get(sid)
            .map_or(false, |c| c.parent_id.as_deref() == Some(task_id.as_str()))
    });

    task.push_note(session_id, "Restored from archive", now);
    task.updated_at = now;

    if let Some(n) = numeric_suffix(&task.id) {
        if n >= snap.next_id {
            snap.next_id = n + 1;
        }
    }
    snap.dirty.tasks = true;
    snap.tasks.insert(task.id.clone(), task.clone());
    snap.record(Event::new(
        now,
        EventKind::TaskRestored,
        session_id,
        json!({ "task_id": task.id }),
    ));
    Ok(task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::tasks::create_task;
    use crate::ops::NewTask;

    fn done_task(snap: &mut Snapshot, title: &str, age_days: i64) -> String {
        let task = create_task(
            snap,
            Utc::now(),
            "s",
            NewTask {
                title: title.to_string(),
                ..NewTask::default()
            },
        )
        .unwrap();
        let t = snap.tasks.get_mut(&task.id).unwrap();
        t.status = TaskStatus::Done;
        t.updated_at = Utc::now() - Duration::days(age_days);
        task.id
    }

    #[test]
    fn archives_old_done_tasks_only() {
        let mut snap = Snapshot::empty();
        let old = done_task(&mut snap, "old", 40);
        let recent = done_task(&mut snap, "recent", 5);
        let open = create_task(
            &mut snap,
            Utc::now(),
            "s",
            NewTask {
                title: "open".to_string(),
                ..NewTask::default()
            },
        )
        .unwrap()
        .id;

        let report = archive_done(&mut snap, Utc::now(), 30, false);
        assert_eq!(report.archived, 1);
        assert_eq!(report.tasks[0].id, old);
        assert!(snap.tasks.contains_key(&recent));
        assert!(snap.tasks.contains_key(&open));
        assert!(!snap.tasks.contains_key(&old));
        snap.validate().unwrap();
    }

    #[test]
    fn dry_run_changes_nothing() {
        let mut snap = Snapshot::empty();
        done_task(&mut snap, "old", 40);
        let report = archive_done(&mut snap, Utc::now(), 30, true);
        assert_eq!(report.archived, 1);
        assert!(report.dry_run);
        assert_eq!(snap.tasks.len(), 1);
    }

    #[test]
    fn parent_stays_while_child_is_live() {
        let mut snap = Snapshot::empty();
        let parent_id = done_task(&mut snap, "parent", 40);
        snap.tasks.get_mut(&parent_id).unwrap().updated_at = Utc::now() - Duration::days(40);
        let child = create_task(
            &mut snap,
            Utc::now(),
            "s",
            NewTask {
                title: "child".to_string(),
                parent_id: Some(parent_id.clone()),
                ..NewTask::default()
            },
        )
        .unwrap();

        let report = archive_done(&mut snap, Utc::now(), 30, false);
        assert_eq!(report.archived, 0);
        assert!(snap.tasks.contains_key(&parent_id));
        assert!(snap.tasks.contains_key(&child.id));
        snap.validate().unwrap();
    }

    #[test]
    fn restore_raises_the_id_counter() {
        let mut snap = Snapshot::empty();
        let archived = Task::new("task-090", "from the vault", Utc::now());
        let restored = restore_task(&mut snap, archived, "s", Utc::now()).unwrap();
        assert_eq!(restored.status, TaskStatus::Open);
        assert_eq!(snap.next_id, 91);
        snap.validate().unwrap();
    }
}
