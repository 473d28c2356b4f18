//! Undo over the event history.
//!
//! The history log doubles as the undo substrate: each reversible event
//! carries the pre-image it overwrote. Undoing applies the inverse and
//! appends a compensating `action_undone` event; nothing is ever truncated.
//! Scanning from the tail, every compensating event consumes one earlier
//! reversible event, so repeated undos walk backwards like a stack.

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::error::{CoreError, Result};
use crate::model::{Event, EventKind, UndoHint};
use crate::store::Snapshot;

use super::UndoReport;

pub fn undo_last(
    snap: &mut Snapshot,
    history: &[Event],
    session_id: &str,
    now: DateTime<Utc>,
) -> Result<UndoReport> {
    let mut compensations = 0usize;
    let mut target: Option<&Event> = None;
    for event in history.iter().rev() {
        if event.kind == EventKind::ActionUndone {
            compensations += 1;
            continue;
        }
        if event.undo_hint.is_some() {
            if compensations > 0 {
                compensations -= 1;
                continue;
            }
            target = Some(event);
            break;
        }
    }

    let event = target.ok_or_else(|| {
        CoreError::Conflict("nothing to undo: no reversible action in history".to_string())
    })?;
    let hint = match &event.undo_hint {
        Some(hint) => hint.clone(),
        None => {
            return Err(CoreError::Conflict(
                "nothing to undo: no reversible action in history".to_string(),
            ))
        }
    };

    let report = match hint {
        UndoHint::Complete {
            task_id,
            previous_status,
            previous_assignee,
            previous_branch,
            previous_updated_at,
            note_added,
        } => {
            {
                let task = snap.task_mut(&task_id).map_err(undo_gone)?;
                task.status = previous_status;
                task.assignee = previous_assignee.clone();
                task.branch = previous_branch;
                task.updated_at = previous_updated_at;
                if note_added {
                    task.notes.pop();
                }
            }
            if let Some(owner) = previous_assignee {
                if let Some(session) = snap.sessions.get_mut(&owner) {
                    session.working_on = Some(task_id.clone());
                    snap.dirty.sessions = true;
                }
            }
            UndoReport {
                action: "undo_complete".to_string(),
                task_id,
            }
        }
        UndoHint::Reopen {
            task_id,
            previous_status,
            previous_branch,
            previous_updated_at,
        } => {
            let task = snap.task_mut(&task_id).map_err(undo_gone)?;
            task.status = previous_status;
            task.branch = previous_branch;
            task.updated_at = previous_updated_at;
            task.notes.pop();
            UndoReport {
                action: "undo_reopen".to_string(),
                task_id,
            }
        }
        UndoHint::Edit {
            task_id,
            previous_title,
            previous_description,
            previous_priority,
            previous_labels,
            previous_blocked_by,
            previous_status,
            previous_updated_at,
        } => {
            let task = snap.task_mut(&task_id).map_err(undo_gone)?;
            if let Some(title) = previous_title {
                task.title = title;
            }
            if let Some(description) = previous_description {
                task.description = description;
            }
            if let Some(priority) = previous_priority {
                task.priority = priority;
            }
            if let Some(labels) = previous_labels {
                task.labels = labels;
            }
            if let Some(blocked_by) = previous_blocked_by {
                task.blocked_by = blocked_by;
            }
            if let Some(status) = previous_status {
                task.status = status;
            }
            task.updated_at = previous_updated_at;
            task.notes.pop();
            UndoReport {
                action: "undo_edit".to_string(),
                task_id,
            }
        }
        UndoHint::Delete {
            task,
            subtasks,
            parent_id,
        } => {
            let task_id = task.id.clone();
            if snap.tasks.contains_key(&task_id) {
                return Err(CoreError::Conflict(format!(
                    "cannot undo delete: id '{task_id}' is in use again"
                )));
            }
            let mut task = *task;
            match parent_id.as_deref().map(|p| snap.tasks.contains_key(p)) {
                Some(true) => {
                    let parent_id = parent_id.as_deref().unwrap_or_default().to_string();
                    let parent = snap.task_mut(&parent_id)?;
                    if !parent.subtasks.contains(&task_id) {
                        parent.subtasks.push(task_id.clone());
                        parent.updated_at = now;
                    }
                }
                Some(false) => {
                    task.parent_id = None;
                    task.is_subtask = false;
                }
                None => {}
            }
            snap.dirty.tasks = true;
            snap.tasks.insert(task_id.clone(), task);
            for sub in subtasks {
                snap.tasks.insert(sub.id.clone(), sub);
            }
            UndoReport {
                action: "undo_delete".to_string(),
                task_id,
            }
        }
    };

    snap.record(Event::new(
        now,
        EventKind::ActionUndone,
        session_id,
        json!({ "original": event.kind, "task_id": report.task_id }),
    ));
    Ok(report)
}

fn undo_gone(err: CoreError) -> CoreError {
    match err {
        CoreError::NotFound(msg) => CoreError::Conflict(format!("cannot undo: {msg}")),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::model::{SessionRole, TaskStatus};
    use crate::ops::sessions::register;
    use crate::ops::tasks::{complete_task, create_task, delete_task, edit_task};
    use crate::ops::{CompleteRequest, NewTask, TaskPatch};

    fn fixture() -> (Snapshot, CoreConfig) {
        let mut snap = Snapshot::empty();
        register(
            &mut snap,
            Utc::now(),
            "w1",
            SessionRole::Worker,
            String::new(),
            vec![],
        );
        (snap, CoreConfig::new("/tmp/unused"))
    }

    #[test]
    fn nothing_to_undo_is_a_conflict() {
        let (mut snap, _) = fixture();
        let err = undo_last(&mut snap, &[], "w1", Utc::now()).unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[test]
    fn undo_complete_restores_prior_state_and_removes_note() {
        let (mut snap, cfg) = fixture();
        let task = create_task(
            &mut snap,
            Utc::now(),
            "w1",
            NewTask {
                title: "t".into(),
                ..NewTask::default()
            },
        )
        .unwrap();
        let before = snap.tasks[&task.id].clone();

        complete_task(
            &mut snap,
            Utc::now(),
            "w1",
            &CompleteRequest {
                task_id: task.id.clone(),
                note: Some("x".into()),
                ..CompleteRequest::default()
            },
            &cfg,
        )
        .unwrap();

        let history = snap.take_events();
        let report = undo_last(&mut snap, &history, "w1", Utc::now()).unwrap();
        assert_eq!(report.action, "undo_complete");

        let restored = &snap.tasks[&task.id];
        assert_eq!(restored, &before);
        assert!(!restored.notes.iter().any(|n| n.note.contains("x")));
        snap.validate().unwrap();
    }

    #[test]
    fn undo_edit_is_identity() {
        let (mut snap, _) = fixture();
        let task = create_task(
            &mut snap,
            Utc::now(),
            "w1",
            NewTask {
                title: "original".into(),
                ..NewTask::default()
            },
        )
        .unwrap();
        let before = snap.tasks[&task.id].clone();

        edit_task(
            &mut snap,
            Utc::now(),
            "w1",
            &task.id,
            &TaskPatch {
                title: Some("renamed".into()),
                priority: Some(0),
                ..TaskPatch::default()
            },
        )
        .unwrap();

        let history = snap.take_events();
        undo_last(&mut snap, &history, "w1", Utc::now()).unwrap();
        assert_eq!(&snap.tasks[&task.id], &before);
    }

    #[test]
    fn undo_delete_restores_the_subtree() {
        let (mut snap, _) = fixture();
        let parent = create_task(
            &mut snap,
            Utc::now(),
            "w1",
            NewTask {
                title: "parent".into(),
                ..NewTask::default()
            },
        )
        .unwrap();
        let child = create_task(
            &mut snap,
            Utc::now(),
            "w1",
            NewTask {
                title: "child".into(),
                parent_id: Some(parent.id.clone()),
                ..NewTask::default()
            },
        )
        .unwrap();

        delete_task(&mut snap, Utc::now(), "w1", &parent.id, true).unwrap();
        assert!(snap.tasks.is_empty());

        let history = snap.take_events();
        let report = undo_last(&mut snap, &history, "w1", Utc::now()).unwrap();
        assert_eq!(report.action, "undo_delete");
        assert!(snap.tasks.contains_key(&parent.id));
        assert!(snap.tasks.contains_key(&child.id));
        snap.validate().unwrap();
    }

    #[test]
    fn repeated_undo_walks_backwards() {
        let (mut snap, cfg) = fixture();
        let a = create_task(
            &mut snap,
            Utc::now(),
            "w1",
            NewTask {
                title: "a".into(),
                ..NewTask::default()
            },
        )
        .unwrap();
        let b = create_task(
            &mut snap,
            Utc::now(),
            "w1",
            NewTask {
                title: "b".into(),
                ..NewTask::default()
            },
        )
        .unwrap();
        for id in [&a.id, &b.id] {
            complete_task(
                &mut snap,
                Utc::now(),
                "w1",
                &CompleteRequest {
                    task_id: id.clone(),
                    ..CompleteRequest::default()
                },
                &cfg,
            )
            .unwrap();
        }

        let mut history = snap.take_events();
        // First undo reverts b (the most recent completion).
        let first = undo_last(&mut snap, &history, "w1", Utc::now()).unwrap();
        assert_eq!(first.task_id, b.id);
        history.append(&mut snap.take_events());

        // Second undo skips past the compensation and reverts a.
        let second = undo_last(&mut snap, &history, "w1", Utc::now()).unwrap();
        assert_eq!(second.task_id, a.id);
        assert_eq!(snap.tasks[&a.id].status, TaskStatus::Open);
        assert_eq!(snap.tasks[&b.id].status, TaskStatus::Open);
    }
}
