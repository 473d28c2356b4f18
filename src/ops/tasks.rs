//! Task lifecycle operations: create, claim, complete, reopen, edit,
//! delete, notes, subtask views.

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::config::CoreConfig;
use crate::error::{CoreError, Result};
use crate::model::{
    format_task_id, normalize_labels, validate_priority, Event, EventKind, Task, TaskStatus,
    UndoHint, DEFAULT_PRIORITY,
};
use crate::scheduler;
use crate::store::{find_blocked_by_cycle, Snapshot};

use super::sessions;
use super::{BulkFailure, BulkReport, CompleteRequest, DeleteReport, NewTask, SubtaskProgress, TaskPatch};

/// Create a task (or subtask, when `parent_id` is set). The id comes from
/// the store counter, incremented inside the same transaction.
pub fn create_task(
    snap: &mut Snapshot,
    now: DateTime<Utc>,
    session_id: &str,
    req: NewTask,
) -> Result<Task> {
    let title = req.title.trim().to_string();
    if title.is_empty() {
        return Err(CoreError::InvalidArgument(
            "title must not be empty".to_string(),
        ));
    }
    let mut priority = validate_priority(req.priority.unwrap_or(DEFAULT_PRIORITY))?;
    let mut labels = normalize_labels(&req.labels);
    let mut branch = req.branch.clone();

    let parent = match &req.parent_id {
        Some(parent_id) => Some(snap.task(parent_id)?.clone()),
        None => None,
    };
    if let Some(parent) = &parent {
        if req.priority.is_none() {
            priority = parent.priority;
        }
        if req.labels.is_empty() {
            labels = parent.labels.clone();
        }
        if branch.is_none() {
            branch = parent.branch.clone();
        }
    }

    let id = format_task_id(snap.next_id);
    snap.next_id += 1;

    let mut task = Task::new(&id, title, now);
    task.description = req.description;
    task.priority = priority;
    task.labels = labels;
    task.blocked_by = req.blocked_by;
    task.branch = branch;

    let kind = match &parent {
        Some(parent) => {
            task.parent_id = Some(parent.id.clone());
            task.is_subtask = true;
            task.push_note(session_id, format!("Created as subtask of {}", parent.id), now);
            EventKind::SubtaskCreated
        }
        None => {
            task.push_note(session_id, "Created task", now);
            EventKind::TaskCreated
        }
    };

    snap.dirty.tasks = true;
    snap.tasks.insert(id.clone(), task.clone());

    if let Some(parent) = &parent {
        let parent = snap.task_mut(&parent.id)?;
        parent.subtasks.push(id.clone());
        parent.updated_at = now;
    }

    snap.record(Event::new(
        now,
        kind,
        session_id,
        json!({ "task_id": id, "title": task.title, "parent_id": task.parent_id }),
    ));
    Ok(task)
}

/// The critical claim operation: find the next ready task for the session
/// and mark it `in_progress` in the same mutation. Callers hold the store
/// lock (single mode) or the coordinator lock (parallel mode), which is
/// what makes concurrent claims race-free.
pub fn claim_next(
    snap: &mut Snapshot,
    now: DateTime<Utc>,
    session_id: &str,
    preferred_labels: &[String],
    cfg: &CoreConfig,
) -> Result<Option<Task>> {
    sessions::require_live(snap, session_id, now, cfg.cleanup_threshold)?;

    let preferred = normalize_labels(preferred_labels);
    let session = snap.session(session_id)?.clone();
    let picked = scheduler::pick(&snap.tasks, &session, &preferred, cfg.max_concurrent)
        .map(|t| t.id.clone());
    let task_id = match picked {
        Some(id) => id,
        None => return Ok(None),
    };

    {
        let task = snap.task_mut(&task_id)?;
        task.status = TaskStatus::InProgress;
        task.assignee = Some(session_id.to_string());
        task.push_note(session_id, "Claimed task", now);
        task.updated_at = now;
    }
    snap.session_mut(session_id)?.working_on = Some(task_id.clone());

    snap.record(Event::new(
        now,
        EventKind::TaskClaimed,
        session_id,
        json!({ "task_id": task_id }),
    ));
    Ok(Some(snap.task(&task_id)?.clone()))
}

pub fn complete_task(
    snap: &mut Snapshot,
    now: DateTime<Utc>,
    session_id: &str,
    req: &CompleteRequest,
    cfg: &CoreConfig,
) -> Result<Task> {
    sessions::check_not_stale(snap, session_id, now, cfg.cleanup_threshold)?;

    // All checks happen before any mutation so bulk callers can treat a
    // failure as a clean skip.
    let (previous_status, previous_assignee, previous_branch, previous_updated_at) = {
        let task = snap.task(&req.task_id)?;
        if task.status == TaskStatus::Done {
            return Err(CoreError::Conflict(format!(
                "task '{}' is already done",
                req.task_id
            )));
        }
        if let Some(owner) = &task.assignee {
            if owner != session_id && !req.force {
                return Err(CoreError::Conflict(format!(
                    "task '{}' is claimed by session '{owner}'",
                    req.task_id
                )));
            }
        }
        let incomplete = task
            .subtasks
            .iter()
            .filter(|sid| {
                snap.tasks
                    .get(*sid)
                    .map_or(false, |s| s.status != TaskStatus::Done)
            })
            .count();
        if incomplete > 0 && !req.force {
            return Err(CoreError::Conflict(format!(
                "task '{}' has {incomplete} incomplete subtask(s)",
                req.task_id
            )));
        }
        (
            task.status,
            task.assignee.clone(),
            task.branch.clone(),
            task.updated_at,
        )
    };

    let note_text = req.note.as_deref().filter(|n| !n.trim().is_empty());
    {
        let task = snap.task_mut(&req.task_id)?;
        task.status = TaskStatus::Done;
        task.assignee = None;
        if let Some(branch) = &req.branch {
            task.branch = Some(branch.clone());
        }
        if let Some(note) = note_text {
            task.push_note(session_id, format!("Completed: {note}"), now);
        }
        task.updated_at = now;
    }
    release_working_on(snap, &req.task_id);
    sessions::touch(snap, session_id, now);

    snap.record(
        Event::new(
            now,
            EventKind::TaskCompleted,
            session_id,
            json!({ "task_id": req.task_id, "note": req.note }),
        )
        .with_undo(UndoHint::Complete {
            task_id: req.task_id.clone(),
            previous_status,
            previous_assignee,
            previous_branch,
            previous_updated_at,
            note_added: note_text.is_some(),
        }),
    );

    if cfg.auto_complete_parent {
        maybe_complete_parent(snap, now, &req.task_id);
    }

    Ok(snap.task(&req.task_id)?.clone())
}

/// When the toggle is on and the last open sibling finishes, the parent
/// completes as well, as its own history event.
fn maybe_complete_parent(snap: &mut Snapshot, now: DateTime<Utc>, child_id: &str) {
    let parent_id = match snap.tasks.get(child_id).and_then(|t| t.parent_id.clone()) {
        Some(id) => id,
        None => return,
    };
    let (all_done, previous) = match snap.tasks.get(&parent_id) {
        Some(parent) if parent.status != TaskStatus::Done => {
            let all_done = parent.subtasks.iter().all(|sid| {
                snap.tasks
                    .get(sid)
                    .map_or(true, |s| s.status == TaskStatus::Done)
            });
            (
                all_done,
                (
                    parent.status,
                    parent.assignee.clone(),
                    parent.branch.clone(),
                    parent.updated_at,
                ),
            )
        }
        _ => return,
    };
    if !all_done {
        return;
    }

    let task = match snap.task_mut(&parent_id) {
        Ok(task) => task,
        Err(_) => return,
    };
    task.status = TaskStatus::Done;
    task.assignee = None;
    task.push_note("system", "All subtasks complete", now);
    task.updated_at = now;
    release_working_on(snap, &parent_id);

    snap.record(
        Event::new(
            now,
            EventKind::TaskCompleted,
            "system",
            json!({ "task_id": parent_id, "auto": true }),
        )
        .with_undo(UndoHint::Complete {
            task_id: parent_id.clone(),
            previous_status: previous.0,
            previous_assignee: previous.1,
            previous_branch: previous.2,
            previous_updated_at: previous.3,
            note_added: true,
        }),
    );
}

/// Reopen a done or blocked task: back to `open`, unassigned, branch
/// cleared. The completion timestamp survives only in history.
pub fn reopen_task(
    snap: &mut Snapshot,
    now: DateTime<Utc>,
    session_id: &str,
    task_id: &str,
    note: Option<&str>,
) -> Result<Task> {
    let (previous_status, previous_branch, previous_updated_at) = {
        let task = snap.task(task_id)?;
        match task.status {
            TaskStatus::Open => {
                return Err(CoreError::Conflict(format!(
                    "task '{task_id}' is already open"
                )))
            }
            TaskStatus::InProgress => {
                return Err(CoreError::Conflict(format!(
                    "task '{task_id}' is in progress; release or complete it first"
                )))
            }
            TaskStatus::Done | TaskStatus::Blocked => {}
        }
        (task.status, task.branch.clone(), task.updated_at)
    };

    let task = snap.task_mut(task_id)?;
    task.status = TaskStatus::Open;
    task.assignee = None;
    task.branch = None;
    let mut text = format!("Reopened (was {previous_status})");
    if let Some(note) = note.filter(|n| !n.trim().is_empty()) {
        text.push_str(": ");
        text.push_str(note);
    }
    task.push_note(session_id, text, now);
    task.updated_at = now;

    snap.record(
        Event::new(
            now,
            EventKind::TaskReopened,
            session_id,
            json!({ "task_id": task_id, "note": note }),
        )
        .with_undo(UndoHint::Reopen {
            task_id: task_id.to_string(),
            previous_status,
            previous_branch,
            previous_updated_at,
        }),
    );
    Ok(snap.task(task_id)?.clone())
}

pub fn bulk_complete(
    snap: &mut Snapshot,
    now: DateTime<Utc>,
    session_id: &str,
    task_ids: &[String],
    note: Option<String>,
    branch: Option<String>,
    force: bool,
    cfg: &CoreConfig,
) -> BulkReport {
    let mut report = BulkReport::default();
    for task_id in task_ids {
        let req = CompleteRequest {
            task_id: task_id.clone(),
            note: note.clone(),
            branch: branch.clone(),
            force,
        };
        match complete_task(snap, now, session_id, &req, cfg) {
            Ok(_) => report.succeeded.push(task_id.clone()),
            Err(e) => report.failed.push(BulkFailure {
                id: task_id.clone(),
                kind: e.kind().to_string(),
                error: e.to_string(),
            }),
        }
    }
    report
}

pub fn bulk_reopen(
    snap: &mut Snapshot,
    now: DateTime<Utc>,
    session_id: &str,
    task_ids: &[String],
    note: Option<&str>,
) -> BulkReport {
    let mut report = BulkReport::default();
    for task_id in task_ids {
        match reopen_task(snap, now, session_id, task_id, note) {
            Ok(_) => report.succeeded.push(task_id.clone()),
            Err(e) => report.failed.push(BulkFailure {
                id: task_id.clone(),
                kind: e.kind().to_string(),
                error: e.to_string(),
            }),
        }
    }
    report
}

/// Apply a field patch. Status may only toggle between open and blocked
/// here; the lifecycle transitions have their own operations. Returns the
/// unchanged task (and records nothing) when the patch is a no-op.
pub fn edit_task(
    snap: &mut Snapshot,
    now: DateTime<Utc>,
    session_id: &str,
    task_id: &str,
    patch: &TaskPatch,
) -> Result<Task> {
    let current = snap.task(task_id)?.clone();

    let new_title = match &patch.title {
        Some(title) => {
            let title = title.trim();
            if title.is_empty() {
                return Err(CoreError::InvalidArgument(
                    "title must not be empty".to_string(),
                ));
            }
            if title != current.title {
                Some(title.to_string())
            } else {
                None
            }
        }
        None => None,
    };
    let new_description = patch
        .description
        .clone()
        .filter(|d| *d != current.description);
    let new_priority = match patch.priority {
        Some(p) => {
            validate_priority(p)?;
            (p != current.priority).then_some(p)
        }
        None => None,
    };
    let new_labels = patch
        .labels
        .as_ref()
        .map(|l| normalize_labels(l))
        .filter(|l| *l != current.labels);
    let new_blocked_by = patch
        .blocked_by
        .clone()
        .filter(|b| *b != current.blocked_by);
    let new_status = match &patch.status {
        Some(raw) => {
            let status = TaskStatus::parse(raw)?;
            if status == current.status {
                None
            } else {
                match (current.status, status) {
                    (TaskStatus::Open, TaskStatus::Blocked)
                    | (TaskStatus::Blocked, TaskStatus::Open) => Some(status),
                    _ => {
                        return Err(CoreError::Conflict(format!(
                            "status can only toggle between open and blocked via edit \
                             (task '{task_id}' is {})",
                            current.status
                        )))
                    }
                }
            }
        }
        None => None,
    };

    let mut changes: Vec<&'static str> = Vec::new();
    let mut previous_title = None;
    let mut previous_description = None;
    let mut previous_priority = None;
    let mut previous_labels = None;
    let mut previous_blocked_by = None;
    let mut previous_status = None;

    {
        let task = snap.task_mut(task_id)?;
        if let Some(title) = new_title {
            previous_title = Some(std::mem::replace(&mut task.title, title));
            changes.push("title");
        }
        if let Some(description) = new_description {
            previous_description = Some(std::mem::replace(&mut task.description, description));
            changes.push("description");
        }
        if let Some(priority) = new_priority {
            previous_priority = Some(std::mem::replace(&mut task.priority, priority));
            changes.push("priority");
        }
        if let Some(labels) = new_labels {
            previous_labels = Some(std::mem::replace(&mut task.labels, labels));
            changes.push("labels");
        }
        if let Some(blocked_by) = new_blocked_by {
            previous_blocked_by = Some(std::mem::replace(&mut task.blocked_by, blocked_by));
            changes.push("blocked_by");
        }
        if let Some(status) = new_status {
            previous_status = Some(std::mem::replace(&mut task.status, status));
            changes.push("status");
        }

        if changes.is_empty() {
            return Ok(current);
        }
        task.push_note(session_id, format!("Edited: {}", changes.join(", ")), now);
        task.updated_at = now;
    }

    if previous_blocked_by.is_some() {
        if let Some(in_cycle) = find_blocked_by_cycle(&snap.tasks) {
            return Err(CoreError::Conflict(format!(
                "edit would introduce a blocked_by cycle through '{in_cycle}'"
            )));
        }
    }

    snap.record(
        Event::new(
            now,
            EventKind::TaskEdited,
            session_id,
            json!({ "task_id": task_id, "changes": changes }),
        )
        .with_undo(UndoHint::Edit {
            task_id: task_id.to_string(),
            previous_title,
            previous_description,
            previous_priority,
            previous_labels,
            previous_blocked_by,
            previous_status,
            previous_updated_at: current.updated_at,
        }),
    );
    Ok(snap.task(task_id)?.clone())
}

/// Delete a task. With subtasks this requires `force`, which removes the
/// whole subtree; the pre-image travels in the undo hint.
pub fn delete_task(
    snap: &mut Snapshot,
    now: DateTime<Utc>,
    session_id: &str,
    task_id: &str,
    force: bool,
) -> Result<DeleteReport> {
    let task = snap.task(task_id)?.clone();
    if !task.subtasks.is_empty() && !force {
        return Err(CoreError::Conflict(format!(
            "task '{task_id}' has {} subtask(s); pass force to delete them too",
            task.subtasks.len()
        )));
    }

    let mut descendants: Vec<Task> = Vec::new();
    let mut stack = task.subtasks.clone();
    while let Some(id) = stack.pop() {
        if let Some(sub) = snap.tasks.get(&id) {
            stack.extend(sub.subtasks.iter().cloned());
            descendants.push(sub.clone());
        }
    }

    if let Some(parent_id) = &task.parent_id {
        if snap.tasks.contains_key(parent_id) {
            let parent = snap.task_mut(parent_id)?;
            parent.subtasks.retain(|s| s != task_id);
            parent.updated_at = now;
        }
    }

    snap.dirty.tasks = true;
    snap.tasks.remove(task_id);
    release_working_on(snap, task_id);
    let deleted_subtasks: Vec<String> = descendants.iter().map(|t| t.id.clone()).collect();
    for id in &deleted_subtasks {
        snap.tasks.remove(id);
        release_working_on(snap, id);
    }

    snap.record(
        Event::new(
            now,
            EventKind::TaskDeleted,
            session_id,
            json!({ "task_id": task_id, "deleted_subtasks": deleted_subtasks }),
        )
        .with_undo(UndoHint::Delete {
            task: Box::new(task.clone()),
            subtasks: descendants,
            parent_id: task.parent_id.clone(),
        }),
    );
    Ok(DeleteReport { deleted_subtasks })
}

pub fn add_note(
    snap: &mut Snapshot,
    now: DateTime<Utc>,
    session_id: &str,
    task_id: &str,
    note: &str,
) -> Result<()> {
    if note.trim().is_empty() {
        return Err(CoreError::InvalidArgument(
            "note must not be empty".to_string(),
        ));
    }
    let task = snap.task_mut(task_id)?;
    task.push_note(session_id, note, now);
    task.updated_at = now;
    snap.record(Event::new(
        now,
        EventKind::NoteAdded,
        session_id,
        json!({ "task_id": task_id }),
    ));
    Ok(())
}

pub fn subtask_progress(snap: &Snapshot, parent_id: &str) -> Result<SubtaskProgress> {
    let task = snap.task(parent_id)?;
    let total = task.subtasks.len();
    if total == 0 {
        return Ok(SubtaskProgress {
            done: 0,
            total: 0,
            percentage: 100,
        });
    }
    let done = task
        .subtasks
        .iter()
        .filter(|sid| {
            snap.tasks
                .get(*sid)
                .map_or(false, |s| s.status == TaskStatus::Done)
        })
        .count();
    Ok(SubtaskProgress {
        done,
        total,
        percentage: ((done as f64 / total as f64) * 100.0).round() as u32,
    })
}

pub fn subtasks_of(snap: &Snapshot, parent_id: &str) -> Result<Vec<Task>> {
    let task = snap.task(parent_id)?;
    Ok(task
        .subtasks
        .iter()
        .filter_map(|sid| snap.tasks.get(sid).cloned())
        .collect())
}

/// Clear `working_on` on whichever session points at the task.
fn release_working_on(snap: &mut Snapshot, task_id: &str) {
    let holders: Vec<String> = snap
        .sessions
        .values()
        .filter(|s| s.working_on.as_deref() == Some(task_id))
        .map(|s| s.session_id.clone())
        .collect();
    for session_id in holders {
        if let Some(session) = snap.sessions.get_mut(&session_id) {
            session.working_on = None;
            snap.dirty.sessions = true;
        }
    }
}
