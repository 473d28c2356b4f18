//! The shared semantic layer: every state mutation as a function over the
//! in-memory snapshot, emitting exactly one history event per mutation.
//!
//! Single mode runs these inside a [`crate::store::Store::transaction`];
//! parallel mode runs them inside the coordinator's lock. Because both
//! modes execute the same functions, every operation returns the same
//! shape and fails with the same error kinds either way.

pub mod archive;
pub mod sessions;
pub mod tasks;
pub mod templates;
pub mod timers;
pub mod undo;

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{staleness, Note, Session, SessionRole, Staleness, Task, TaskStatus};
use crate::scheduler;
use crate::store::Snapshot;

// ─── Request shapes ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub blocked_by: Vec<String>,
    #[serde(default)]
    pub branch: Option<String>,
    /// When set, the new task is created as a subtask of this parent and
    /// inherits priority, labels, and branch unless given explicitly.
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompleteRequest {
    pub task_id: String,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub labels: Option<Vec<String>>,
    #[serde(default)]
    pub blocked_by: Option<Vec<String>>,
    /// Only the open ↔ blocked toggle is legal through edit.
    #[serde(default)]
    pub status: Option<String>,
}

// ─── Report shapes ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<BulkFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkFailure {
    pub id: String,
    pub kind: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteReport {
    pub deleted_subtasks: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskProgress {
    pub done: usize,
    pub total: usize,
    pub percentage: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTime {
    pub total_seconds: u64,
    pub is_running: bool,
    pub is_paused: bool,
    pub current_elapsed_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndoReport {
    pub action: String,
    pub task_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchiveReport {
    pub archived: usize,
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    #[serde(default)]
    pub mode: String,
    pub total_tasks: usize,
    pub tasks_by_status: BTreeMap<String, usize>,
    pub ready_tasks: usize,
    pub active_sessions: usize,
    pub sessions: Vec<SessionStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub role: SessionRole,
    pub context: String,
    pub labels: BTreeSet<String>,
    pub working_on: Option<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub staleness: Staleness,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParallelSummary {
    pub total_completed: usize,
    pub branches: BTreeMap<String, Vec<BranchTask>>,
    pub branches_to_merge: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchTask {
    pub id: String,
    pub title: String,
    pub notes: Vec<Note>,
}

// ─── Read-only views ─────────────────────────────────────────────────────────

pub fn list_tasks(snap: &Snapshot, status: Option<TaskStatus>) -> Vec<Task> {
    snap.tasks
        .values()
        .filter(|t| status.map_or(true, |s| t.status == s))
        .cloned()
        .collect()
}

pub fn status_report(snap: &Snapshot, now: DateTime<Utc>) -> StatusReport {
    let mut tasks_by_status: BTreeMap<String, usize> = BTreeMap::new();
    let mut ready_tasks = 0;
    for task in snap.tasks.values() {
        *tasks_by_status
            .entry(task.status.as_str().to_string())
            .or_default() += 1;
        if scheduler::is_ready(task, &snap.tasks) {
            ready_tasks += 1;
        }
    }

    let sessions: Vec<SessionStatus> = snap
        .sessions
        .values()
        .map(|s| session_status(s, now))
        .collect();

    StatusReport {
        mode: String::new(),
        total_tasks: snap.tasks.len(),
        tasks_by_status,
        ready_tasks,
        active_sessions: sessions.len(),
        sessions,
    }
}

fn session_status(session: &Session, now: DateTime<Utc>) -> SessionStatus {
    SessionStatus {
        session_id: session.session_id.clone(),
        role: session.role,
        context: session.context.clone(),
        labels: session.labels.clone(),
        working_on: session.working_on.clone(),
        last_heartbeat: session.last_heartbeat,
        staleness: staleness(session.last_heartbeat, now),
    }
}

/// Completed tasks grouped by branch, for the merge phase.
pub fn parallel_summary(snap: &Snapshot) -> ParallelSummary {
    let mut branches: BTreeMap<String, Vec<BranchTask>> = BTreeMap::new();
    let mut total_completed = 0;
    for task in snap.tasks.values() {
        if task.status != TaskStatus::Done {
            continue;
        }
        total_completed += 1;
        let branch = task.branch.clone().unwrap_or_else(|| "main".to_string());
        let last_notes = task
            .notes
            .iter()
            .rev()
            .take(3)
            .rev()
            .cloned()
            .collect();
        branches.entry(branch).or_default().push(BranchTask {
            id: task.id.clone(),
            title: task.title.clone(),
            notes: last_notes,
        });
    }
    let branches_to_merge = branches.keys().filter(|b| *b != "main").cloned().collect();
    ParallelSummary {
        total_completed,
        branches,
        branches_to_merge,
    }
}
