use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::{Task, TaskStatus};

/// History log entry. One is appended to `history.jsonl` for every
/// committed mutation, in total order. Reversible operations carry an
/// [`UndoHint`] with the pre-image needed to invert them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub undo_hint: Option<UndoHint>,
}

impl Event {
    pub fn new(
        now: DateTime<Utc>,
        kind: EventKind,
        session_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            timestamp: now,
            kind,
            session_id: session_id.into(),
            payload,
            undo_hint: None,
        }
    }

    pub fn with_undo(mut self, hint: UndoHint) -> Self {
        self.undo_hint = Some(hint);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TaskCreated,
    SubtaskCreated,
    TaskClaimed,
    TaskCompleted,
    TaskReopened,
    TaskEdited,
    TaskDeleted,
    NoteAdded,
    TimerStarted,
    TimerStopped,
    TimerPaused,
    SessionRegistered,
    SessionEnded,
    SessionReclaimed,
    TemplateCreated,
    TemplateDeleted,
    TasksArchived,
    TaskRestored,
    ActionUndone,
}

/// Pre-image captured with a reversible event: exactly the fields the
/// operation overwrote, sufficient to restore the prior entity state.
/// Irreversible operations (claims, reclaims, archival flushes) carry none.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum UndoHint {
    Complete {
        task_id: String,
        previous_status: TaskStatus,
        previous_assignee: Option<String>,
        previous_branch: Option<String>,
        previous_updated_at: DateTime<Utc>,
        note_added: bool,
    },
    Reopen {
        task_id: String,
        previous_status: TaskStatus,
        previous_branch: Option<String>,
        previous_updated_at: DateTime<Utc>,
    },
    Edit {
        task_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous_title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous_description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous_priority: Option<u8>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous_labels: Option<BTreeSet<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous_blocked_by: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous_status: Option<TaskStatus>,
        previous_updated_at: DateTime<Utc>,
    },
    Delete {
        task: Box<Task>,
        #[serde(default)]
        subtasks: Vec<Task>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_id: Option<String>,
    },
}
