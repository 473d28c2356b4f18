use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::MAX_NOTES_PER_TASK;
use crate::error::{CoreError, Result};

pub const DEFAULT_PRIORITY: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    InProgress,
    Done,
    Blocked,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Open => "open",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
            TaskStatus::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "open" => Ok(TaskStatus::Open),
            "in_progress" => Ok(TaskStatus::InProgress),
            "done" => Ok(TaskStatus::Done),
            "blocked" => Ok(TaskStatus::Blocked),
            other => Err(CoreError::InvalidArgument(format!(
                "unknown status '{other}'"
            ))),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub note: String,
}

/// Timer state for a task. `is_running` and `is_paused` are mutually
/// exclusive; a running timer always carries `started_at`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeTracking {
    #[serde(default)]
    pub total_seconds: u64,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_running: bool,
    #[serde(default)]
    pub is_paused: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub blocked_by: Vec<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub is_subtask: bool,
    #[serde(default)]
    pub subtasks: Vec<String>,
    #[serde(default)]
    pub notes: Vec<Note>,
    #[serde(default)]
    pub time_tracking: TimeTracking,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            status: TaskStatus::Open,
            priority: DEFAULT_PRIORITY,
            labels: BTreeSet::new(),
            assignee: None,
            blocked_by: Vec::new(),
            branch: None,
            parent_id: None,
            is_subtask: false,
            subtasks: Vec::new(),
            notes: Vec::new(),
            time_tracking: TimeTracking::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a note, dropping the oldest entries past the cap. Order of the
    /// surviving entries is never changed.
    pub fn push_note(&mut self, session_id: &str, text: impl Into<String>, now: DateTime<Utc>) {
        self.notes.push(Note {
            timestamp: now,
            session_id: session_id.to_string(),
            note: text.into(),
        });
        if self.notes.len() > MAX_NOTES_PER_TASK {
            let excess = self.notes.len() - MAX_NOTES_PER_TASK;
            self.notes.drain(..excess);
        }
    }
}

/// Zero-padded id from the store counter: `task-001`, `task-042`, ...
pub fn format_task_id(n: u64) -> String {
    format!("task-{n:03}")
}

/// Numeric suffix of a `task-NNN` id, if it has one.
pub fn numeric_suffix(id: &str) -> Option<u64> {
    id.strip_prefix("task-").and_then(|s| s.parse().ok())
}

/// Labels are an unordered set of lowercase strings; empty entries dropped.
pub fn normalize_labels<I, S>(labels: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    labels
        .into_iter()
        .map(|l| l.as_ref().trim().to_lowercase())
        .filter(|l| !l.is_empty())
        .collect()
}

pub fn validate_priority(priority: u8) -> Result<u8> {
    if priority > 3 {
        return Err(CoreError::InvalidArgument(format!(
            "priority {priority} out of range (0 = critical .. 3 = low)"
        )));
    }
    Ok(priority)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_cap_keeps_most_recent() {
        let now = Utc::now();
        let mut task = Task::new("task-001", "t", now);
        for i in 0..(MAX_NOTES_PER_TASK + 10) {
            task.push_note("s", format!("note {i}"), now);
        }
        assert_eq!(task.notes.len(), MAX_NOTES_PER_TASK);
        assert_eq!(task.notes.last().unwrap().note, "note 59");
        assert_eq!(task.notes.first().unwrap().note, "note 10");
    }

    #[test]
    fn labels_are_lowercased_and_deduped() {
        let labels = normalize_labels(["Backend", "backend", " FRONTEND ", ""]);
        assert_eq!(labels.len(), 2);
        assert!(labels.contains("backend"));
        assert!(labels.contains("frontend"));
    }

    #[test]
    fn id_suffix_round_trip() {
        assert_eq!(format_task_id(7), "task-007");
        assert_eq!(numeric_suffix("task-007"), Some(7));
        assert_eq!(numeric_suffix("template-007"), None);
    }

    #[test]
    fn priority_bounds() {
        assert!(validate_priority(0).is_ok());
        assert!(validate_priority(3).is_ok());
        assert!(validate_priority(4).is_err());
    }
}
