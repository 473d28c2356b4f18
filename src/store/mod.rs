//! Durable custody of tasks, templates, sessions, and the event history.
//!
//! All mutation goes through [`Store::transaction`]: acquire the exclusive
//! `.lock`, load the current snapshot from disk, run the caller's closure on
//! a mutable copy, validate the invariants, persist atomically, append the
//! buffered history events, release the lock. A failure anywhere before the
//! persist leaves the on-disk state untouched.

mod lock;

pub use lock::StoreLock;

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{CoreConfig, SCHEMA_VERSION};
use crate::error::{CoreError, Result};
use crate::model::{numeric_suffix, Event, Session, Task, TaskStatus, Template};

#[derive(Debug, Serialize, Deserialize)]
struct TasksFile {
    version: u32,
    next_id: u64,
    #[serde(default)]
    tasks: Vec<Task>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TemplatesFile {
    version: u32,
    #[serde(default)]
    templates: Vec<Template>,
}

/// A task at rest in `archive.jsonl`, stamped with its archival time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedTask {
    #[serde(flatten)]
    pub task: Task,
    pub archived_at: DateTime<Utc>,
}

/// Which parts of the snapshot changed and need persisting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dirty {
    pub tasks: bool,
    pub templates: bool,
    pub sessions: bool,
}

impl Dirty {
    pub fn any(&self) -> bool {
        self.tasks || self.templates || self.sessions
    }
}

/// In-memory image of the store. Ops mutate this; the store (or the
/// coordinator's flush loop) persists the dirty parts and drains the
/// buffered events into `history.jsonl`.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub next_id: u64,
    pub tasks: BTreeMap<String, Task>,
    pub sessions: BTreeMap<String, Session>,
    pub templates: Vec<Template>,
    pub dirty: Dirty,
    events: Vec<Event>,
    archived: Vec<Task>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self {
            next_id: 1,
            tasks: BTreeMap::new(),
            sessions: BTreeMap::new(),
            templates: Vec::new(),
            dirty: Dirty::default(),
            events: Vec::new(),
            archived: Vec::new(),
        }
    }

    pub fn task(&self, id: &str) -> Result<&Task> {
        self.tasks
            .get(id)
            .ok_or_else(|| CoreError::NotFound(format!("task '{id}' not found")))
    }

    /// Mutable task access; marks the task set dirty.
    pub fn task_mut(&mut self, id: &str) -> Result<&mut Task> {
        self.dirty.tasks = true;
        self.tasks
            .get_mut(id)
            .ok_or_else(|| CoreError::NotFound(format!("task '{id}' not found")))
    }

    pub fn session(&self, id: &str) -> Result<&Session> {
        self.sessions
            .get(id)
            .ok_or_else(|| CoreError::NotFound(format!("session '{id}' is not registered")))
    }

    pub fn session_mut(&mut self, id: &str) -> Result<&mut Session> {
        self.dirty.sessions = true;
        self.sessions
            .get_mut(id)
            .ok_or_else(|| CoreError::NotFound(format!("session '{id}' is not registered")))
    }

    /// Buffer a history event; drained at commit time.
    pub fn record(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    /// Queue tasks for the append-only archive log.
    pub fn queue_archive(&mut self, tasks: Vec<Task>) {
        self.archived.extend(tasks);
    }

    pub fn take_archived(&mut self) -> Vec<Task> {
        std::mem::take(&mut self.archived)
    }

    pub fn has_pending_writes(&self) -> bool {
        self.dirty.any() || !self.events.is_empty() || !self.archived.is_empty()
    }

    /// Check every invariant that must hold after a committed transaction.
    /// A violation aborts the commit with `Conflict`.
    pub fn validate(&self) -> Result<()> {
        for (id, task) in &self.tasks {
            if id != &task.id {
                return Err(CoreError::Conflict(format!(
                    "task keyed '{id}' carries id '{}'",
                    task.id
                )));
            }
            if task.assignee.is_some() != (task.status == TaskStatus::InProgress) {
                return Err(CoreError::Conflict(format!(
                    "task '{id}': assignee and in_progress status must agree \
                     (status={}, assignee={:?})",
                    task.status, task.assignee
                )));
            }
            let tt = &task.time_tracking;
            if tt.is_running && tt.started_at.is_none() {
                return Err(CoreError::Conflict(format!(
                    "task '{id}': running timer without started_at"
                )));
            }
            if tt.is_running && tt.is_paused {
                return Err(CoreError::Conflict(format!(
                    "task '{id}': timer cannot be running and paused"
                )));
            }
            if task.is_subtask != task.parent_id.is_some() {
                return Err(CoreError::Conflict(format!(
                    "task '{id}': is_subtask does not mirror parent_id"
                )));
            }
            if let Some(parent_id) = &task.parent_id {
                let parent = self.tasks.get(parent_id).ok_or_else(|| {
                    CoreError::Conflict(format!("task '{id}': parent '{parent_id}' missing"))
                })?;
                if !parent.subtasks.iter().any(|s| s == id) {
                    return Err(CoreError::Conflict(format!(
                        "task '{id}' not listed in subtasks of parent '{parent_id}'"
                    )));
                }
            }
            for sub_id in &task.subtasks {
                let child = self.tasks.get(sub_id).ok_or_else(|| {
                    CoreError::Conflict(format!("task '{id}': subtask '{sub_id}' missing"))
                })?;
                if child.parent_id.as_deref() != Some(id.as_str()) {
                    return Err(CoreError::Conflict(format!(
                        "subtask '{sub_id}' does not point back to parent '{id}'"
                    )));
                }
            }
            if let Some(n) = numeric_suffix(id) {
                if n >= self.next_id {
                    return Err(CoreError::Conflict(format!(
                        "id counter {} not above existing id '{id}'",
                        self.next_id
                    )));
                }
            }
        }

        for session in self.sessions.values() {
            let assigned: Vec<&str> = self
                .tasks
                .values()
                .filter(|t| t.assignee.as_deref() == Some(session.session_id.as_str()))
                .map(|t| t.id.as_str())
                .collect();
            if assigned.len() > 1 {
                return Err(CoreError::Conflict(format!(
                    "session '{}' holds {} claims at once",
                    session.session_id,
                    assigned.len()
                )));
            }
            match (&session.working_on, assigned.first()) {
                (Some(w), Some(a)) if w.as_str() == *a => {}
                (None, None) => {}
                (w, a) => {
                    return Err(CoreError::Conflict(format!(
                        "session '{}': working_on {w:?} disagrees with assignment {a:?}",
                        session.session_id
                    )));
                }
            }
        }

        if let Some(cycle_id) = find_blocked_by_cycle(&self.tasks) {
            return Err(CoreError::Conflict(format!(
                "blocked_by cycle involving task '{cycle_id}'"
            )));
        }

        Ok(())
    }
}

/// Detect a cycle in the `blocked_by` relation; unknown ids are ignored
/// (orphan references are treated as satisfied, never as edges).
pub fn find_blocked_by_cycle(tasks: &BTreeMap<String, Task>) -> Option<String> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let mut colors: BTreeMap<&str, Color> =
        tasks.keys().map(|k| (k.as_str(), Color::White)).collect();

    for start in tasks.keys() {
        if colors[start.as_str()] != Color::White {
            continue;
        }
        // Iterative DFS with an explicit stack of (node, next edge index).
        let mut stack: Vec<(&str, usize)> = vec![(start.as_str(), 0)];
        colors.insert(start.as_str(), Color::Gray);
        while let Some((node, edge)) = stack.pop() {
            let blockers = &tasks[node].blocked_by;
            if edge < blockers.len() {
                stack.push((node, edge + 1));
                let next = blockers[edge].as_str();
                match colors.get(next).copied() {
                    Some(Color::White) => {
                        colors.insert(next, Color::Gray);
                        stack.push((next, 0));
                    }
                    Some(Color::Gray) => return Some(next.to_string()),
                    _ => {}
                }
            } else {
                colors.insert(node, Color::Black);
            }
        }
    }
    None
}

/// File-backed store rooted at the state directory.
#[derive(Debug, Clone)]
pub struct Store {
    cfg: CoreConfig,
}

impl Store {
    pub fn new(cfg: CoreConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.cfg
    }

    /// Run a mutating closure under the exclusive lock.
    pub fn transaction<T>(&self, f: impl FnOnce(&mut Snapshot) -> Result<T>) -> Result<T> {
        let _lock = self.lock()?;
        let mut snap = self.load_locked()?;
        let out = f(&mut snap)?;
        snap.validate()?;
        self.persist_locked(&mut snap)?;
        Ok(out)
    }

    /// Like [`Store::transaction`], additionally handing the closure the
    /// event history (read under the same lock). Used by undo.
    pub fn transaction_with_history<T>(
        &self,
        f: impl FnOnce(&mut Snapshot, &[Event]) -> Result<T>,
    ) -> Result<T> {
        let _lock = self.lock()?;
        let history = self.read_history_locked()?;
        let mut snap = self.load_locked()?;
        let out = f(&mut snap, &history)?;
        snap.validate()?;
        self.persist_locked(&mut snap)?;
        Ok(out)
    }

    /// Read-only access to a consistent snapshot.
    pub fn read<T>(&self, f: impl FnOnce(&Snapshot) -> Result<T>) -> Result<T> {
        let _lock = self.lock()?;
        let snap = self.load_locked()?;
        f(&snap)
    }

    /// Load the full snapshot (coordinator startup).
    pub fn load(&self) -> Result<Snapshot> {
        let _lock = self.lock()?;
        self.load_locked()
    }

    /// Persist whatever parts of `snap` are dirty (coordinator flush).
    pub fn save(&self, snap: &mut Snapshot) -> Result<()> {
        let _lock = self.lock()?;
        self.persist_locked(snap)
    }

    pub fn append_history(&self, events: &[Event]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let _lock = self.lock()?;
        self.append_history_locked(events)
    }

    pub fn read_history(&self) -> Result<Vec<Event>> {
        let _lock = self.lock()?;
        self.read_history_locked()
    }

    pub fn read_archive(&self) -> Result<Vec<ArchivedTask>> {
        let _lock = self.lock()?;
        read_jsonl(&self.cfg.archive_path())
    }

    /// Rewrite the archive log without the given task and return it to the
    /// live set as `open`. Fails `NotFound` if the id is not archived and
    /// `Conflict` if the id has been reused by a live task.
    pub fn restore_from_archive(&self, task_id: &str, session_id: &str) -> Result<Task> {
        let _lock = self.lock()?;
        let archived: Vec<ArchivedTask> = read_jsonl(&self.cfg.archive_path())?;
        let (mut matches, remaining): (Vec<_>, Vec<_>) = archived
            .into_iter()
            .partition(|a| a.task.id == task_id);
        let entry = matches
            .pop()
            .ok_or_else(|| CoreError::NotFound(format!("task '{task_id}' is not archived")))?;

        let mut snap = self.load_locked()?;
        let task = crate::ops::archive::restore_task(&mut snap, entry.task, session_id, Utc::now())?;
        snap.validate()?;

        let mut buf = Vec::new();
        for a in &remaining {
            serde_json::to_writer(&mut buf, a)?;
            buf.push(b'\n');
        }
        atomic_write(&self.cfg.archive_path(), &buf)?;

        self.persist_locked(&mut snap)?;
        Ok(task)
    }

    fn lock(&self) -> Result<StoreLock> {
        StoreLock::acquire(&self.cfg.lock_path(), self.cfg.lock_timeout)
    }

    fn load_locked(&self) -> Result<Snapshot> {
        let tasks_path = self.cfg.tasks_path();
        recover_tmp(&tasks_path)?;
        recover_tmp(&self.cfg.templates_path())?;

        let mut snap = Snapshot::empty();

        if tasks_path.exists() {
            let raw = fs::read_to_string(&tasks_path)?;
            let file: TasksFile = serde_json::from_str(&raw)
                .map_err(|e| CoreError::Internal(format!("corrupt tasks.json: {e}")))?;
            snap.next_id = file.next_id.max(1);
            if file.version < SCHEMA_VERSION {
                debug!(from = file.version, to = SCHEMA_VERSION, "migrating task schema");
                snap.dirty.tasks = true;
            }
            for mut task in file.tasks {
                // v1 rows predate the subtask fields; serde fills defaults,
                // the mirror flag is recomputed here.
                task.is_subtask = task.parent_id.is_some();
                if snap.tasks.insert(task.id.clone(), task).is_some() {
                    return Err(CoreError::Internal(
                        "duplicate task id in tasks.json".to_string(),
                    ));
                }
            }
            // The counter must stay strictly above every existing suffix,
            // even if the file was edited by hand.
            let max_suffix = snap.tasks.keys().filter_map(|id| numeric_suffix(id)).max();
            if let Some(max) = max_suffix {
                if snap.next_id <= max {
                    snap.next_id = max + 1;
                    snap.dirty.tasks = true;
                }
            }
        }

        let templates_path = self.cfg.templates_path();
        if templates_path.exists() {
            let raw = fs::read_to_string(&templates_path)?;
            let file: TemplatesFile = serde_json::from_str(&raw)
                .map_err(|e| CoreError::Internal(format!("corrupt templates.json: {e}")))?;
            snap.templates = file.templates;
        }

        let sessions_dir = self.cfg.sessions_dir();
        if sessions_dir.exists() {
            for entry in fs::read_dir(&sessions_dir)? {
                let path = entry?.path();
                if path.extension().map_or(true, |e| e != "json") {
                    continue;
                }
                let raw = fs::read_to_string(&path)?;
                match serde_json::from_str::<Session>(&raw) {
                    Ok(session) => {
                        snap.sessions.insert(session.session_id.clone(), session);
                    }
                    Err(e) => {
                        warn!(path = %path.display(), err = %e, "skipping malformed session file");
                    }
                }
            }
        }

        Ok(snap)
    }

    fn persist_locked(&self, snap: &mut Snapshot) -> Result<()> {
        fs::create_dir_all(&self.cfg.state_dir)?;

        if snap.dirty.tasks {
            let file = TasksFile {
                version: SCHEMA_VERSION,
                next_id: snap.next_id,
                tasks: snap.tasks.values().cloned().collect(),
            };
            let mut body = serde_json::to_vec_pretty(&file)?;
            body.push(b'\n');
            atomic_write(&self.cfg.tasks_path(), &body)?;
        }

        if snap.dirty.templates {
            let file = TemplatesFile {
                version: 1,
                templates: snap.templates.clone(),
            };
            let mut body = serde_json::to_vec_pretty(&file)?;
            body.push(b'\n');
            atomic_write(&self.cfg.templates_path(), &body)?;
        }

        if snap.dirty.sessions {
            let dir = self.cfg.sessions_dir();
            fs::create_dir_all(&dir)?;
            for session in snap.sessions.values() {
                let mut body = serde_json::to_vec_pretty(session)?;
                body.push(b'\n');
                atomic_write(&self.cfg.session_path(&session.session_id), &body)?;
            }
            // Session files are deleted on explicit end (and reclaim).
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                let stem = match path.file_stem().and_then(|s| s.to_str()) {
                    Some(s) => s.to_string(),
                    None => continue,
                };
                if path.extension().map_or(false, |e| e == "json")
                    && !snap.sessions.contains_key(&stem)
                {
                    let _ = fs::remove_file(&path);
                }
            }
        }

        let archived = snap.take_archived();
        if !archived.is_empty() {
            let now = Utc::now();
            let mut buf = Vec::new();
            for task in archived {
                let entry = ArchivedTask {
                    task,
                    archived_at: now,
                };
                serde_json::to_writer(&mut buf, &entry)?;
                buf.push(b'\n');
            }
            append_bytes(&self.cfg.archive_path(), &buf)?;
        }

        let events = snap.take_events();
        self.append_history_locked(&events)?;

        snap.dirty = Dirty::default();
        Ok(())
    }

    fn append_history_locked(&self, events: &[Event]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.cfg.state_dir)?;
        let mut buf = Vec::new();
        for event in events {
            serde_json::to_writer(&mut buf, event)?;
            buf.push(b'\n');
        }
        append_bytes(&self.cfg.history_path(), &buf)
    }

    fn read_history_locked(&self) -> Result<Vec<Event>> {
        read_jsonl(&self.cfg.history_path())
    }
}

/// Write-to-temp, fsync best effort, rename over target. A concurrent
/// reader sees either the old or the new file, never a torn write.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    match fs::File::open(&tmp).and_then(|f| f.sync_all()) {
        Ok(()) => {}
        Err(e) => warn!(path = %tmp.display(), err = %e, "fsync of temp file failed"),
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn append_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(bytes)?;
    file.flush()?;
    Ok(())
}

/// Read a JSONL file, skipping malformed lines (crash-truncated tails).
fn read_jsonl<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = fs::read_to_string(path)?;
    let mut out = Vec::new();
    for (line_num, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(line) {
            Ok(v) => out.push(v),
            Err(e) => {
                warn!(path = %path.display(), line = line_num + 1, err = %e,
                      "skipping malformed log line");
            }
        }
    }
    Ok(out)
}

/// Crash recovery for an orphaned `.tmp` left by an interrupted write: a
/// newer, valid tmp wins; a corrupt or stale tmp is removed.
fn recover_tmp(path: &Path) -> Result<()> {
    let tmp = path.with_extension("tmp");
    if !tmp.exists() {
        return Ok(());
    }

    if !path.exists() {
        warn!(path = %tmp.display(), "recovering from orphaned tmp file");
        fs::rename(&tmp, path)?;
        return Ok(());
    }

    let tmp_mtime = fs::metadata(&tmp)?.modified()?;
    let main_mtime = fs::metadata(path)?.modified()?;

    if tmp_mtime > main_mtime {
        let raw = fs::read_to_string(&tmp)?;
        if serde_json::from_str::<serde_json::Value>(&raw).is_ok() {
            warn!(path = %tmp.display(), "recovering from newer tmp file");
            fs::rename(&tmp, path)?;
        } else {
            warn!(path = %tmp.display(), "removing corrupt tmp file");
            fs::remove_file(&tmp)?;
        }
    } else {
        debug!(path = %tmp.display(), "removing stale tmp file");
        fs::remove_file(&tmp)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Event, EventKind, Task};
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_store(dir: &TempDir) -> Store {
        let mut cfg = CoreConfig::new(dir.path());
        cfg.lock_timeout = Duration::from_millis(300);
        Store::new(cfg)
    }

    fn insert_task(snap: &mut Snapshot, title: &str) -> String {
        let id = crate::model::format_task_id(snap.next_id);
        snap.next_id += 1;
        let task = Task::new(&id, title, Utc::now());
        snap.tasks.insert(id.clone(), task);
        snap.dirty.tasks = true;
        id
    }

    #[test]
    fn committed_state_survives_reload() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        let id = store
            .transaction(|snap| Ok(insert_task(snap, "persisted")))
            .unwrap();

        let reloaded = store.load().unwrap();
        assert_eq!(reloaded.tasks[&id].title, "persisted");
        assert_eq!(reloaded.next_id, 2);
    }

    #[test]
    fn failed_transaction_leaves_disk_untouched() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        store
            .transaction(|snap| {
                insert_task(snap, "kept");
                Ok(())
            })
            .unwrap();

        let result: Result<()> = store.transaction(|snap| {
            insert_task(snap, "discarded");
            Err(CoreError::InvalidArgument("nope".into()))
        });
        assert!(result.is_err());

        let snap = store.load().unwrap();
        assert_eq!(snap.tasks.len(), 1);
    }

    #[test]
    fn invariant_violation_aborts_commit() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        let result: Result<()> = store.transaction(|snap| {
            let id = insert_task(snap, "broken");
            // in_progress without assignee violates the claim invariant
            snap.tasks.get_mut(&id).unwrap().status = TaskStatus::InProgress;
            Ok(())
        });
        assert!(matches!(result, Err(CoreError::Conflict(_))));
        assert!(store.load().unwrap().tasks.is_empty());
    }

    #[test]
    fn lock_contention_times_out() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        let held = StoreLock::acquire(
            &store.config().lock_path(),
            Duration::from_millis(300),
        )
        .unwrap();

        let result: Result<()> = store.transaction(|_| Ok(()));
        assert!(matches!(result, Err(CoreError::LockTimeout(_))));
        drop(held);
    }

    #[test]
    fn events_append_to_history_in_order() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        store
            .transaction(|snap| {
                let id = insert_task(snap, "with history");
                snap.record(Event::new(
                    Utc::now(),
                    EventKind::TaskCreated,
                    "s1",
                    serde_json::json!({ "task_id": id }),
                ));
                Ok(())
            })
            .unwrap();

        let history = store.read_history().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, EventKind::TaskCreated);
    }

    #[test]
    fn orphaned_tmp_file_is_recovered() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        let file = TasksFile {
            version: SCHEMA_VERSION,
            next_id: 5,
            tasks: vec![Task::new("task-004", "from tmp", Utc::now())],
        };
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(
            store.config().tasks_path().with_extension("tmp"),
            serde_json::to_vec_pretty(&file).unwrap(),
        )
        .unwrap();

        let snap = store.load().unwrap();
        assert_eq!(snap.tasks.len(), 1);
        assert!(store.config().tasks_path().exists());
        assert!(!store.config().tasks_path().with_extension("tmp").exists());
    }

    #[test]
    fn id_counter_raised_above_existing_suffixes() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        let file = TasksFile {
            version: SCHEMA_VERSION,
            next_id: 1, // stale counter below the ids on disk
            tasks: vec![Task::new("task-041", "hand edited", Utc::now())],
        };
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(
            store.config().tasks_path(),
            serde_json::to_vec_pretty(&file).unwrap(),
        )
        .unwrap();

        let snap = store.load().unwrap();
        assert_eq!(snap.next_id, 42);
    }

    #[test]
    fn cycle_detection_finds_loops() {
        let now = Utc::now();
        let mut tasks = BTreeMap::new();
        let mut a = Task::new("task-001", "a", now);
        a.blocked_by = vec!["task-002".into()];
        let mut b = Task::new("task-002", "b", now);
        b.blocked_by = vec!["task-001".into()];
        tasks.insert(a.id.clone(), a);
        tasks.insert(b.id.clone(), b);
        assert!(find_blocked_by_cycle(&tasks).is_some());

        tasks.get_mut("task-002").unwrap().blocked_by.clear();
        assert!(find_blocked_by_cycle(&tasks).is_none());

        // Orphan references are not edges.
        tasks.get_mut("task-002").unwrap().blocked_by = vec!["task-999".into()];
        assert!(find_blocked_by_cycle(&tasks).is_none());
    }
}
