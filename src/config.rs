//! State-directory layout and tunable thresholds.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default coordinator port.
pub const DEFAULT_PORT: u16 = 8765;

/// Current on-disk schema version for `tasks.json`.
pub const SCHEMA_VERSION: u32 = 2;

/// Notes kept per task; older entries are dropped on append.
pub const MAX_NOTES_PER_TASK: usize = 50;

/// Heartbeat age at which dashboard readers show a soft warning.
pub const STALENESS_WARN: Duration = Duration::from_secs(60);

/// Heartbeat age at which dashboard readers show a danger warning.
/// Reclaim only happens at [`CoreConfig::cleanup_threshold`].
pub const STALENESS_DANGER: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Root of the shared state directory (`.agent-state` by convention).
    pub state_dir: PathBuf,
    /// Bound on acquiring the store's advisory lock.
    pub lock_timeout: Duration,
    /// Heartbeat age past which `cleanup` reclaims a session and its task.
    pub cleanup_threshold: Duration,
    /// How often the coordinator runs cleanup.
    pub cleanup_interval: Duration,
    /// How often the coordinator flushes dirty in-memory state to disk.
    pub flush_interval: Duration,
    /// How long a coordinator handler waits for the state lock before 503.
    pub request_budget: Duration,
    /// Open claims a single session may hold at once.
    pub max_concurrent: usize,
    /// When all subtasks reach done, complete the parent automatically.
    pub auto_complete_parent: bool,
    /// Completed tasks older than this many days are eligible for archival.
    pub archive_after_days: i64,
}

impl CoreConfig {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            lock_timeout: Duration::from_secs(10),
            cleanup_threshold: Duration::from_secs(180),
            cleanup_interval: Duration::from_secs(30),
            flush_interval: Duration::from_secs(1),
            request_budget: Duration::from_secs(5),
            max_concurrent: 1,
            auto_complete_parent: false,
            archive_after_days: 30,
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn tasks_path(&self) -> PathBuf {
        self.state_dir.join("tasks.json")
    }

    pub fn templates_path(&self) -> PathBuf {
        self.state_dir.join("templates.json")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.state_dir.join("sessions")
    }

    pub fn session_path(&self, session_id: &str) -> PathBuf {
        self.sessions_dir().join(format!("{session_id}.json"))
    }

    pub fn history_path(&self) -> PathBuf {
        self.state_dir.join("history.jsonl")
    }

    pub fn archive_path(&self) -> PathBuf {
        self.state_dir.join("archive.jsonl")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join(".lock")
    }

    pub fn parallel_mode_path(&self) -> PathBuf {
        self.state_dir.join(".parallel-mode")
    }

    pub fn pid_path(&self) -> PathBuf {
        self.state_dir.join("coordinator.pid")
    }
}

/// Convert a std duration to a chrono one, saturating instead of failing.
pub fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::seconds(i64::MAX / 2))
}
