//! The agent-facing façade.
//!
//! An [`Agent`] detects its execution mode once at construction: if the
//! `.parallel-mode` sentinel is present and the coordinator it names
//! answers a liveness probe, operations go over HTTP; otherwise they run
//! directly against the file-backed store. Both paths share the ops layer,
//! so results and error kinds are identical. The cached mode is re-checked
//! whenever a request exhausts its retries; the failed call still surfaces
//! `Unavailable`, later calls use whatever mode the re-check found.

mod backend;
mod local;
mod remote;
pub mod retry;

pub use backend::Backend;
pub use local::LocalBackend;
pub use remote::RemoteBackend;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{CoreConfig, DEFAULT_PORT};
use crate::error::{CoreError, Result};
use crate::model::{Session, SessionRole, Task, TaskStatus, Template, TemplateSubtask};
use crate::ops::{
    self, ArchiveReport, BulkReport, CompleteRequest, DeleteReport, NewTask, ParallelSummary,
    StatusReport, SubtaskProgress, TaskPatch, TaskTime, UndoReport,
};
use crate::store::{ArchivedTask, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Single,
    Parallel,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Single => "single",
            Mode::Parallel => "parallel",
        }
    }
}

/// Contents of the `.parallel-mode` sentinel file.
#[derive(Debug, Clone, Deserialize)]
struct ParallelModeFile {
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default)]
    #[allow(dead_code)]
    main_session: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

#[derive(Debug, Clone, Default)]
pub struct AgentOptions {
    pub session_id: Option<String>,
    pub role: Option<SessionRole>,
    pub context: String,
    pub labels: Vec<String>,
    /// Override thresholds (tests shorten the cleanup threshold).
    pub config: Option<CoreConfig>,
}

pub struct Agent {
    session_id: String,
    role: SessionRole,
    context: String,
    labels: Vec<String>,
    cfg: CoreConfig,
    store: Arc<Store>,
    backend: RwLock<Box<dyn Backend>>,
    parallel: AtomicBool,
}

impl Agent {
    /// Connect with defaults; see [`Agent::with_options`].
    pub async fn connect(state_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::with_options(state_dir, AgentOptions::default()).await
    }

    pub async fn with_options(state_dir: impl Into<PathBuf>, opts: AgentOptions) -> Result<Self> {
        let cfg = opts
            .config
            .unwrap_or_else(|| CoreConfig::new(state_dir.into()));
        let session_id = opts
            .session_id
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string()[..8].to_string());
        let role = opts.role.unwrap_or(SessionRole::Worker);
        let store = Arc::new(Store::new(cfg.clone()));

        let (mode, backend) = detect_backend(&cfg, &store, role, &opts.labels).await?;
        info!(session_id = %session_id, mode = mode.as_str(), "agent connected");

        Ok(Self {
            session_id,
            role,
            context: opts.context,
            labels: opts.labels,
            cfg,
            store,
            backend: RwLock::new(backend),
            parallel: AtomicBool::new(mode == Mode::Parallel),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn mode(&self) -> Mode {
        if self.parallel.load(Ordering::Relaxed) {
            Mode::Parallel
        } else {
            Mode::Single
        }
    }

    pub fn is_parallel_mode(&self) -> bool {
        self.mode() == Mode::Parallel
    }

    /// Re-check the execution mode after a request exhausted its retries.
    /// The failed call has already surfaced `Unavailable`; this only
    /// decides where the next call goes.
    async fn finish<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_transient() && self.is_parallel_mode() {
                match detect_backend(&self.cfg, &self.store, self.role, &self.labels).await {
                    Ok((mode, backend)) => {
                        warn!(
                            mode = mode.as_str(),
                            "coordinator unreachable; execution mode re-checked"
                        );
                        *self.backend.write().await = backend;
                        self.parallel.store(mode == Mode::Parallel, Ordering::Relaxed);
                    }
                    Err(err) => warn!(err = %err, "mode re-check failed"),
                }
            }
        }
        result
    }

    async fn swap_backend(&self, mode: Mode, backend: Box<dyn Backend>) {
        *self.backend.write().await = backend;
        self.parallel.store(mode == Mode::Parallel, Ordering::Relaxed);
    }

    // ── Sessions ─────────────────────────────────────────────────────────

    /// Register this session, updating the agent's own metadata too.
    pub async fn register(
        &mut self,
        context: impl Into<String>,
        labels: Vec<String>,
        role: SessionRole,
    ) -> Result<Session> {
        self.context = context.into();
        self.labels = labels.clone();
        self.role = role;
        let result = {
            let backend = self.backend.read().await;
            backend
                .register(&self.session_id, role, self.context.clone(), labels)
                .await
        };
        self.finish(result).await
    }

    pub async fn heartbeat(&self) -> Result<()> {
        let result = {
            let backend = self.backend.read().await;
            backend.heartbeat(&self.session_id).await
        };
        self.finish(result).await
    }

    pub async fn end_session(&self, release_tasks: bool) -> Result<()> {
        let result = {
            let backend = self.backend.read().await;
            backend.end_session(&self.session_id, release_tasks).await
        };
        self.finish(result).await
    }

    // ── Tasks ────────────────────────────────────────────────────────────

    pub async fn create_task(&self, req: NewTask) -> Result<Task> {
        let result = {
            let backend = self.backend.read().await;
            backend.create_task(&self.session_id, req).await
        };
        self.finish(result).await
    }

    pub async fn create_subtask(&self, parent_id: &str, req: NewTask) -> Result<Task> {
        self.create_task(NewTask {
            parent_id: Some(parent_id.to_string()),
            ..req
        })
        .await
    }

    /// Claim the next ready task, preferring the given labels (the
    /// session's own interests when none are passed).
    pub async fn get_next_task(
        &self,
        preferred_labels: Option<Vec<String>>,
    ) -> Result<Option<Task>> {
        let labels = preferred_labels.unwrap_or_else(|| self.labels.clone());
        let result = {
            let backend = self.backend.read().await;
            backend.request_task(&self.session_id, labels).await
        };
        self.finish(result).await
    }

    pub async fn complete_task(
        &self,
        task_id: &str,
        note: impl Into<String>,
        branch: Option<String>,
        force: bool,
    ) -> Result<Task> {
        let note = note.into();
        let req = CompleteRequest {
            task_id: task_id.to_string(),
            note: (!note.is_empty()).then_some(note),
            branch,
            force,
        };
        let result = {
            let backend = self.backend.read().await;
            backend.complete_task(&self.session_id, req).await
        };
        self.finish(result).await
    }

    pub async fn bulk_complete(
        &self,
        task_ids: Vec<String>,
        note: Option<String>,
        branch: Option<String>,
        force: bool,
    ) -> Result<BulkReport> {
        let result = {
            let backend = self.backend.read().await;
            backend
                .bulk_complete(&self.session_id, task_ids, note, branch, force)
                .await
        };
        self.finish(result).await
    }

    pub async fn reopen_task(&self, task_id: &str, note: Option<String>) -> Result<Task> {
        let result = {
            let backend = self.backend.read().await;
            backend.reopen_task(&self.session_id, task_id, note).await
        };
        self.finish(result).await
    }

    pub async fn bulk_reopen(
        &self,
        task_ids: Vec<String>,
        note: Option<String>,
    ) -> Result<BulkReport> {
        let result = {
            let backend = self.backend.read().await;
            backend.bulk_reopen(&self.session_id, task_ids, note).await
        };
        self.finish(result).await
    }

    pub async fn edit_task(&self, task_id: &str, patch: TaskPatch) -> Result<Task> {
        let result = {
            let backend = self.backend.read().await;
            backend.edit_task(&self.session_id, task_id, patch).await
        };
        self.finish(result).await
    }

    pub async fn delete_task(&self, task_id: &str, force: bool) -> Result<DeleteReport> {
        let result = {
            let backend = self.backend.read().await;
            backend.delete_task(&self.session_id, task_id, force).await
        };
        self.finish(result).await
    }

    pub async fn add_note(&self, task_id: &str, note: impl Into<String>) -> Result<()> {
        let result = {
            let backend = self.backend.read().await;
            backend.add_note(&self.session_id, task_id, note.into()).await
        };
        self.finish(result).await
    }

    pub async fn get_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        let result = {
            let backend = self.backend.read().await;
            backend.tasks(status).await
        };
        self.finish(result).await
    }

    pub async fn get_subtasks(&self, parent_id: &str) -> Result<Vec<Task>> {
        let tasks = self.get_tasks(None).await?;
        let parent = tasks
            .iter()
            .find(|t| t.id == parent_id)
            .ok_or_else(|| CoreError::NotFound(format!("task '{parent_id}' not found")))?
            .clone();
        Ok(parent
            .subtasks
            .iter()
            .filter_map(|sid| tasks.iter().find(|t| &t.id == sid).cloned())
            .collect())
    }

    pub async fn get_subtask_progress(&self, parent_id: &str) -> Result<SubtaskProgress> {
        let result = {
            let backend = self.backend.read().await;
            backend.subtask_progress(parent_id).await
        };
        self.finish(result).await
    }

    // ── Timers ───────────────────────────────────────────────────────────

    pub async fn start_timer(&self, task_id: &str) -> Result<Task> {
        let result = {
            let backend = self.backend.read().await;
            backend.start_timer(&self.session_id, task_id).await
        };
        self.finish(result).await
    }

    pub async fn stop_timer(&self, task_id: &str) -> Result<Task> {
        let result = {
            let backend = self.backend.read().await;
            backend.stop_timer(&self.session_id, task_id).await
        };
        self.finish(result).await
    }

    pub async fn pause_timer(&self, task_id: &str) -> Result<Task> {
        let result = {
            let backend = self.backend.read().await;
            backend.pause_timer(&self.session_id, task_id).await
        };
        self.finish(result).await
    }

    pub async fn get_task_time(&self, task_id: &str) -> Result<TaskTime> {
        let result = {
            let backend = self.backend.read().await;
            backend.task_time(task_id).await
        };
        self.finish(result).await
    }

    // ── Views ────────────────────────────────────────────────────────────

    pub async fn get_status(&self) -> Result<StatusReport> {
        let result = {
            let backend = self.backend.read().await;
            backend.status().await
        };
        self.finish(result).await
    }

    pub async fn get_parallel_summary(&self) -> Result<ParallelSummary> {
        let result = {
            let backend = self.backend.read().await;
            backend.parallel_summary().await
        };
        self.finish(result).await
    }

    pub async fn undo_last_action(&self) -> Result<UndoReport> {
        let result = {
            let backend = self.backend.read().await;
            backend.undo_last(&self.session_id).await
        };
        self.finish(result).await
    }

    // ── Templates ────────────────────────────────────────────────────────
    //
    // Template records always live in templates.json under the store lock;
    // the coordinator never persists them, so direct access is safe in
    // both modes. Instantiation goes through the active backend.

    pub async fn list_templates(&self) -> Result<Vec<Template>> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.read(|snap| Ok(snap.templates.clone())))
            .await
            .map_err(|e| CoreError::Internal(format!("store task failed: {e}")))?
    }

    pub async fn create_template(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        default_priority: Option<u8>,
        default_labels: Vec<String>,
        subtasks: Vec<TemplateSubtask>,
    ) -> Result<Template> {
        let store = self.store.clone();
        let session_id = self.session_id.clone();
        let req = ops::templates::NewTemplate {
            name: name.into(),
            description: description.into(),
            default_priority,
            default_labels,
            subtasks,
        };
        tokio::task::spawn_blocking(move || {
            store.transaction(|snap| {
                ops::templates::create_template(snap, Utc::now(), &session_id, req)
            })
        })
        .await
        .map_err(|e| CoreError::Internal(format!("store task failed: {e}")))?
    }

    pub async fn delete_template(&self, template_id: &str) -> Result<()> {
        let store = self.store.clone();
        let session_id = self.session_id.clone();
        let template_id = template_id.to_string();
        tokio::task::spawn_blocking(move || {
            store.transaction(|snap| {
                ops::templates::delete_template(snap, Utc::now(), &session_id, &template_id)
            })
        })
        .await
        .map_err(|e| CoreError::Internal(format!("store task failed: {e}")))?
    }

    /// Instantiate a template: one parent task plus one subtask per entry.
    pub async fn create_from_template(
        &self,
        template_id: &str,
        title: impl Into<String>,
        description: Option<String>,
        priority: Option<u8>,
        labels: Option<Vec<String>>,
    ) -> Result<Task> {
        let store = self.store.clone();
        let template_id = template_id.to_string();
        let template = tokio::task::spawn_blocking(move || {
            store.read(|snap| ops::templates::get_template(snap, &template_id))
        })
        .await
        .map_err(|e| CoreError::Internal(format!("store task failed: {e}")))??;

        let parent = self
            .create_task(NewTask {
                title: title.into(),
                description: description.unwrap_or_else(|| template.description.clone()),
                priority: priority.or(Some(template.default_priority)),
                labels: labels
                    .unwrap_or_else(|| template.default_labels.iter().cloned().collect()),
                ..NewTask::default()
            })
            .await?;

        for entry in &template.subtasks {
            self.create_subtask(
                &parent.id,
                NewTask {
                    title: entry.title.clone(),
                    description: entry.description.clone(),
                    ..NewTask::default()
                },
            )
            .await?;
        }

        // Re-read so the returned parent includes its subtask links.
        let tasks = self.get_tasks(None).await?;
        Ok(tasks
            .into_iter()
            .find(|t| t.id == parent.id)
            .unwrap_or(parent))
    }

    // ── Archive (direct store access; refused while a coordinator owns
    //    the live set) ───────────────────────────────────────────────────

    pub async fn archive_tasks(&self, days_old: i64, dry_run: bool) -> Result<ArchiveReport> {
        self.require_single_mode("archive")?;
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || {
            store.transaction(|snap| {
                Ok(ops::archive::archive_done(snap, Utc::now(), days_old, dry_run))
            })
        })
        .await
        .map_err(|e| CoreError::Internal(format!("store task failed: {e}")))?
    }

    pub async fn list_archived(&self, limit: usize) -> Result<Vec<ArchivedTask>> {
        let store = self.store.clone();
        let mut archived = tokio::task::spawn_blocking(move || store.read_archive())
            .await
            .map_err(|e| CoreError::Internal(format!("store task failed: {e}")))??;
        archived.reverse();
        archived.truncate(limit);
        Ok(archived)
    }

    pub async fn restore_from_archive(&self, task_id: &str) -> Result<Task> {
        self.require_single_mode("restore")?;
        let store = self.store.clone();
        let task_id = task_id.to_string();
        let session_id = self.session_id.clone();
        tokio::task::spawn_blocking(move || store.restore_from_archive(&task_id, &session_id))
            .await
            .map_err(|e| CoreError::Internal(format!("store task failed: {e}")))?
    }

    /// Administrative stale-session reclaim (single mode; the coordinator
    /// runs its own cleanup loop in parallel mode).
    pub async fn cleanup_stale_sessions(&self, threshold: Duration) -> Result<Vec<String>> {
        self.require_single_mode("cleanup")?;
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || {
            store.transaction(|snap| Ok(ops::sessions::cleanup(snap, Utc::now(), threshold)))
        })
        .await
        .map_err(|e| CoreError::Internal(format!("store task failed: {e}")))?
    }

    fn require_single_mode(&self, what: &str) -> Result<()> {
        if self.is_parallel_mode() {
            return Err(CoreError::Conflict(format!(
                "{what} requires direct store access; stop parallel mode first"
            )));
        }
        Ok(())
    }

    // ── Parallel mode management ─────────────────────────────────────────

    /// Launch a coordinator for this state directory and switch this agent
    /// to parallel mode, re-registering as `main`.
    pub async fn start_parallel_mode(&mut self, port: u16) -> Result<()> {
        if self.is_parallel_mode() {
            return Ok(());
        }

        let exe = std::env::current_exe()
            .map_err(|e| CoreError::Internal(format!("cannot locate executable: {e}")))?;
        std::process::Command::new(exe)
            .arg("serve")
            .arg("--state-dir")
            .arg(&self.cfg.state_dir)
            .arg("--port")
            .arg(port.to_string())
            .arg("--main-session")
            .arg(&self.session_id)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| CoreError::Internal(format!("failed to spawn coordinator: {e}")))?;

        let mut ready = false;
        for _ in 0..10 {
            if RemoteBackend::probe(port).await {
                ready = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        if !ready {
            return Err(CoreError::Unavailable(format!(
                "coordinator failed to start on port {port} within 5s"
            )));
        }

        self.swap_backend(Mode::Parallel, Box::new(RemoteBackend::new(port)?))
            .await;
        self.register(self.context.clone(), self.labels.clone(), SessionRole::Main)
            .await?;
        Ok(())
    }

    /// Ask the coordinator to shut down and fall back to single mode,
    /// cleaning up sentinel files left by an ungraceful exit.
    pub async fn stop_parallel_mode(&mut self) -> Result<()> {
        let sentinel = self.cfg.parallel_mode_path();
        if sentinel.exists() {
            if let Some(info) = read_sentinel(&self.cfg) {
                if let Ok(remote) =
                    RemoteBackend::with_retry(info.port, retry::RetryConfig::no_retry())
                {
                    let _ = remote.request_shutdown().await;
                }
            }
            for _ in 0..10 {
                if !sentinel.exists() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            if sentinel.exists() {
                warn!("coordinator did not exit cleanly; removing stale runtime files");
                let _ = std::fs::remove_file(&sentinel);
                let _ = std::fs::remove_file(self.cfg.pid_path());
            }
        }

        let local = Box::new(LocalBackend::new(
            self.store.clone(),
            self.cfg.clone(),
            self.role,
            self.labels.clone(),
        ));
        self.swap_backend(Mode::Single, local).await;
        Ok(())
    }
}

fn read_sentinel(cfg: &CoreConfig) -> Option<ParallelModeFile> {
    let raw = std::fs::read_to_string(cfg.parallel_mode_path()).ok()?;
    serde_json::from_str(&raw).ok()
}

async fn detect_backend(
    cfg: &CoreConfig,
    store: &Arc<Store>,
    role: SessionRole,
    labels: &[String],
) -> Result<(Mode, Box<dyn Backend>)> {
    if let Some(info) = read_sentinel(cfg) {
        // The PID file names the coordinator process; a probe answers the
        // liveness question directly and works on every platform.
        if RemoteBackend::probe(info.port).await {
            return Ok((Mode::Parallel, Box::new(RemoteBackend::new(info.port)?)));
        }
        warn!(
            port = info.port,
            "parallel-mode sentinel present but coordinator is unreachable; \
             falling back to single mode"
        );
    }
    Ok((
        Mode::Single,
        Box::new(LocalBackend::new(
            store.clone(),
            cfg.clone(),
            role,
            labels.to_vec(),
        )),
    ))
}
