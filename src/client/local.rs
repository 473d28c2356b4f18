//! Single mode: every operation is a store transaction under the file
//! lock, run on the blocking pool.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::config::CoreConfig;
use crate::error::{CoreError, Result};
use crate::model::{Session, SessionRole, Task, TaskStatus};
use crate::ops::{
    self, BulkReport, CompleteRequest, DeleteReport, NewTask, ParallelSummary, StatusReport,
    SubtaskProgress, TaskPatch, TaskTime, UndoReport,
};
use crate::store::{Snapshot, Store};

use super::backend::Backend;

pub struct LocalBackend {
    store: Arc<Store>,
    cfg: CoreConfig,
    /// Registration defaults used when a claim auto-registers the session.
    default_role: SessionRole,
    default_labels: Vec<String>,
}

impl LocalBackend {
    pub fn new(
        store: Arc<Store>,
        cfg: CoreConfig,
        default_role: SessionRole,
        default_labels: Vec<String>,
    ) -> Self {
        Self {
            store,
            cfg,
            default_role,
            default_labels,
        }
    }

    async fn tx<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Snapshot) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.transaction(f))
            .await
            .map_err(|e| CoreError::Internal(format!("store task failed: {e}")))?
    }

    async fn view<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Snapshot) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.read(f))
            .await
            .map_err(|e| CoreError::Internal(format!("store task failed: {e}")))?
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn register(
        &self,
        session_id: &str,
        role: SessionRole,
        context: String,
        labels: Vec<String>,
    ) -> Result<Session> {
        let session_id = session_id.to_string();
        self.tx(move |snap| {
            Ok(ops::sessions::register(
                snap,
                Utc::now(),
                &session_id,
                role,
                context,
                labels,
            ))
        })
        .await
    }

    async fn heartbeat(&self, session_id: &str) -> Result<()> {
        let session_id = session_id.to_string();
        self.tx(move |snap| ops::sessions::heartbeat(snap, Utc::now(), &session_id))
            .await
    }

    async fn end_session(&self, session_id: &str, release_tasks: bool) -> Result<()> {
        let session_id = session_id.to_string();
        self.tx(move |snap| {
            ops::sessions::end(snap, Utc::now(), &session_id, release_tasks).map(|_| ())
        })
        .await
    }

    async fn create_task(&self, session_id: &str, req: NewTask) -> Result<Task> {
        let session_id = session_id.to_string();
        self.tx(move |snap| ops::tasks::create_task(snap, Utc::now(), &session_id, req))
            .await
    }

    async fn request_task(
        &self,
        session_id: &str,
        preferred_labels: Vec<String>,
    ) -> Result<Option<Task>> {
        let session_id = session_id.to_string();
        let cfg = self.cfg.clone();
        let role = self.default_role;
        let labels = self.default_labels.clone();
        self.tx(move |snap| {
            // A claim from an unregistered id registers it first, so ad-hoc
            // callers show up in status output.
            if !snap.sessions.contains_key(&session_id) {
                ops::sessions::register(
                    snap,
                    Utc::now(),
                    &session_id,
                    role,
                    "auto-registered".to_string(),
                    labels,
                );
            }
            ops::tasks::claim_next(snap, Utc::now(), &session_id, &preferred_labels, &cfg)
        })
        .await
    }

    async fn complete_task(&self, session_id: &str, req: CompleteRequest) -> Result<Task> {
        let session_id = session_id.to_string();
        let cfg = self.cfg.clone();
        self.tx(move |snap| ops::tasks::complete_task(snap, Utc::now(), &session_id, &req, &cfg))
            .await
    }

    async fn bulk_complete(
        &self,
        session_id: &str,
        task_ids: Vec<String>,
        note: Option<String>,
        branch: Option<String>,
        force: bool,
    ) -> Result<BulkReport> {
        let session_id = session_id.to_string();
        let cfg = self.cfg.clone();
        self.tx(move |snap| {
            Ok(ops::tasks::bulk_complete(
                snap,
                Utc::now(),
                &session_id,
                &task_ids,
                note,
                branch,
                force,
                &cfg,
            ))
        })
        .await
    }

    async fn reopen_task(
        &self,
        session_id: &str,
        task_id: &str,
        note: Option<String>,
    ) -> Result<Task> {
        let session_id = session_id.to_string();
        let task_id = task_id.to_string();
        self.tx(move |snap| {
            ops::tasks::reopen_task(snap, Utc::now(), &session_id, &task_id, note.as_deref())
        })
        .await
    }

    async fn bulk_reopen(
        &self,
        session_id: &str,
        task_ids: Vec<String>,
        note: Option<String>,
    ) -> Result<BulkReport> {
        let session_id = session_id.to_string();
        self.tx(move |snap| {
            Ok(ops::tasks::bulk_reopen(
                snap,
                Utc::now(),
                &session_id,
                &task_ids,
                note.as_deref(),
            ))
        })
        .await
    }

    async fn edit_task(&self, session_id: &str, task_id: &str, patch: TaskPatch) -> Result<Task> {
        let session_id = session_id.to_string();
        let task_id = task_id.to_string();
        self.tx(move |snap| ops::tasks::edit_task(snap, Utc::now(), &session_id, &task_id, &patch))
            .await
    }

    async fn delete_task(
        &self,
        session_id: &str,
        task_id: &str,
        force: bool,
    ) -> Result<DeleteReport> {
        let session_id = session_id.to_string();
        let task_id = task_id.to_string();
        self.tx(move |snap| ops::tasks::delete_task(snap, Utc::now(), &session_id, &task_id, force))
            .await
    }

    async fn add_note(&self, session_id: &str, task_id: &str, note: String) -> Result<()> {
        let session_id = session_id.to_string();
        let task_id = task_id.to_string();
        self.tx(move |snap| ops::tasks::add_note(snap, Utc::now(), &session_id, &task_id, &note))
            .await
    }

    async fn subtask_progress(&self, parent_id: &str) -> Result<SubtaskProgress> {
        let parent_id = parent_id.to_string();
        self.view(move |snap| ops::tasks::subtask_progress(snap, &parent_id))
            .await
    }

    async fn start_timer(&self, session_id: &str, task_id: &str) -> Result<Task> {
        let session_id = session_id.to_string();
        let task_id = task_id.to_string();
        self.tx(move |snap| ops::timers::start_timer(snap, Utc::now(), &session_id, &task_id))
            .await
    }

    async fn stop_timer(&self, session_id: &str, task_id: &str) -> Result<Task> {
        let session_id = session_id.to_string();
        let task_id = task_id.to_string();
        self.tx(move |snap| ops::timers::stop_timer(snap, Utc::now(), &session_id, &task_id))
            .await
    }

    async fn pause_timer(&self, session_id: &str, task_id: &str) -> Result<Task> {
        let session_id = session_id.to_string();
        let task_id = task_id.to_string();
        self.tx(move |snap| ops::timers::pause_timer(snap, Utc::now(), &session_id, &task_id))
            .await
    }

    async fn task_time(&self, task_id: &str) -> Result<TaskTime> {
        let task_id = task_id.to_string();
        self.view(move |snap| ops::timers::task_time(snap, Utc::now(), &task_id))
            .await
    }

    async fn tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        self.view(move |snap| Ok(ops::list_tasks(snap, status))).await
    }

    async fn status(&self) -> Result<StatusReport> {
        let threshold = self.cfg.cleanup_threshold;
        let mut report = self
            .tx(move |snap| {
                // Status is the opportunistic cleanup point in single mode:
                // crashed sessions are reclaimed before reporting.
                let now = Utc::now();
                ops::sessions::cleanup(snap, now, threshold);
                Ok(ops::status_report(snap, now))
            })
            .await?;
        report.mode = "single".to_string();
        Ok(report)
    }

    async fn parallel_summary(&self) -> Result<ParallelSummary> {
        self.view(move |snap| Ok(ops::parallel_summary(snap))).await
    }

    async fn undo_last(&self, session_id: &str) -> Result<UndoReport> {
        let session_id = session_id.to_string();
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || {
            store.transaction_with_history(|snap, history| {
                ops::undo::undo_last(snap, history, &session_id, Utc::now())
            })
        })
        .await
        .map_err(|e| CoreError::Internal(format!("store task failed: {e}")))?
    }
}
