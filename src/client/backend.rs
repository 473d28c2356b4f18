//! The mode-polymorphic operation interface. Dispatch is chosen once at
//! construction; there are no per-method mode branches anywhere above this
//! trait.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Session, SessionRole, Task, TaskStatus};
use crate::ops::{
    BulkReport, CompleteRequest, DeleteReport, NewTask, ParallelSummary, StatusReport,
    SubtaskProgress, TaskPatch, TaskTime, UndoReport,
};

#[async_trait]
pub trait Backend: Send + Sync {
    async fn register(
        &self,
        session_id: &str,
        role: SessionRole,
        context: String,
        labels: Vec<String>,
    ) -> Result<Session>;

    async fn heartbeat(&self, session_id: &str) -> Result<()>;

    async fn end_session(&self, session_id: &str, release_tasks: bool) -> Result<()>;

    async fn create_task(&self, session_id: &str, req: NewTask) -> Result<Task>;

    async fn request_task(
        &self,
        session_id: &str,
        preferred_labels: Vec<String>,
    ) -> Result<Option<Task>>;

    async fn complete_task(&self, session_id: &str, req: CompleteRequest) -> Result<Task>;

    async fn bulk_complete(
        &self,
        session_id: &str,
        task_ids: Vec<String>,
        note: Option<String>,
        branch: Option<String>,
        force: bool,
    ) -> Result<BulkReport>;

    async fn reopen_task(
        &self,
        session_id: &str,
        task_id: &str,
        note: Option<String>,
    ) -> Result<Task>;

    async fn bulk_reopen(
        &self,
        session_id: &str,
        task_ids: Vec<String>,
        note: Option<String>,
    ) -> Result<BulkReport>;

    async fn edit_task(&self, session_id: &str, task_id: &str, patch: TaskPatch) -> Result<Task>;

    async fn delete_task(&self, session_id: &str, task_id: &str, force: bool)
        -> Result<DeleteReport>;

    async fn add_note(&self, session_id: &str, task_id: &str, note: String) -> Result<()>;

    async fn subtask_progress(&self, parent_id: &str) -> Result<SubtaskProgress>;

    async fn start_timer(&self, session_id: &str, task_id: &str) -> Result<Task>;

    async fn stop_timer(&self, session_id: &str, task_id: &str) -> Result<Task>;

    async fn pause_timer(&self, session_id: &str, task_id: &str) -> Result<Task>;

    async fn task_time(&self, task_id: &str) -> Result<TaskTime>;

    async fn tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>>;

    async fn status(&self) -> Result<StatusReport>;

    async fn parallel_summary(&self) -> Result<ParallelSummary>;

    async fn undo_last(&self, session_id: &str) -> Result<UndoReport>;
}
