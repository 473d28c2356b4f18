//! Parallel mode: operations become HTTP requests to the coordinator,
//! retried with exponential backoff on transient transport failures. The
//! coordinator's error bodies carry the error kind, so failures surface
//! exactly as they would from the local store.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::error::{CoreError, Result};
use crate::model::{Session, SessionRole, Task, TaskStatus};
use crate::ops::{
    BulkReport, CompleteRequest, DeleteReport, NewTask, ParallelSummary, StatusReport,
    SubtaskProgress, TaskPatch, TaskTime, UndoReport,
};

use super::backend::Backend;
use super::retry::{retry_with_backoff, RetryConfig};

const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);
const CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2);

pub struct RemoteBackend {
    base: String,
    http: reqwest::Client,
    retry: RetryConfig,
}

impl RemoteBackend {
    pub fn new(port: u16) -> Result<Self> {
        Self::with_retry(port, RetryConfig::default())
    }

    pub fn with_retry(port: u16, retry: RetryConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| CoreError::Internal(format!("http client: {e}")))?;
        Ok(Self {
            base: format!("http://127.0.0.1:{port}"),
            http,
            retry,
        })
    }

    /// One-shot liveness check, no retries. A stale PID file fails this
    /// the same way a missing coordinator does.
    pub async fn probe(port: u16) -> bool {
        match Self::with_retry(port, RetryConfig::no_retry()) {
            Ok(backend) => backend.get::<StatusReport>("/status").await.is_ok(),
            Err(_) => false,
        }
    }

    /// Best-effort shutdown request; used when leaving parallel mode.
    pub async fn request_shutdown(&self) -> Result<()> {
        let _: Value = self.post("/shutdown", json!({})).await?;
        Ok(())
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        retry_with_backoff(&self.retry, || async {
            let response = self
                .http
                .get(format!("{}{}", self.base, path))
                .send()
                .await
                .map_err(transport_error)?;
            decode(response).await
        })
        .await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T> {
        retry_with_backoff(&self.retry, || async {
            let response = self
                .http
                .post(format!("{}{}", self.base, path))
                .json(&body)
                .send()
                .await
                .map_err(transport_error)?;
            decode(response).await
        })
        .await
    }
}

fn transport_error(e: reqwest::Error) -> CoreError {
    CoreError::Unavailable(format!("coordinator unreachable: {e}"))
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let bytes = response.bytes().await.map_err(transport_error)?;
    if status.is_success() {
        return serde_json::from_slice(&bytes)
            .map_err(|e| CoreError::Internal(format!("malformed coordinator response: {e}")));
    }
    Err(decode_error(status, &bytes))
}

fn decode_error(status: StatusCode, bytes: &[u8]) -> CoreError {
    if let Ok(body) = serde_json::from_slice::<Value>(bytes) {
        let message = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("coordinator error")
            .to_string();
        if let Some(kind) = body.get("kind").and_then(Value::as_str) {
            return CoreError::from_kind(kind, message);
        }
        return error_from_status(status, message);
    }
    error_from_status(status, format!("HTTP {status}"))
}

fn error_from_status(status: StatusCode, message: String) -> CoreError {
    match status.as_u16() {
        400 | 422 => CoreError::InvalidArgument(message),
        404 => CoreError::NotFound(message),
        409 => CoreError::Conflict(message),
        503 => CoreError::LockTimeout(message),
        _ => CoreError::Internal(message),
    }
}

#[async_trait]
impl Backend for RemoteBackend {
    async fn register(
        &self,
        session_id: &str,
        role: SessionRole,
        context: String,
        labels: Vec<String>,
    ) -> Result<Session> {
        self.post(
            "/session/register",
            json!({
                "session_id": session_id,
                "role": role.as_str(),
                "context": context,
                "labels": labels,
            }),
        )
        .await
    }

    async fn heartbeat(&self, session_id: &str) -> Result<()> {
        let _: Value = self
            .post("/session/heartbeat", json!({ "session_id": session_id }))
            .await?;
        Ok(())
    }

    async fn end_session(&self, session_id: &str, release_tasks: bool) -> Result<()> {
        let _: Value = self
            .post(
                "/session/end",
                json!({ "session_id": session_id, "release": release_tasks }),
            )
            .await?;
        Ok(())
    }

    async fn create_task(&self, session_id: &str, req: NewTask) -> Result<Task> {
        let mut body = serde_json::to_value(&req)?;
        body["session_id"] = json!(session_id);
        self.post("/task/create", body).await
    }

    async fn request_task(
        &self,
        session_id: &str,
        preferred_labels: Vec<String>,
    ) -> Result<Option<Task>> {
        self.post(
            "/task/request",
            json!({ "session_id": session_id, "preferred_labels": preferred_labels }),
        )
        .await
    }

    async fn complete_task(&self, session_id: &str, req: CompleteRequest) -> Result<Task> {
        let mut body = serde_json::to_value(&req)?;
        body["session_id"] = json!(session_id);
        self.post("/task/complete", body).await
    }

    async fn bulk_complete(
        &self,
        session_id: &str,
        task_ids: Vec<String>,
        note: Option<String>,
        branch: Option<String>,
        force: bool,
    ) -> Result<BulkReport> {
        self.post(
            "/task/bulk-complete",
            json!({
                "task_ids": task_ids,
                "session_id": session_id,
                "note": note,
                "branch": branch,
                "force": force,
            }),
        )
        .await
    }

    async fn reopen_task(
        &self,
        session_id: &str,
        task_id: &str,
        note: Option<String>,
    ) -> Result<Task> {
        self.post(
            "/task/reopen",
            json!({ "task_id": task_id, "session_id": session_id, "note": note }),
        )
        .await
    }

    async fn bulk_reopen(
        &self,
        session_id: &str,
        task_ids: Vec<String>,
        note: Option<String>,
    ) -> Result<BulkReport> {
        self.post(
            "/task/bulk-reopen",
            json!({ "task_ids": task_ids, "session_id": session_id, "note": note }),
        )
        .await
    }

    async fn edit_task(&self, session_id: &str, task_id: &str, patch: TaskPatch) -> Result<Task> {
        let mut body = serde_json::to_value(&patch)?;
        body["task_id"] = json!(task_id);
        body["session_id"] = json!(session_id);
        self.post("/task/edit", body).await
    }

    async fn delete_task(
        &self,
        session_id: &str,
        task_id: &str,
        force: bool,
    ) -> Result<DeleteReport> {
        self.post(
            "/task/delete",
            json!({ "task_id": task_id, "session_id": session_id, "force": force }),
        )
        .await
    }

    async fn add_note(&self, session_id: &str, task_id: &str, note: String) -> Result<()> {
        let _: Value = self
            .post(
                "/task/note",
                json!({ "task_id": task_id, "session_id": session_id, "note": note }),
            )
            .await?;
        Ok(())
    }

    async fn subtask_progress(&self, parent_id: &str) -> Result<SubtaskProgress> {
        self.get(&format!("/subtask/progress?parent_id={parent_id}"))
            .await
    }

    async fn start_timer(&self, session_id: &str, task_id: &str) -> Result<Task> {
        self.post(
            "/task/timer/start",
            json!({ "task_id": task_id, "session_id": session_id }),
        )
        .await
    }

    async fn stop_timer(&self, session_id: &str, task_id: &str) -> Result<Task> {
        self.post(
            "/task/timer/stop",
            json!({ "task_id": task_id, "session_id": session_id }),
        )
        .await
    }

    async fn pause_timer(&self, session_id: &str, task_id: &str) -> Result<Task> {
        self.post(
            "/task/timer/pause",
            json!({ "task_id": task_id, "session_id": session_id }),
        )
        .await
    }

    async fn task_time(&self, task_id: &str) -> Result<TaskTime> {
        self.get(&format!("/task/time?task_id={task_id}")).await
    }

    async fn tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        let path = match status {
            Some(status) => format!("/tasks?status={status}"),
            None => "/tasks".to_string(),
        };
        self.get(&path).await
    }

    async fn status(&self) -> Result<StatusReport> {
        self.get("/status").await
    }

    async fn parallel_summary(&self) -> Result<ParallelSummary> {
        self.get("/parallel-summary").await
    }

    async fn undo_last(&self, session_id: &str) -> Result<UndoReport> {
        self.post("/task/undo", json!({ "session_id": session_id }))
            .await
    }
}
