//! HTTP surface of the coordinator. JSON request/response, conventional
//! status codes: 200 success, 400 malformed, 404 unknown id, 409 invariant
//! violation, 503 store locked beyond the request budget.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::CoreError;
use crate::model::{Session, SessionRole, Task, TaskStatus};
use crate::ops::{
    self, BulkReport, CompleteRequest, NewTask, SubtaskProgress, TaskPatch, TaskTime, UndoReport,
};

use super::{mutate, read_view, ServiceState};

pub fn build_router(state: Arc<ServiceState>) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/tasks", get(tasks))
        .route("/parallel-summary", get(parallel_summary))
        .route("/session/register", post(session_register))
        .route("/session/heartbeat", post(session_heartbeat))
        .route("/session/end", post(session_end))
        .route("/task/create", post(task_create))
        .route("/task/request", post(task_request))
        .route("/task/complete", post(task_complete))
        .route("/task/reopen", post(task_reopen))
        .route("/task/edit", post(task_edit))
        .route("/task/delete", post(task_delete))
        .route("/task/note", post(task_note))
        .route("/task/bulk-complete", post(task_bulk_complete))
        .route("/task/bulk-reopen", post(task_bulk_reopen))
        .route("/subtask/create", post(subtask_create))
        .route("/subtask/progress", get(subtask_progress))
        .route("/task/timer/start", post(timer_start))
        .route("/task/timer/stop", post(timer_stop))
        .route("/task/timer/pause", post(timer_pause))
        .route("/task/time", get(task_time))
        .route("/task/undo", post(task_undo))
        .route("/shutdown", post(shutdown))
        .with_state(state)
}

/// Errors cross the wire as `{"error": message, "kind": kind}` so the
/// client reconstructs the exact error kind.
pub struct ApiError(CoreError);

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            Json(json!({ "error": self.0.to_string(), "kind": self.0.kind() })),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// ─── Reads ───────────────────────────────────────────────────────────────────

async fn status(State(state): State<Arc<ServiceState>>) -> ApiResult<Json<ops::StatusReport>> {
    let mut report =
        read_view(&state, |shared| Ok(ops::status_report(&shared.snap, Utc::now()))).await?;
    report.mode = "parallel".to_string();
    Ok(Json(report))
}

#[derive(Deserialize)]
struct TasksQuery {
    status: Option<String>,
}

async fn tasks(
    State(state): State<Arc<ServiceState>>,
    Query(query): Query<TasksQuery>,
) -> ApiResult<Json<Vec<Task>>> {
    let status = query
        .status
        .as_deref()
        .map(TaskStatus::parse)
        .transpose()?;
    let list = read_view(&state, |shared| Ok(ops::list_tasks(&shared.snap, status))).await?;
    Ok(Json(list))
}

async fn parallel_summary(
    State(state): State<Arc<ServiceState>>,
) -> ApiResult<Json<ops::ParallelSummary>> {
    let summary = read_view(&state, |shared| Ok(ops::parallel_summary(&shared.snap))).await?;
    Ok(Json(summary))
}

// ─── Sessions ────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RegisterBody {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    context: String,
    #[serde(default)]
    labels: Vec<String>,
}

async fn session_register(
    State(state): State<Arc<ServiceState>>,
    Json(body): Json<RegisterBody>,
) -> ApiResult<Json<Session>> {
    let session_id = body
        .session_id
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string()[..8].to_string());
    let role = body
        .role
        .as_deref()
        .map(SessionRole::parse)
        .transpose()?
        .unwrap_or(SessionRole::Worker);

    let session = mutate(&state, move |shared| {
        shared.seen.insert(session_id.clone(), Instant::now());
        Ok(ops::sessions::register(
            &mut shared.snap,
            Utc::now(),
            &session_id,
            role,
            body.context,
            body.labels,
        ))
    })
    .await?;
    Ok(Json(session))
}

#[derive(Deserialize)]
struct SessionIdBody {
    session_id: String,
}

async fn session_heartbeat(
    State(state): State<Arc<ServiceState>>,
    Json(body): Json<SessionIdBody>,
) -> ApiResult<Json<serde_json::Value>> {
    mutate(&state, move |shared| {
        ops::sessions::heartbeat(&mut shared.snap, Utc::now(), &body.session_id)?;
        shared.seen.insert(body.session_id.clone(), Instant::now());
        Ok(())
    })
    .await?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Deserialize)]
struct EndBody {
    session_id: String,
    #[serde(default, alias = "release_tasks")]
    release: Option<bool>,
}

async fn session_end(
    State(state): State<Arc<ServiceState>>,
    Json(body): Json<EndBody>,
) -> ApiResult<Json<serde_json::Value>> {
    mutate(&state, move |shared| {
        let released = ops::sessions::end(
            &mut shared.snap,
            Utc::now(),
            &body.session_id,
            body.release.unwrap_or(true),
        )?;
        shared.seen.remove(&body.session_id);
        Ok(released)
    })
    .await?;
    Ok(Json(json!({ "ok": true })))
}

// ─── Tasks ───────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CreateBody {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(flatten)]
    task: NewTask,
}

async fn task_create(
    State(state): State<Arc<ServiceState>>,
    Json(body): Json<CreateBody>,
) -> ApiResult<Json<Task>> {
    let session_id = body.session_id.unwrap_or_else(|| "system".to_string());
    let task = mutate(&state, move |shared| {
        ops::tasks::create_task(&mut shared.snap, Utc::now(), &session_id, body.task)
    })
    .await?;
    Ok(Json(task))
}

#[derive(Deserialize)]
struct RequestBody {
    session_id: String,
    #[serde(default)]
    preferred_labels: Vec<String>,
}

async fn task_request(
    State(state): State<Arc<ServiceState>>,
    Json(body): Json<RequestBody>,
) -> ApiResult<Json<Option<Task>>> {
    let cfg = state.cfg.clone();
    let task = mutate(&state, move |shared| {
        let claimed = ops::tasks::claim_next(
            &mut shared.snap,
            Utc::now(),
            &body.session_id,
            &body.preferred_labels,
            &cfg,
        )?;
        shared.seen.insert(body.session_id.clone(), Instant::now());
        Ok(claimed)
    })
    .await?;
    Ok(Json(task))
}

#[derive(Deserialize)]
struct CompleteBody {
    session_id: Option<String>,
    #[serde(flatten)]
    request: CompleteRequest,
}

async fn task_complete(
    State(state): State<Arc<ServiceState>>,
    Json(body): Json<CompleteBody>,
) -> ApiResult<Json<Task>> {
    let cfg = state.cfg.clone();
    let session_id = body.session_id.unwrap_or_else(|| "system".to_string());
    let task = mutate(&state, move |shared| {
        let task = ops::tasks::complete_task(
            &mut shared.snap,
            Utc::now(),
            &session_id,
            &body.request,
            &cfg,
        )?;
        shared.seen.insert(session_id.clone(), Instant::now());
        Ok(task)
    })
    .await?;
    Ok(Json(task))
}

#[derive(Deserialize)]
struct ReopenBody {
    task_id: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    note: Option<String>,
}

async fn task_reopen(
    State(state): State<Arc<ServiceState>>,
    Json(body): Json<ReopenBody>,
) -> ApiResult<Json<Task>> {
    let session_id = body.session_id.unwrap_or_else(|| "system".to_string());
    let task = mutate(&state, move |shared| {
        ops::tasks::reopen_task(
            &mut shared.snap,
            Utc::now(),
            &session_id,
            &body.task_id,
            body.note.as_deref(),
        )
    })
    .await?;
    Ok(Json(task))
}

#[derive(Deserialize)]
struct EditBody {
    task_id: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(flatten)]
    patch: TaskPatch,
}

async fn task_edit(
    State(state): State<Arc<ServiceState>>,
    Json(body): Json<EditBody>,
) -> ApiResult<Json<Task>> {
    let session_id = body.session_id.unwrap_or_else(|| "system".to_string());
    let task = mutate(&state, move |shared| {
        ops::tasks::edit_task(
            &mut shared.snap,
            Utc::now(),
            &session_id,
            &body.task_id,
            &body.patch,
        )
    })
    .await?;
    Ok(Json(task))
}

#[derive(Deserialize)]
struct DeleteBody {
    task_id: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    force: bool,
}

async fn task_delete(
    State(state): State<Arc<ServiceState>>,
    Json(body): Json<DeleteBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let session_id = body.session_id.unwrap_or_else(|| "system".to_string());
    let report = mutate(&state, move |shared| {
        ops::tasks::delete_task(
            &mut shared.snap,
            Utc::now(),
            &session_id,
            &body.task_id,
            body.force,
        )
    })
    .await?;
    Ok(Json(
        json!({ "ok": true, "deleted_subtasks": report.deleted_subtasks }),
    ))
}

#[derive(Deserialize)]
struct NoteBody {
    task_id: String,
    session_id: String,
    note: String,
}

async fn task_note(
    State(state): State<Arc<ServiceState>>,
    Json(body): Json<NoteBody>,
) -> ApiResult<Json<serde_json::Value>> {
    mutate(&state, move |shared| {
        ops::tasks::add_note(
            &mut shared.snap,
            Utc::now(),
            &body.session_id,
            &body.task_id,
            &body.note,
        )
    })
    .await?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Deserialize)]
struct BulkCompleteBody {
    task_ids: Vec<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    note: Option<String>,
    #[serde(default)]
    branch: Option<String>,
    #[serde(default)]
    force: bool,
}

async fn task_bulk_complete(
    State(state): State<Arc<ServiceState>>,
    Json(body): Json<BulkCompleteBody>,
) -> ApiResult<Json<BulkReport>> {
    let cfg = state.cfg.clone();
    let session_id = body.session_id.unwrap_or_else(|| "system".to_string());
    let report = mutate(&state, move |shared| {
        Ok(ops::tasks::bulk_complete(
            &mut shared.snap,
            Utc::now(),
            &session_id,
            &body.task_ids,
            body.note,
            body.branch,
            body.force,
            &cfg,
        ))
    })
    .await?;
    Ok(Json(report))
}

#[derive(Deserialize)]
struct BulkReopenBody {
    task_ids: Vec<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    note: Option<String>,
}

async fn task_bulk_reopen(
    State(state): State<Arc<ServiceState>>,
    Json(body): Json<BulkReopenBody>,
) -> ApiResult<Json<BulkReport>> {
    let session_id = body.session_id.unwrap_or_else(|| "system".to_string());
    let report = mutate(&state, move |shared| {
        Ok(ops::tasks::bulk_reopen(
            &mut shared.snap,
            Utc::now(),
            &session_id,
            &body.task_ids,
            body.note.as_deref(),
        ))
    })
    .await?;
    Ok(Json(report))
}

// ─── Subtasks ────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct SubtaskCreateBody {
    parent_id: String,
    #[serde(default)]
    session_id: Option<String>,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    priority: Option<u8>,
    #[serde(default)]
    labels: Vec<String>,
}

async fn subtask_create(
    State(state): State<Arc<ServiceState>>,
    Json(body): Json<SubtaskCreateBody>,
) -> ApiResult<Json<Task>> {
    let session_id = body.session_id.unwrap_or_else(|| "system".to_string());
    let req = NewTask {
        title: body.title,
        description: body.description,
        priority: body.priority,
        labels: body.labels,
        parent_id: Some(body.parent_id),
        ..NewTask::default()
    };
    let task = mutate(&state, move |shared| {
        ops::tasks::create_task(&mut shared.snap, Utc::now(), &session_id, req)
    })
    .await?;
    Ok(Json(task))
}

#[derive(Deserialize)]
struct ProgressQuery {
    parent_id: String,
}

async fn subtask_progress(
    State(state): State<Arc<ServiceState>>,
    Query(query): Query<ProgressQuery>,
) -> ApiResult<Json<SubtaskProgress>> {
    let progress = read_view(&state, |shared| {
        ops::tasks::subtask_progress(&shared.snap, &query.parent_id)
    })
    .await?;
    Ok(Json(progress))
}

// ─── Timers ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct TimerBody {
    task_id: String,
    #[serde(default)]
    session_id: Option<String>,
}

async fn timer_start(
    State(state): State<Arc<ServiceState>>,
    Json(body): Json<TimerBody>,
) -> ApiResult<Json<Task>> {
    let session_id = body.session_id.unwrap_or_else(|| "system".to_string());
    let task = mutate(&state, move |shared| {
        ops::timers::start_timer(&mut shared.snap, Utc::now(), &session_id, &body.task_id)
    })
    .await?;
    Ok(Json(task))
}

async fn timer_stop(
    State(state): State<Arc<ServiceState>>,
    Json(body): Json<TimerBody>,
) -> ApiResult<Json<Task>> {
    let session_id = body.session_id.unwrap_or_else(|| "system".to_string());
    let task = mutate(&state, move |shared| {
        ops::timers::stop_timer(&mut shared.snap, Utc::now(), &session_id, &body.task_id)
    })
    .await?;
    Ok(Json(task))
}

async fn timer_pause(
    State(state): State<Arc<ServiceState>>,
    Json(body): Json<TimerBody>,
) -> ApiResult<Json<Task>> {
    let session_id = body.session_id.unwrap_or_else(|| "system".to_string());
    let task = mutate(&state, move |shared| {
        ops::timers::pause_timer(&mut shared.snap, Utc::now(), &session_id, &body.task_id)
    })
    .await?;
    Ok(Json(task))
}

#[derive(Deserialize)]
struct TimeQuery {
    task_id: String,
}

async fn task_time(
    State(state): State<Arc<ServiceState>>,
    Query(query): Query<TimeQuery>,
) -> ApiResult<Json<TaskTime>> {
    let time = read_view(&state, |shared| {
        ops::timers::task_time(&shared.snap, Utc::now(), &query.task_id)
    })
    .await?;
    Ok(Json(time))
}

// ─── Undo / shutdown ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct UndoBody {
    #[serde(default)]
    session_id: Option<String>,
}

async fn task_undo(
    State(state): State<Arc<ServiceState>>,
    Json(body): Json<UndoBody>,
) -> ApiResult<Json<UndoReport>> {
    let session_id = body.session_id.unwrap_or_else(|| "system".to_string());
    let report = super::undo(&state, session_id).await?;
    Ok(Json(report))
}

async fn shutdown(State(state): State<Arc<ServiceState>>) -> Json<serde_json::Value> {
    state.request_shutdown();
    Json(json!({ "ok": true }))
}
