//! Webhook registration surface: register/list/unregister per-task webhooks.
//! The actual HTTP delivery lives in `helixagent_tasks::notify` behind the
//! `WebhookSender` trait; this module only owns the CRUD endpoints and keeps
//! the Notification Hub's in-memory registration in sync with the
//! repository's durable copy.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use helixagent_tasks::WebhookRegistration;

use crate::errors::TaskApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterWebhookRequest {
    pub task_id: String,
    pub url: String,
    pub secret: String,
    #[serde(default)]
    pub events_subscribed: Vec<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// `POST /v1/webhooks` — registers with both the Notification Hub (for live
/// dispatch) and the Repository (for durable lookup/listing).
pub async fn register_webhook(
    State(state): State<AppState>,
    Json(req): Json<RegisterWebhookRequest>,
) -> Result<Response, TaskApiError> {
    // Confirms the task actually exists before accepting a registration.
    state.repository.get(&req.task_id).await?;

    let hook = WebhookRegistration {
        id: format!("wh_{}", Uuid::new_v4().simple()),
        task_id: req.task_id,
        url: req.url,
        secret: req.secret,
        events_subscribed: req.events_subscribed,
        headers: req.headers,
    };

    state.repository.register_webhook(hook.clone()).await?;
    state.hub.register_webhook(hook.clone());

    Ok((StatusCode::CREATED, Json(json!({ "id": hook.id, "task_id": hook.task_id, "url": hook.url }))).into_response())
}

/// `GET /v1/tasks/:id/webhooks`
pub async fn list_webhooks(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<serde_json::Value>, TaskApiError> {
    let hooks = state.repository.webhooks_for_task(&task_id).await?;
    let data: Vec<serde_json::Value> = hooks
        .iter()
        .map(|h| json!({ "id": h.id, "task_id": h.task_id, "url": h.url, "events_subscribed": h.events_subscribed }))
        .collect();
    Ok(Json(json!({ "data": data })))
}

/// `DELETE /v1/tasks/:id/webhooks/:webhook_id`
pub async fn delete_webhook(
    State(state): State<AppState>,
    Path((task_id, webhook_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, TaskApiError> {
    state.repository.delete_webhook(&task_id, &webhook_id).await?;
    state.hub.unregister_webhook(&task_id, &webhook_id);
    Ok(Json(json!({ "deleted": true })))
}
