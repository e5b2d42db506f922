//! Error envelopes at the HTTP edge. Chat endpoints use the OpenAI-compatible
//! `{error:{message,type,code}}` shape; task endpoints use the plain
//! `{error:"..."}` shape. Grounded in the teacher's `(StatusCode, String)`
//! tuple responses (service/src/main.rs) — here widened to structured JSON
//! bodies but kept to the same "status + body, nothing else" axum idiom.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use helixagent_gateway::GatewayError;
use helixagent_tasks::TaskError;

/// Wraps a `GatewayError` so it can be returned directly from a chat handler.
pub struct ChatError(pub GatewayError);

impl From<GatewayError> for ChatError {
    fn from(err: GatewayError) -> Self {
        ChatError(err)
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(json!({
            "error": {
                "message": self.0.to_string(),
                "type": self.0.kind(),
                "code": self.0.kind(),
            }
        }));
        let mut response = (status, body).into_response();
        if let Some(retry_after) = self.0.retry_after() {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert("retry-after", value);
            }
        }
        response
    }
}

/// Wraps a `TaskError` so it can be returned directly from a task handler.
pub struct TaskApiError(pub TaskError);

impl From<TaskError> for TaskApiError {
    fn from(err: TaskError) -> Self {
        TaskApiError(err)
    }
}

impl IntoResponse for TaskApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}
