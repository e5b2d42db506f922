//! `/v1/models`, `/v1/chat/completions`, `/v1/chat/completions/stream` and the
//! legacy `/v1/completions`. Grounded in the teacher's `handle_chat`
//! (service/src/main.rs): auth check, stream-flag branch, provider dispatch —
//! generalized here to dispatch into `RequestPipeline` instead of a single
//! provider, and with the two streaming entry points collapsed onto
//! `sse::build_chat_stream` per the Open Question in the original spec.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use helixagent_gateway::{ChatMessage, ChatRole, Tool};

use crate::errors::ChatError;
use crate::sse::build_chat_stream;
use crate::state::AppState;

/// Public model id clients always see, mirroring `MODEL_ID_DEBATE`.
const MODEL_ID_DEBATE: &str = "helixagent-debate";
const MODEL_ID_ENSEMBLE: &str = "helixagent-ensemble";

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    #[allow(dead_code)]
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub tools: Vec<Tool>,
}

#[derive(Debug, Deserialize)]
pub struct LegacyCompletionRequest {
    #[allow(dead_code)]
    pub model: Option<String>,
    pub prompt: String,
    #[serde(default)]
    pub stream: bool,
}

pub async fn list_models() -> Json<serde_json::Value> {
    Json(json!({
        "object": "list",
        "data": [{
            "id": MODEL_ID_DEBATE,
            "object": "model",
            "created": now_unix(),
            "owned_by": "helixagent",
        }]
    }))
}

/// Shared by `POST /v1/chat/completions` (`stream` flag) and
/// `POST /v1/chat/completions/stream` (always SSE) — the collapsed single
/// code path referenced in `sse::build_chat_stream`'s doc comment.
pub async fn chat_completions(
    State(state): State<AppState>,
    Json(req): Json<ChatCompletionRequest>,
) -> Result<Response, ChatError> {
    if req.stream {
        return stream_completions_inner(state, req).await;
    }
    non_streaming_completions(state, req).await.map(IntoResponse::into_response)
}

pub async fn chat_completions_stream(
    State(state): State<AppState>,
    Json(req): Json<ChatCompletionRequest>,
) -> Result<Response, ChatError> {
    stream_completions_inner(state, req).await
}

async fn stream_completions_inner(state: AppState, req: ChatCompletionRequest) -> Result<Response, ChatError> {
    let stream = build_chat_stream(Arc::clone(&state.pipeline), MODEL_ID_ENSEMBLE, req.messages, req.tools).await?;
    Ok(stream.into_response())
}

async fn non_streaming_completions(state: AppState, req: ChatCompletionRequest) -> Result<Json<serde_json::Value>, ChatError> {
    let result = state.pipeline.handle_chat(req.messages, req.tools).await?;
    let resp = result.response;

    let message = if resp.tool_calls.is_empty() {
        json!({ "role": "assistant", "content": resp.content })
    } else {
        json!({
            "role": "assistant",
            "content": resp.content,
            "tool_calls": resp.tool_calls.iter().map(|c| json!({
                "id": c.id,
                "type": c.call_type,
                "function": { "name": c.function.name, "arguments": c.function.arguments },
            })).collect::<Vec<_>>(),
        })
    };

    let finish_reason = match resp.finish_reason.as_wire_str() {
        "" => "stop",
        other => other,
    };

    let usage = resp.tokens_used.unwrap_or_default();
    Ok(Json(json!({
        "id": format!("chatcmpl-{}", Uuid::new_v4().simple()),
        "object": "chat.completion",
        "created": now_unix(),
        "model": MODEL_ID_ENSEMBLE,
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": finish_reason,
        }],
        "usage": {
            "prompt_tokens": usage.input_tokens,
            "completion_tokens": usage.output_tokens,
            "total_tokens": usage.input_tokens + usage.output_tokens,
        },
    })))
}

/// `POST /v1/completions`: legacy text completion, delegates to the same
/// pipeline by wrapping the prompt as a single user message.
pub async fn legacy_completions(
    State(state): State<AppState>,
    Json(req): Json<LegacyCompletionRequest>,
) -> Result<Response, ChatError> {
    let messages = vec![ChatMessage {
        role: Some(ChatRole::User),
        content: Some(req.prompt),
        ..Default::default()
    }];

    if req.stream {
        let stream = build_chat_stream(Arc::clone(&state.pipeline), MODEL_ID_ENSEMBLE, messages, Vec::new()).await?;
        return Ok(stream.into_response());
    }

    let result = state.pipeline.handle_chat(messages, Vec::new()).await?;
    let resp = result.response;
    let finish_reason = match resp.finish_reason.as_wire_str() {
        "" => "stop",
        other => other,
    };
    Ok(Json(json!({
        "id": format!("cmpl-{}", Uuid::new_v4().simple()),
        "object": "text_completion",
        "created": now_unix(),
        "model": MODEL_ID_ENSEMBLE,
        "choices": [{
            "text": resp.content,
            "index": 0,
            "finish_reason": finish_reason,
        }],
    }))
    .into_response())
}
