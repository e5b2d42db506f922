//! SSE chunk synthesis for `/v1/chat/completions` (`stream=true`) and
//! `/v1/chat/completions/stream`. Grounded in the teacher's
//! `render_stream_chunk`/`StreamState` accumulator (service/src/main.rs), but
//! the debate engine (unlike the teacher's single-provider call) never yields
//! incremental `ResponseChunk`s — `DebateEngine::run` only returns one final
//! `LLMResponse`. So instead of forwarding a live provider stream, this module
//! runs the pipeline to completion under one overall deadline and synthesizes
//! the OpenAI-conformant delta sequence from the finished response. This also
//! resolves the two near-duplicate chat entry points into one code path: both
//! `stream=true` and `/chat/completions/stream` call `build_chat_stream`.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream};
use serde_json::{json, Value};
use uuid::Uuid;

use helixagent_gateway::{ChatMessage, LLMResponse, RequestPipeline, Tool};

use crate::errors::ChatError;

/// Hard cap on total stream duration (spec §4.7/§5).
const OVERALL_TIMEOUT: Duration = Duration::from_secs(120);
const CONTENT_CHUNK_LEN: usize = 48;

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

fn content_pieces(content: &str) -> Vec<String> {
    content
        .chars()
        .collect::<Vec<char>>()
        .chunks(CONTENT_CHUNK_LEN)
        .map(|c| c.iter().collect())
        .collect()
}

fn chunk_object(id: &str, model_id: &str, delta: Value, finish_reason: Option<&str>) -> Value {
    json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": now_unix(),
        "model": model_id,
        "system_fingerprint": "fp_helixagent_v1",
        "choices": [{
            "index": 0,
            "delta": delta,
            "logprobs": Value::Null,
            "finish_reason": finish_reason,
        }],
    })
}

/// Builds the full delta sequence for one completed response: mandatory first
/// chunk, content chunks, a tool_calls chunk when present, and a finish_reason
/// attached to the last meaningful chunk (or a synthesized empty-delta stop
/// chunk when the response carries neither content nor tool calls).
fn synthesize_chunks(id: &str, model_id: &str, resp: &LLMResponse) -> Vec<Value> {
    let mut chunks = vec![chunk_object(id, model_id, json!({"role": "assistant", "content": ""}), None)];

    let finish = match resp.finish_reason.as_wire_str() {
        "" => "stop",
        other => other,
    };
    let has_tool_calls = !resp.tool_calls.is_empty();
    let pieces = content_pieces(&resp.content);

    for (i, piece) in pieces.iter().enumerate() {
        let is_last = i == pieces.len() - 1;
        let finish_reason = if is_last && !has_tool_calls { Some(finish) } else { None };
        chunks.push(chunk_object(id, model_id, json!({"content": piece}), finish_reason));
    }

    if has_tool_calls {
        let tool_calls: Vec<Value> = resp
            .tool_calls
            .iter()
            .enumerate()
            .map(|(i, call)| {
                json!({
                    "index": i,
                    "id": call.id,
                    "type": call.call_type,
                    "function": {
                        "name": call.function.name,
                        "arguments": call.function.arguments,
                    },
                })
            })
            .collect();
        chunks.push(chunk_object(id, model_id, json!({"tool_calls": tool_calls}), Some(finish)));
    } else if pieces.is_empty() {
        chunks.push(chunk_object(id, model_id, json!({}), Some(finish)));
    }

    chunks
}

/// The S4 timeout sequence: the mandatory first chunk, then the synthesized
/// empty-delta stop chunk, `[DONE]` always follows from the caller.
fn timeout_chunks(id: &str, model_id: &str) -> Vec<Value> {
    vec![
        chunk_object(id, model_id, json!({"role": "assistant", "content": ""}), None),
        chunk_object(id, model_id, json!({}), Some("stop")),
    ]
}

fn to_events(chunks: Vec<Value>) -> Vec<Result<Event, Infallible>> {
    let mut events: Vec<Result<Event, Infallible>> = chunks
        .into_iter()
        .map(|c| Ok(Event::default().data(c.to_string())))
        .collect();
    events.push(Ok(Event::default().data("[DONE]")));
    events
}

pub type ChatStream = Sse<stream::Iter<std::vec::IntoIter<Result<Event, Infallible>>>>;

/// Runs `pipeline.handle_chat` under the overall 120 s deadline and returns
/// the finished SSE stream. A pipeline error returned before the deadline is
/// surfaced as `ChatError` — no SSE bytes have been written yet, so the
/// caller can still answer with a plain HTTP error status. A deadline expiry
/// instead degrades into the S4 synthesized-stop-chunk sequence, since by
/// then the client is already expecting an SSE body.
pub async fn build_chat_stream(
    pipeline: Arc<RequestPipeline>,
    model_id: &'static str,
    messages: Vec<ChatMessage>,
    tools: Vec<Tool>,
) -> Result<ChatStream, ChatError> {
    let id = format!("chatcmpl-{}", Uuid::new_v4().simple());

    let chunks = match tokio::time::timeout(OVERALL_TIMEOUT, pipeline.handle_chat(messages, tools)).await {
        Ok(Ok(result)) => synthesize_chunks(&id, model_id, &result.response),
        Ok(Err(e)) => return Err(ChatError(e)),
        Err(_elapsed) => timeout_chunks(&id, model_id),
    };

    let events = to_events(chunks);
    Ok(Sse::new(stream::iter(events)).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("keep-alive")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use helixagent_gateway::{FinishReason, FunctionCall, ToolCall, Usage};

    fn resp(content: &str, finish_reason: FinishReason, tool_calls: Vec<ToolCall>) -> LLMResponse {
        LLMResponse {
            id: "r1".into(),
            content: content.into(),
            finish_reason,
            tool_calls,
            tokens_used: Some(Usage::default()),
            provider_name: "test".into(),
            created_at: 0,
        }
    }

    #[test]
    fn first_chunk_is_role_and_empty_content() {
        let chunks = synthesize_chunks("id1", "helixagent-ensemble", &resp("hello", FinishReason::Stop, vec![]));
        let first = &chunks[0];
        assert_eq!(first["choices"][0]["delta"]["role"], "assistant");
        assert_eq!(first["choices"][0]["delta"]["content"], "");
    }

    #[test]
    fn exactly_one_chunk_carries_finish_reason() {
        let chunks = synthesize_chunks("id1", "helixagent-ensemble", &resp("hello world", FinishReason::Stop, vec![]));
        let with_finish = chunks.iter().filter(|c| !c["choices"][0]["finish_reason"].is_null()).count();
        assert_eq!(with_finish, 1);
    }

    #[test]
    fn empty_response_still_produces_single_stop_chunk() {
        let chunks = synthesize_chunks("id1", "helixagent-ensemble", &resp("", FinishReason::None, vec![]));
        assert_eq!(chunks.last().unwrap()["choices"][0]["finish_reason"], "stop");
    }

    #[test]
    fn tool_calls_chunk_carries_finish_reason_tool_calls() {
        let call = ToolCall {
            id: "call_1".into(),
            call_type: "function".into(),
            function: FunctionCall { name: "Glob".into(), arguments: "{}".into() },
            index: Some(0),
        };
        let chunks = synthesize_chunks("id1", "helixagent-ensemble", &resp("", FinishReason::ToolCalls, vec![call]));
        let last = chunks.last().unwrap();
        assert_eq!(last["choices"][0]["finish_reason"], "tool_calls");
        assert!(last["choices"][0]["delta"]["tool_calls"].is_array());
    }

    #[test]
    fn timeout_sequence_has_first_and_stop_chunk_only() {
        let chunks = timeout_chunks("id1", "helixagent-ensemble");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1]["choices"][0]["finish_reason"], "stop");
    }
}
