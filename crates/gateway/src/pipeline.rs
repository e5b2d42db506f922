//! Request Pipeline: OpenAI-compatible parse → route → respond. Grounded in
//! the teacher's `handle_chat`/`map_request_messages` (service/src/main.rs):
//! same decision tree (tool-result detection before debate), same SSE chunk
//! emission style via a scan-like accumulator, generalized to the ensemble +
//! five-position debate instead of a single provider call.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use regex::Regex;

use crate::chat::{ChatMessage, ChatRole, FinishReason, Tool, ToolCall};
use crate::debate::{DebateEngine, DebateSession, DebateTeamConfig};
use crate::dialogue::{format_conclusion, format_introduction, format_turn};
use crate::ensemble::{EnsembleConfig, EnsembleService};
use crate::error::GatewayError;
use crate::registry::{LLMRequest, ProviderRegistry};
use crate::toolcalls::generate_action_tool_calls;
use crate::LLMResponse;

/// Public model id clients always see.
pub const MODEL_ID_DEBATE: &str = "helixagent-debate";
/// Model id stamped on outgoing responses.
pub const MODEL_ID_ENSEMBLE: &str = "helixagent-ensemble";

/// Per-provider timeout while walking the tool-result direct-processing
/// fallback chain.
pub const DIRECT_PROCESSING_PROVIDER_TIMEOUT_S: u64 = 60;
/// Overall deadline for tool-result direct processing.
pub const DIRECT_PROCESSING_OVERALL_TIMEOUT_S: u64 = 420;
/// Direct processing tries up to this many providers before giving up.
pub const DIRECT_PROCESSING_MAX_ATTEMPTS: usize = 6;

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// `isToolResultProcessingTurn`: true iff the last non-system message is a
/// tool result turn (Testable Property 5).
pub fn is_tool_result_processing_turn(messages: &[ChatMessage]) -> bool {
    messages
        .iter()
        .rev()
        .find(|m| m.role != Some(ChatRole::System))
        .map(|m| m.is_tool_result())
        .unwrap_or(false)
}

/// Rewrites tool-result/tool-call messages for the upstream provider:
/// - role `tool` or any message bearing `tool_call_id` becomes role `user`
///   with content wrapped as `TOOL EXECUTION RESULT:\n```\n{content}\n```\n\nPlease analyze...`.
/// - assistant messages carrying `tool_calls[]` become plain assistant
///   messages whose content enumerates the executed tools.
pub fn rewrite_tool_messages(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    messages
        .iter()
        .map(|m| {
            if m.is_tool_result() {
                let payload = m.content.clone().unwrap_or_default();
                let payload = if payload.is_empty() {
                    "(no output)".to_string()
                } else {
                    payload
                };
                ChatMessage::user(format!(
                    "TOOL EXECUTION RESULT:\n```\n{payload}\n```\n\nPlease analyze this result and continue."
                ))
            } else if let Some(calls) = &m.tool_calls {
                if !calls.is_empty() {
                    let summary = calls
                        .iter()
                        .map(|c| c.function.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ");
                    ChatMessage::assistant(format!("Executed tools: {summary}"))
                } else {
                    m.clone()
                }
            } else {
                m.clone()
            }
        })
        .collect()
}

fn follow_up_regex() -> Regex {
    Regex::new(r"(?i)^(yes|ok|okay|sure|proceed|go|y|yep|yeah|please|do)\b\s*(\d+(\.\d+)?)?\s*[.)!]?\s*$")
        .expect("static regex is valid")
}

fn numbered_options(text: &str) -> Vec<(u32, String)> {
    let option_re = Regex::new(r"(?m)^(\d+)[.)]\s*(.+)$").expect("static regex is valid");
    option_re
        .captures_iter(text)
        .filter_map(|c| {
            let n: u32 = c.get(1)?.as_str().parse().ok()?;
            Some((n, c.get(2)?.as_str().trim().to_string()))
        })
        .collect()
}

/// Detects the follow-up grammar (`yes 1.`, `ok`, ...) combined with a recent
/// assistant message offering numbered options, and rewrites the user message
/// into an action-required expansion. Returns `None` when the grammar doesn't
/// match or no numbered options are present.
pub fn expand_follow_up(messages: &[ChatMessage]) -> Option<ChatMessage> {
    let last_user = messages.last()?;
    if last_user.role != Some(ChatRole::User) {
        return None;
    }
    let content = last_user.content.as_deref().unwrap_or("").trim();
    let re = follow_up_regex();
    let caps = re.captures(content)?;

    let recent_assistant = messages
        .iter()
        .rev()
        .skip(1)
        .find(|m| m.role == Some(ChatRole::Assistant))?;
    let assistant_text = recent_assistant.content.as_deref().unwrap_or("");
    let options = numbered_options(assistant_text);
    if options.is_empty() {
        return None;
    }

    let selected_num: u32 = caps
        .get(2)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(1);
    let selected_text = options
        .iter()
        .find(|(n, _)| *n == selected_num)
        .map(|(_, t)| t.clone())
        .unwrap_or_else(|| options[0].1.clone());

    Some(ChatMessage::user(format!(
        "The user selected option {selected_num}: \"{selected_text}\". Please proceed with \
         the selected option {selected_num} — {selected_text} — now.",
    )))
}

/// Result of routing a chat/completions request.
pub struct PipelineResult {
    pub response: LLMResponse,
    pub took_direct_path: bool,
}

pub struct RequestPipeline {
    registry: Arc<ProviderRegistry>,
}

impl RequestPipeline {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    /// Direct-Processing path: tool-result turns never enter debate. Tries up
    /// to `DIRECT_PROCESSING_MAX_ATTEMPTS` score-ranked providers, each
    /// bounded by `DIRECT_PROCESSING_PROVIDER_TIMEOUT_S`, the whole walk
    /// bounded by `DIRECT_PROCESSING_OVERALL_TIMEOUT_S`.
    async fn run_direct_processing(
        &self,
        messages: &[ChatMessage],
        tools: &[Tool],
    ) -> Result<LLMResponse, GatewayError> {
        let rewritten = rewrite_tool_messages(messages);
        let handles = self
            .registry
            .list_handles()
            .into_iter()
            .take(DIRECT_PROCESSING_MAX_ATTEMPTS);

        let walk = async {
            let mut errors = Vec::new();
            for handle in handles {
                let req = LLMRequest {
                    id: format!("direct-{}", uuid::Uuid::new_v4()),
                    session_id: String::new(),
                    user_id: None,
                    messages: rewritten.clone(),
                    params: crate::params::LLMParams::new(),
                    tools: tools.to_vec(),
                    created_at: now_unix(),
                };
                let attempt = tokio::time::timeout(
                    std::time::Duration::from_secs(DIRECT_PROCESSING_PROVIDER_TIMEOUT_S),
                    handle.complete(&req),
                )
                .await;
                match attempt {
                    Ok(Ok(resp)) => return Ok(resp),
                    Ok(Err(e)) => errors.push(e),
                    Err(_elapsed) => errors.push(GatewayError::UpstreamUnavailable(format!(
                        "{} timed out after {DIRECT_PROCESSING_PROVIDER_TIMEOUT_S}s",
                        handle.name()
                    ))),
                }
            }
            Err(GatewayError::most_severe(errors)
                .unwrap_or_else(|| GatewayError::ConfigurationError("no live providers registered".into())))
        };

        match tokio::time::timeout(
            std::time::Duration::from_secs(DIRECT_PROCESSING_OVERALL_TIMEOUT_S),
            walk,
        )
        .await
        {
            Ok(result) => result,
            Err(_elapsed) => Err(GatewayError::UpstreamUnavailable(format!(
                "direct processing exceeded overall deadline of {DIRECT_PROCESSING_OVERALL_TIMEOUT_S}s"
            ))),
        }
    }

    /// Runs the full five-position debate, then applies the Tool-Call
    /// Synthesizer and Dialogue Formatter over the result. The response
    /// content is the full dialogue transcript: introduction, each
    /// position's framed turn in order, then the synthesized conclusion —
    /// all three of the formatter's deterministic artifacts, not just the
    /// final answer.
    async fn run_debate(
        &self,
        topic: &str,
        tools: &[Tool],
    ) -> Result<LLMResponse, GatewayError> {
        let team = DebateTeamConfig::from_registry(&self.registry, MODEL_ID_ENSEMBLE)
            .ok_or_else(|| GatewayError::ConfigurationError("debate team unavailable".into()))?;
        let mut engine = DebateEngine::new(team);
        let session = DebateSession::new(topic, tools.to_vec());

        let (mut resp, session) = engine.run(session).await?;

        let synthesized_calls = generate_action_tool_calls(topic, &resp.content, tools, &[]);
        if !synthesized_calls.is_empty() {
            resp.tool_calls = synthesized_calls;
            resp.finish_reason = FinishReason::ToolCalls;
        } else if resp.finish_reason == FinishReason::None {
            resp.finish_reason = FinishReason::Stop;
        }

        let mut transcript = format_introduction(topic);
        for (position, text) in &session.previous_responses {
            transcript.push_str(&frame_turn(*position, text));
            transcript.push_str("\n\n");
        }
        transcript.push_str(&format_conclusion(&resp.content));
        resp.content = transcript;
        Ok(resp)
    }

    /// Evaluates the decision tree in order: follow-up expansion, then
    /// tool-result direct processing, then debate.
    pub async fn handle_chat(
        &self,
        mut messages: Vec<ChatMessage>,
        tools: Vec<Tool>,
    ) -> Result<PipelineResult, GatewayError> {
        if messages.is_empty() {
            return Err(GatewayError::InvalidRequest("messages must not be empty".into()));
        }

        if is_tool_result_processing_turn(&messages) {
            let resp = self.run_direct_processing(&messages, &tools).await?;
            return Ok(PipelineResult {
                response: resp,
                took_direct_path: true,
            });
        }

        if let Some(expanded) = expand_follow_up(&messages) {
            let last = messages.len() - 1;
            messages[last] = expanded;
        }

        let topic = messages
            .last()
            .and_then(|m| m.content.clone())
            .unwrap_or_default();
        let resp = self.run_debate(&topic, &tools).await?;
        Ok(PipelineResult {
            response: resp,
            took_direct_path: false,
        })
    }
}

/// Renders one debate turn as a dialogue-framed string, used when assembling
/// the full transcript in `run_debate`.
pub fn frame_turn(position: crate::debate::Position, text: &str) -> String {
    format_turn(position, text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::FunctionCall;
    use crate::registry::{NoopScoreSource, Provider, ProviderRegistry};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct SlowProvider;

    #[async_trait]
    impl Provider for SlowProvider {
        fn name(&self) -> &str {
            "slow"
        }

        async fn complete(&self, _req: &LLMRequest) -> Result<LLMResponse, GatewayError> {
            tokio::time::sleep(std::time::Duration::from_secs(
                DIRECT_PROCESSING_PROVIDER_TIMEOUT_S + 1,
            ))
            .await;
            unreachable!("the timeout should fire first");
        }

        async fn stream(
            &self,
            _req: &LLMRequest,
        ) -> Result<
            std::pin::Pin<
                Box<dyn futures::Stream<Item = Result<crate::chat::ResponseChunk, GatewayError>> + Send>,
            >,
            GatewayError,
        > {
            unimplemented!()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn direct_processing_times_out_a_hanging_provider() {
        let registry = Arc::new(ProviderRegistry::new(Arc::new(NoopScoreSource)));
        registry.register(Arc::new(SlowProvider));
        let pipeline = RequestPipeline::new(registry);

        let messages = vec![ChatMessage {
            role: Some(ChatRole::Tool),
            content: Some("result".to_string()),
            tool_call_id: Some("call_1".to_string()),
            ..Default::default()
        }];

        let err = pipeline.run_direct_processing(&messages, &[]).await.unwrap_err();
        assert_eq!(err.status_code(), 502);
    }

    fn tool_result_message(call_id: &str, content: &str) -> ChatMessage {
        ChatMessage {
            role: Some(ChatRole::Tool),
            content: Some(content.to_string()),
            tool_call_id: Some(call_id.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn tool_result_turn_detected_when_last_message_is_tool() {
        let messages = vec![
            ChatMessage::user("list files"),
            ChatMessage {
                role: Some(ChatRole::Assistant),
                tool_calls: Some(vec![ToolCall {
                    id: "call_1".into(),
                    call_type: "function".into(),
                    function: FunctionCall {
                        name: "Glob".into(),
                        arguments: "{}".into(),
                    },
                    index: None,
                }]),
                ..Default::default()
            },
            tool_result_message("call_1", "[\"main.go\"]"),
        ];
        assert!(is_tool_result_processing_turn(&messages));
    }

    #[test]
    fn new_user_message_after_tool_result_is_not_a_tool_turn() {
        let messages = vec![
            tool_result_message("call_1", "[]"),
            ChatMessage::user("what about now?"),
        ];
        assert!(!is_tool_result_processing_turn(&messages));
    }

    #[test]
    fn rewrite_wraps_tool_result_and_empty_payload() {
        let messages = vec![tool_result_message("call_1", "")];
        let rewritten = rewrite_tool_messages(&messages);
        assert_eq!(rewritten[0].role, Some(ChatRole::User));
        let content = rewritten[0].content.as_deref().unwrap();
        assert!(content.contains("TOOL EXECUTION RESULT:"));
        assert!(content.contains("(no output)"));
        assert!(content.contains("```"));
    }

    #[test]
    fn no_tool_result_appears_after_rewrite() {
        let messages = vec![tool_result_message("call_1", "ok")];
        let rewritten = rewrite_tool_messages(&messages);
        assert!(rewritten.iter().all(|m| m.role != Some(ChatRole::Tool)));
    }

    #[test]
    fn follow_up_expands_numbered_option() {
        let messages = vec![
            ChatMessage::assistant("1. Create AGENTS.md\n2. Run audit\n3. Refactor"),
            ChatMessage::user("yes 1."),
        ];
        let expanded = expand_follow_up(&messages).unwrap();
        let content = expanded.content.unwrap();
        assert!(content.contains("selected option 1"));
        assert!(content.contains("Create AGENTS.md"));
    }

    #[test]
    fn follow_up_without_options_does_not_expand() {
        let messages = vec![
            ChatMessage::assistant("Sounds good, let me know."),
            ChatMessage::user("yes"),
        ];
        assert!(expand_follow_up(&messages).is_none());
    }

    #[test]
    fn non_follow_up_text_does_not_expand() {
        let messages = vec![
            ChatMessage::assistant("1. A\n2. B"),
            ChatMessage::user("what does option 1 involve?"),
        ];
        assert!(expand_follow_up(&messages).is_none());
    }
}
