//! Debate Team Config and the five-position debate state machine. Grounded in
//! the teacher's `MultiPromptChain`/`MultiChainStep` sequencing (steps execute
//! in order, each storing its output before the next runs) and its builder
//! idiom, generalized from arbitrary chain steps to the five fixed debate
//! positions.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::chat::{ChatMessage, FinishReason, Tool};
use crate::error::GatewayError;
use crate::registry::{LLMRequest, Provider, ProviderRegistry};
use crate::LLMResponse;

/// One of the five fixed roles a provider plays for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Position {
    Analyst,
    Proposer,
    Critic,
    Synthesis,
    Mediator,
}

impl Position {
    pub const ORDER: [Position; 5] = [
        Position::Analyst,
        Position::Proposer,
        Position::Critic,
        Position::Synthesis,
        Position::Mediator,
    ];

    pub fn role_guidance(&self) -> &'static str {
        match self {
            Position::Analyst => "Analyze the request and identify the relevant facts and constraints.",
            Position::Proposer => "Propose a concrete course of action.",
            Position::Critic => "Critique the proposal and surface risks or gaps.",
            Position::Synthesis => "Synthesize the analysis, proposal and critique into one coherent answer.",
            Position::Mediator => "Mediate remaining disagreement and state the final recommendation.",
        }
    }

    pub fn character_name(&self) -> &'static str {
        match self {
            Position::Analyst => "The Analyst",
            Position::Proposer => "The Proposer",
            Position::Critic => "The Critic",
            Position::Synthesis => "The Synthesizer",
            Position::Mediator => "The Mediator",
        }
    }
}

/// Maximum fallback attempts a single position's chain may be traversed, per
/// spec: "Fallback chain depth must be traversable in at most 5 attempts."
pub const MAX_FALLBACK_ATTEMPTS: usize = 5;

/// `{position, role, provider_name, model_name, provider_handle, fallback, is_oauth}`.
#[derive(Clone)]
pub struct DebateTeamMember {
    pub position: Position,
    pub provider_name: String,
    pub model_name: String,
    pub provider_handle: Option<Arc<dyn Provider>>,
    pub fallback: Option<Box<DebateTeamMember>>,
    pub is_oauth: bool,
}

impl DebateTeamMember {
    /// Walks `self` then its fallback chain, in order, up to
    /// `MAX_FALLBACK_ATTEMPTS` total attempts.
    pub fn chain(&self) -> Vec<&DebateTeamMember> {
        let mut out = Vec::new();
        let mut cur = Some(self);
        while let Some(member) = cur {
            if out.len() >= MAX_FALLBACK_ATTEMPTS {
                break;
            }
            out.push(member);
            cur = member.fallback.as_deref();
        }
        out
    }
}

/// `GetTeamMember`/`GetAllLLMs` contract. Members for the five positions are
/// assigned from currently live providers in registry-score order, highest
/// score to Analyst, next to Proposer, and so on; each member's fallback is
/// the next-ranked provider, truncated to `MAX_FALLBACK_ATTEMPTS`.
pub struct DebateTeamConfig {
    members: std::collections::HashMap<Position, DebateTeamMember>,
}

impl DebateTeamConfig {
    /// Builds a team from the registry's current score-ordered provider list.
    /// Returns `None` when fewer than one live provider is available.
    pub fn from_registry(registry: &ProviderRegistry, model_name: impl Into<String>) -> Option<Self> {
        let handles = registry.list_handles();
        if handles.is_empty() {
            return None;
        }
        let model_name = model_name.into();

        let mut members = std::collections::HashMap::new();
        for (i, position) in Position::ORDER.iter().enumerate() {
            // Ranked list starting at this position's rank, wrapping is not
            // needed: the fallback chain just runs out when providers do.
            let ranked = &handles[i.min(handles.len() - 1)..];
            let primary = ranked.first()?;
            let fallback = build_fallback_chain(*position, &model_name, &ranked[1..]);
            members.insert(
                *position,
                DebateTeamMember {
                    position: *position,
                    provider_name: primary.name().to_string(),
                    model_name: model_name.clone(),
                    provider_handle: Some(primary.clone()),
                    fallback: fallback.map(Box::new),
                    is_oauth: primary.credential_kind() == crate::registry::CredentialKind::OAuth,
                },
            );
        }

        Some(Self { members })
    }

    pub fn get_team_member(&self, position: Position) -> Option<&DebateTeamMember> {
        self.members.get(&position)
    }

    pub fn get_all_llms(&self) -> Vec<(Position, String, String)> {
        Position::ORDER
            .iter()
            .filter_map(|p| {
                self.members
                    .get(p)
                    .map(|m| (*p, m.provider_name.clone(), m.model_name.clone()))
            })
            .collect()
    }
}

fn build_fallback_chain(
    position: Position,
    model_name: &str,
    remaining: &[Arc<dyn Provider>],
) -> Option<DebateTeamMember> {
    let (first, rest) = remaining.split_first()?;
    Some(DebateTeamMember {
        position,
        provider_name: first.name().to_string(),
        model_name: model_name.to_string(),
        provider_handle: Some(first.clone()),
        fallback: build_fallback_chain(position, model_name, rest).map(Box::new),
        is_oauth: first.credential_kind() == crate::registry::CredentialKind::OAuth,
    })
}

/// Transient, per-request debate state. Responses are appended in position
/// order and never mutated after write.
#[derive(Default)]
pub struct DebateSession {
    pub topic: String,
    pub previous_responses: Vec<(Position, String)>,
    pub tools_offered: Vec<Tool>,
    pub stream_id: Option<String>,
}

impl DebateSession {
    pub fn new(topic: impl Into<String>, tools_offered: Vec<Tool>) -> Self {
        Self {
            topic: topic.into(),
            previous_responses: Vec::new(),
            tools_offered,
            stream_id: None,
        }
    }

    fn record(&mut self, position: Position, text: String) {
        self.previous_responses.push((position, text));
    }

    pub fn response_for(&self, position: Position) -> Option<&str> {
        self.previous_responses
            .iter()
            .find(|(p, _)| *p == position)
            .map(|(_, t)| t.as_str())
    }
}

const REQUIRED_SYSTEM_PROMPT_SUBSTRINGS: &[&str] = &[
    "HelixAgent",
    "AI coding assistant",
    "Claude Code",
    "OpenCode",
    "codebase through tools",
];

const NEVER_SAY_CLAUSE: &str = "NEVER say \"I cannot see your codebase\"";

/// Builds the per-position system prompt. Must contain every string in
/// `REQUIRED_SYSTEM_PROMPT_SUBSTRINGS`, the exact `NEVER_SAY_CLAUSE`, and a
/// `2-3 sentences` brevity hint (Testable Property 6).
pub fn build_system_prompt(position: Position, session: &DebateSession) -> String {
    let mut prompt = format!(
        "You are HelixAgent, an AI coding assistant (in the spirit of Claude Code and OpenCode) \
         reasoning about the user's codebase through tools. {}. Keep your answer to 2-3 sentences. \
         Role: {}.",
        NEVER_SAY_CLAUSE,
        position.role_guidance(),
    );
    debug_assert!(REQUIRED_SYSTEM_PROMPT_SUBSTRINGS
        .iter()
        .all(|s| prompt.contains(s)));

    if !session.tools_offered.is_empty() {
        prompt.push_str("\n\nAVAILABLE TOOLS:\n");
        for tool in &session.tools_offered {
            prompt.push_str(&format!("- {}\n", tool.function.name));
        }
    }
    prompt
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Runs the fixed Analyst → Proposer → Critic → Synthesis → Mediator →
/// FinalSynthesis sequence. Each position's provider is called through its
/// fallback chain (up to `MAX_FALLBACK_ATTEMPTS`); the final merged answer
/// comes from the Synthesis provider reasoning over all five stored turns.
pub struct DebateEngine {
    team: DebateTeamConfig,
}

impl DebateEngine {
    pub fn new(team: DebateTeamConfig) -> Self {
        Self { team }
    }

    async fn call_with_fallback(
        &self,
        member: &DebateTeamMember,
        messages: &[ChatMessage],
        tools: &[Tool],
    ) -> Result<LLMResponse, GatewayError> {
        let mut errors = Vec::new();
        for attempt in member.chain() {
            let Some(handle) = &attempt.provider_handle else {
                continue;
            };
            let req = LLMRequest {
                id: format!("debate-{}", uuid::Uuid::new_v4()),
                session_id: String::new(),
                user_id: None,
                messages: messages.to_vec(),
                params: crate::params::LLMParams::new(),
                tools: tools.to_vec(),
                created_at: now_unix(),
            };
            match handle.complete(&req).await {
                Ok(resp) => return Ok(resp),
                Err(e) => errors.push(e),
            }
        }
        Err(GatewayError::most_severe(errors)
            .unwrap_or_else(|| GatewayError::UpstreamUnavailable("fallback chain exhausted".into())))
    }

    /// Runs one position, storing its textual result in `session`.
    async fn run_position(
        &self,
        position: Position,
        session: &mut DebateSession,
    ) -> Result<String, GatewayError> {
        let member = self
            .team
            .get_team_member(position)
            .ok_or_else(|| GatewayError::ConfigurationError("debate team member missing".into()))?;

        let system_prompt = build_system_prompt(position, session);
        let mut messages = vec![ChatMessage::system(system_prompt)];
        for (prior_position, text) in &session.previous_responses {
            messages.push(ChatMessage::assistant(format!(
                "{}: {}",
                prior_position.character_name(),
                text
            )));
        }
        messages.push(ChatMessage::user(session.topic.clone()));

        let resp = self
            .call_with_fallback(member, &messages, &session.tools_offered)
            .await?;
        session.record(position, resp.content.clone());
        Ok(resp.content)
    }

    /// Runs the full debate and returns the FinalSynthesis answer plus the
    /// Synthesis member's raw tool_calls (if the provider emitted any),
    /// alongside the session carrying every position's stored turn so the
    /// caller can render the full dialogue transcript.
    pub async fn run(
        &mut self,
        mut session: DebateSession,
    ) -> Result<(LLMResponse, DebateSession), GatewayError> {
        for position in Position::ORDER {
            self.run_position(position, &mut session).await?;
        }

        let synthesis_member = self
            .team
            .get_team_member(Position::Synthesis)
            .ok_or_else(|| GatewayError::ConfigurationError("no Synthesis team member".into()))?;

        let final_prompt = session
            .previous_responses
            .iter()
            .map(|(p, text)| format!("{}: {}", p.character_name(), text))
            .collect::<Vec<_>>()
            .join("\n\n");

        let messages = vec![
            ChatMessage::system(build_system_prompt(Position::Synthesis, &session)),
            ChatMessage::user(format!(
                "Merge the five perspectives below into one final answer for: {}\n\n{}",
                session.topic, final_prompt
            )),
        ];

        let mut resp = self
            .call_with_fallback(synthesis_member, &messages, &session.tools_offered)
            .await?;
        if resp.finish_reason == FinishReason::None {
            resp.finish_reason = if resp.tool_calls.is_empty() {
                FinishReason::Stop
            } else {
                FinishReason::ToolCalls
            };
        }
        Ok((resp, session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_contains_required_substrings() {
        let session = DebateSession::new("hello", vec![]);
        for position in Position::ORDER {
            let prompt = build_system_prompt(position, &session);
            for needle in REQUIRED_SYSTEM_PROMPT_SUBSTRINGS {
                assert!(prompt.contains(needle), "missing {needle} in {prompt}");
            }
            assert!(prompt.contains(NEVER_SAY_CLAUSE));
            assert!(prompt.contains("2-3 sentences"));
        }
    }

    #[test]
    fn fallback_chain_caps_at_five() {
        fn member(depth: usize) -> DebateTeamMember {
            DebateTeamMember {
                position: Position::Analyst,
                provider_name: format!("p{depth}"),
                model_name: "m".into(),
                provider_handle: None,
                fallback: if depth < 10 {
                    Some(Box::new(member(depth + 1)))
                } else {
                    None
                },
                is_oauth: false,
            }
        }
        let m = member(0);
        assert_eq!(m.chain().len(), MAX_FALLBACK_ATTEMPTS);
    }
}
