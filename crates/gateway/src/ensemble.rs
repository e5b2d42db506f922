//! Ensemble Service: fan-out a request to the registry's live providers in
//! parallel, collect responses, and vote on one. Grounded in the teacher's
//! `MultiPromptChain::run` (tool-call loop, `futures::future::join_all` fan-out)
//! generalized from sequential chain steps to a parallel multi-provider race.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::future::join_all;

use crate::chat::{FinishReason, Usage};
use crate::error::GatewayError;
use crate::registry::{LLMRequest, ProviderRegistry};
use crate::LLMResponse;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VotingMethod {
    ConfidenceWeighted,
    WeightedVoting,
    SingleProvider,
}

impl Default for VotingMethod {
    fn default() -> Self {
        VotingMethod::ConfidenceWeighted
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnsembleConfig {
    pub strategy: VotingMethod,
    pub min_providers: usize,
    pub confidence_threshold: f64,
    pub fallback_to_best: bool,
    pub preferred_providers: Vec<String>,
    pub force_provider: Option<String>,
}

/// One provider's outcome in a fan-out round.
#[derive(Debug, Clone)]
pub struct ProviderOutcome {
    pub provider_name: String,
    pub response: LLMResponse,
    pub arrival_index: usize,
}

#[derive(Debug, Clone)]
pub struct EnsembleResult {
    pub responses: Vec<ProviderOutcome>,
    pub selected: LLMResponse,
    pub voting_method: VotingMethod,
    pub scores: Vec<(String, f64)>,
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn confidence_of(resp: &LLMResponse) -> f64 {
    // Longer, non-empty, non-error completions are treated as higher
    // confidence. `tokens_used` (when the provider reports it) refines this.
    let base = if resp.content.is_empty() { 0.0 } else { 1.0 };
    let usage_bonus = resp
        .tokens_used
        .map(|u: Usage| (u.output_tokens as f64).min(512.0) / 512.0)
        .unwrap_or(0.0);
    base + usage_bonus
}

pub struct EnsembleService {
    registry: Arc<ProviderRegistry>,
}

impl EnsembleService {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    /// `RunEnsemble`: fan out to the registry's score-ordered providers in
    /// parallel, exclude categorized failures, and vote on one response.
    pub async fn run_ensemble(
        &self,
        req: &LLMRequest,
        config: &EnsembleConfig,
    ) -> Result<EnsembleResult, GatewayError> {
        // `single_provider`: honored whenever `force_provider` is set and it
        // resolves in the registry, regardless of the nominal strategy.
        if let Some(forced) = &config.force_provider {
            if let Ok(handle) = self.registry.get(forced) {
                let resp = handle.complete(req).await?;
                return Ok(EnsembleResult {
                    responses: vec![ProviderOutcome {
                        provider_name: forced.clone(),
                        response: resp.clone(),
                        arrival_index: 0,
                    }],
                    selected: resp,
                    voting_method: VotingMethod::SingleProvider,
                    scores: vec![(forced.clone(), 1.0)],
                });
            }
        }

        let handles = self.registry.list_handles();
        if handles.is_empty() {
            return Err(GatewayError::ConfigurationError(
                "no live providers registered".into(),
            ));
        }

        let futures = handles.iter().map(|handle| {
            let handle = handle.clone();
            let req = req.clone();
            async move {
                let name = handle.name().to_string();
                handle.complete(&req).await.map(|r| (name, r))
            }
        });

        let results = join_all(futures).await;
        let mut outcomes = Vec::new();
        let mut errors = Vec::new();
        for (idx, result) in results.into_iter().enumerate() {
            match result {
                Ok((provider_name, response)) => outcomes.push(ProviderOutcome {
                    provider_name,
                    response,
                    arrival_index: idx,
                }),
                Err(e) => errors.push(e),
            }
        }

        if outcomes.is_empty() {
            return Err(GatewayError::most_severe(errors)
                .unwrap_or_else(|| GatewayError::Internal("ensemble produced no responses".into())));
        }

        let scores: Vec<(String, f64)> = outcomes
            .iter()
            .map(|o| (o.provider_name.clone(), confidence_of(&o.response)))
            .collect();

        // Tie-break: highest score, then earliest arrival.
        let winner = outcomes
            .iter()
            .enumerate()
            .max_by(|(ia, a), (ib, b)| {
                let sa = confidence_of(&a.response);
                let sb = confidence_of(&b.response);
                sa.partial_cmp(&sb)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| ib.cmp(ia)) // earlier arrival index wins ties
            })
            .map(|(_, o)| o.response.clone())
            .expect("outcomes is non-empty");

        Ok(EnsembleResult {
            responses: outcomes,
            selected: winner,
            voting_method: config.strategy,
            scores,
        })
    }

    /// `RunEnsembleStream`: streams chunks from the top-scored provider,
    /// falling back to the next score-ranked provider on failure. Closes on
    /// completion or caller-observed cancellation (the caller races this
    /// against its own deadline/cancellation token).
    pub async fn run_ensemble_stream(
        &self,
        req: &LLMRequest,
    ) -> Result<
        std::pin::Pin<
            Box<dyn futures::Stream<Item = Result<crate::chat::ResponseChunk, GatewayError>> + Send>,
        >,
        GatewayError,
    > {
        let mut errors = Vec::new();
        for handle in self.registry.list_handles() {
            match handle.stream(req).await {
                Ok(stream) => return Ok(stream),
                Err(e) => errors.push(e),
            }
        }
        Err(GatewayError::most_severe(errors)
            .unwrap_or_else(|| GatewayError::ConfigurationError("no live providers registered".into())))
    }
}

/// Builds a ready-to-send `LLMResponse` carrying no content, used by callers
/// that need a synthesized stop response (e.g. all providers exhausted but the
/// pipeline must still answer with a categorized failure attached upstream).
pub fn empty_response(provider_name: impl Into<String>) -> LLMResponse {
    LLMResponse {
        id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
        content: String::new(),
        finish_reason: FinishReason::Stop,
        tool_calls: vec![],
        tokens_used: None,
        provider_name: provider_name.into(),
        created_at: now_unix(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ResponseChunk;
    use async_trait::async_trait;
    use futures::Stream;
    use std::pin::Pin;

    struct StubProvider {
        name: &'static str,
        content: &'static str,
        fails: bool,
    }

    #[async_trait]
    impl crate::registry::Provider for StubProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn complete(&self, _req: &LLMRequest) -> Result<LLMResponse, GatewayError> {
            if self.fails {
                return Err(GatewayError::UpstreamUnavailable("down".into()));
            }
            Ok(LLMResponse {
                id: "chatcmpl-1".into(),
                content: self.content.into(),
                finish_reason: FinishReason::Stop,
                tool_calls: vec![],
                tokens_used: None,
                provider_name: self.name.to_string(),
                created_at: 0,
            })
        }

        async fn stream(
            &self,
            _req: &LLMRequest,
        ) -> Result<
            Pin<Box<dyn Stream<Item = Result<ResponseChunk, GatewayError>> + Send>>,
            GatewayError,
        > {
            unimplemented!()
        }
    }

    fn sample_request() -> LLMRequest {
        LLMRequest {
            id: "req-1".into(),
            session_id: "sess-1".into(),
            user_id: None,
            messages: vec![],
            params: crate::params::LLMParams::new(),
            tools: vec![],
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn ensemble_excludes_failing_providers() {
        let registry = Arc::new(ProviderRegistry::new(Arc::new(
            crate::registry::NoopScoreSource,
        )));
        registry.register(Arc::new(StubProvider {
            name: "good",
            content: "hello there",
            fails: false,
        }));
        registry.register(Arc::new(StubProvider {
            name: "bad",
            content: "",
            fails: true,
        }));

        let service = EnsembleService::new(registry);
        let result = service
            .run_ensemble(&sample_request(), &EnsembleConfig::default())
            .await
            .unwrap();
        assert_eq!(result.responses.len(), 1);
        assert_eq!(result.selected.provider_name, "good");
    }

    #[tokio::test]
    async fn ensemble_surfaces_error_when_all_fail() {
        let registry = Arc::new(ProviderRegistry::new(Arc::new(
            crate::registry::NoopScoreSource,
        )));
        registry.register(Arc::new(StubProvider {
            name: "bad",
            content: "",
            fails: true,
        }));

        let service = EnsembleService::new(registry);
        let err = service
            .run_ensemble(&sample_request(), &EnsembleConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 502);
    }
}
