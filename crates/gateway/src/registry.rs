//! Provider Registry: holds live provider handles and returns them ordered by
//! current score. Grounded in the teacher's `LLMRegistry`/`LLMRegistryBuilder`
//! (a plain name-keyed map of boxed providers) and its `models.dev` cache
//! freshness pattern, generalized here to consult a live external Score
//! Source instead of a static models catalogue.

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use crate::chat::{ChatMessage, ResponseChunk, Tool};
use crate::ensemble::EnsembleService;
use crate::error::GatewayError;
use crate::params::LLMParams;
use crate::LLMResponse;

/// How a provider authenticates. Carried so the registry can distinguish
/// OAuth-backed members (their fallback handling differs upstream) without an
/// inheritance hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    ApiKey,
    OAuth,
}

/// Request sent to a provider's `Complete`/`Stream` entry points.
#[derive(Debug, Clone)]
pub struct LLMRequest {
    pub id: String,
    pub session_id: String,
    pub user_id: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub params: LLMParams,
    pub tools: Vec<Tool>,
    pub created_at: u64,
}

/// The capability interface every upstream provider implements: `Complete`
/// and `Stream`. Concrete HTTP clients for OpenAI/Anthropic/etc. are external
/// collaborators; this crate only depends on the trait.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    fn credential_kind(&self) -> CredentialKind {
        CredentialKind::ApiKey
    }

    async fn complete(&self, req: &LLMRequest) -> Result<LLMResponse, GatewayError>;

    async fn stream(
        &self,
        req: &LLMRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<ResponseChunk, GatewayError>> + Send>>, GatewayError>;
}

/// `{model_id, overall, components, calculated_at}` as produced by the
/// external Score Source. Weights must sum to 1.0 ± 0.01; `ScoreWeights::validate`
/// enforces that for the verifier's weight-update endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub model_id: String,
    pub overall: f64,
    pub components: ScoreComponents,
    pub calculated_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponents {
    pub speed: f64,
    pub efficiency: f64,
    pub cost: f64,
    pub capability: f64,
    pub recency: f64,
}

/// Weights used to combine `ScoreComponents` into `Score::overall`. Must sum
/// to 1.0 ± 0.01 or an update is rejected (Testable Property 8).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub speed: f64,
    pub efficiency: f64,
    pub cost: f64,
    pub capability: f64,
    pub recency: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            speed: 0.2,
            efficiency: 0.2,
            cost: 0.2,
            capability: 0.2,
            recency: 0.2,
        }
    }
}

impl ScoreWeights {
    pub fn sum(&self) -> f64 {
        self.speed + self.efficiency + self.cost + self.capability + self.recency
    }

    /// Weights sum to 1.0 ± 0.01; anything else is rejected.
    pub fn is_valid(&self) -> bool {
        (self.sum() - 1.0).abs() <= 0.01
    }

    pub fn apply(&self, c: &ScoreComponents) -> f64 {
        self.speed * c.speed
            + self.efficiency * c.efficiency
            + self.cost * c.cost
            + self.capability * c.capability
            + self.recency * c.recency
    }
}

pub const DEFAULT_SCORE: f64 = 5.0;

/// External collaborator producing per-provider health/quality scores. The
/// registry only depends on this narrow contract; the scoring formula itself
/// is out of scope.
pub trait ScoreSource: Send + Sync {
    /// Returns the current score for a provider name, or `None` when the
    /// source has no opinion (the registry then uses `DEFAULT_SCORE`).
    fn score(&self, provider_name: &str) -> Option<f64>;
}

/// A `ScoreSource` that always returns the default score, used when no
/// external scoring collaborator is wired up.
#[derive(Default)]
pub struct NoopScoreSource;

impl ScoreSource for NoopScoreSource {
    fn score(&self, _provider_name: &str) -> Option<f64> {
        None
    }
}

/// Holds live provider handles; returns them ordered by current score. No
/// hardcoded fallback order is ever consulted — ordering is recomputed from
/// the score source on every `list()` call.
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn Provider>>>,
    scores: Arc<dyn ScoreSource>,
}

impl ProviderRegistry {
    pub fn new(scores: Arc<dyn ScoreSource>) -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            scores,
        }
    }

    /// Registers a live provider handle. An unset credential for a provider is
    /// expected to simply never call this — the registry has no notion of a
    /// provider it doesn't hold a handle for.
    pub fn register(&self, provider: Arc<dyn Provider>) {
        self.providers
            .write()
            .expect("provider registry lock poisoned")
            .insert(provider.name().to_string(), provider);
    }

    pub fn unregister(&self, name: &str) {
        self.providers
            .write()
            .expect("provider registry lock poisoned")
            .remove(name);
    }

    fn score_of(&self, name: &str) -> f64 {
        self.scores.score(name).unwrap_or(DEFAULT_SCORE)
    }

    /// Ordered sequence of provider names: descending score, ties broken by
    /// name ascending (Testable Property 9).
    pub fn list(&self) -> Vec<String> {
        let providers = self.providers.read().expect("provider registry lock poisoned");
        let mut names: Vec<String> = providers.keys().cloned().collect();
        names.sort_by(|a, b| {
            let sa = self.score_of(a);
            let sb = self.score_of(b);
            sb.partial_cmp(&sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.cmp(b))
        });
        names
    }

    /// Ordered sequence of live provider handles, in the same order as `list()`.
    pub fn list_handles(&self) -> Vec<Arc<dyn Provider>> {
        let providers = self.providers.read().expect("provider registry lock poisoned");
        self.list()
            .into_iter()
            .filter_map(|name| providers.get(&name).cloned())
            .collect()
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Provider>, GatewayError> {
        self.providers
            .read()
            .expect("provider registry lock poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("unknown provider: {name}")))
    }

    pub fn is_empty(&self) -> bool {
        self.providers
            .read()
            .expect("provider registry lock poisoned")
            .is_empty()
    }

    /// `GetEnsembleService`: a handle onto the parallel-fan-out/voting
    /// collaborator over this registry's live providers, or `None` when
    /// nothing is registered yet. Callers outside the chat decision tree
    /// (the Request Pipeline only ever takes the Direct-Processing or Debate
    /// path) use this to run an ensemble vote directly.
    pub fn ensemble_service(self: &Arc<Self>) -> Option<Arc<EnsembleService>> {
        if self.is_empty() {
            return None;
        }
        Some(Arc::new(EnsembleService::new(Arc::clone(self))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    struct FakeProvider(&'static str);

    #[async_trait]
    impl Provider for FakeProvider {
        fn name(&self) -> &str {
            self.0
        }

        async fn complete(&self, _req: &LLMRequest) -> Result<LLMResponse, GatewayError> {
            unimplemented!()
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

    struct MapScoreSource(Map<&'static str, f64>);

    impl ScoreSource for MapScoreSource {
        fn score(&self, name: &str) -> Option<f64> {
            self.0.get(name).copied()
        }
    }

    #[test]
    fn orders_by_descending_score_ties_by_name() {
        let mut scores = Map::new();
        scores.insert("alpha", 7.0);
        scores.insert("beta", 9.0);
        // "gamma" unscored -> default 5.0
        let registry = ProviderRegistry::new(Arc::new(MapScoreSource(scores)));
        registry.register(Arc::new(FakeProvider("alpha")));
        registry.register(Arc::new(FakeProvider("beta")));
        registry.register(Arc::new(FakeProvider("gamma")));
        registry.register(Arc::new(FakeProvider("delta"))); // also unscored -> 5.0, ties with gamma

        assert_eq!(registry.list(), vec!["beta", "alpha", "delta", "gamma"]);
    }

    #[test]
    fn unknown_provider_is_not_found() {
        let registry = ProviderRegistry::new(Arc::new(NoopScoreSource));
        assert!(registry.get("nope").is_err());
    }

    #[test]
    fn ensemble_service_is_none_until_a_provider_is_registered() {
        let registry = Arc::new(ProviderRegistry::new(Arc::new(NoopScoreSource)));
        assert!(registry.ensemble_service().is_none());
        registry.register(Arc::new(FakeProvider("alpha")));
        assert!(registry.ensemble_service().is_some());
    }

    #[test]
    fn weight_validation_rejects_bad_sums() {
        let bad = ScoreWeights {
            speed: 0.5,
            efficiency: 0.5,
            cost: 0.5,
            capability: 0.5,
            recency: 0.5,
        };
        assert!(!bad.is_valid());
        assert!(ScoreWeights::default().is_valid());
    }
}
