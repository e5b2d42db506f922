//! Verifier Score Store: the concrete `ScoreSource` wired into the
//! `ProviderRegistry` in this workspace. Grounded in `registry.rs`'s own
//! `RwLock<HashMap<...>>` bookkeeping — same lock-for-O(1)-mutation idiom,
//! applied to per-model scores and the weights used to combine them. The
//! scoring formula itself (how `ScoreComponents` are measured) stays an
//! external concern; this only stores and combines whatever components are
//! recorded.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::registry::{Score, ScoreComponents, ScoreSource, ScoreWeights};

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[derive(Default)]
struct State {
    scores: HashMap<String, Score>,
    weights: ScoreWeights,
}

/// Holds recorded per-model `ScoreComponents` and the active `ScoreWeights`,
/// recomputing `Score::overall` from the current weights on read. A rejected
/// weight update (sum outside 1.0 ± 0.01) leaves the prior weights in place.
pub struct ScoreStore {
    state: RwLock<State>,
}

impl Default for ScoreStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ScoreStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State {
                scores: HashMap::new(),
                weights: ScoreWeights::default(),
            }),
        }
    }

    /// Records (or replaces) the raw components for `model_id`; `overall` is
    /// derived from the currently active weights.
    pub fn record(&self, model_id: impl Into<String>, components: ScoreComponents) {
        let mut state = self.state.write().expect("score store lock poisoned");
        let overall = state.weights.apply(&components);
        let model_id = model_id.into();
        state.scores.insert(
            model_id.clone(),
            Score {
                model_id,
                overall,
                components,
                calculated_at: now_unix(),
            },
        );
    }

    pub fn get(&self, model_id: &str) -> Option<Score> {
        self.state
            .read()
            .expect("score store lock poisoned")
            .scores
            .get(model_id)
            .cloned()
    }

    pub fn batch(&self, model_ids: &[String]) -> Vec<Score> {
        let state = self.state.read().expect("score store lock poisoned");
        model_ids
            .iter()
            .filter_map(|id| state.scores.get(id).cloned())
            .collect()
    }

    /// Pairwise comparison of two model ids, `None` when either is unscored.
    pub fn compare(&self, a: &str, b: &str) -> Option<(Score, Score)> {
        let state = self.state.read().expect("score store lock poisoned");
        let sa = state.scores.get(a)?.clone();
        let sb = state.scores.get(b)?.clone();
        Some((sa, sb))
    }

    /// Top `n` models by `overall`, descending, ties broken by model id ascending.
    pub fn top(&self, n: usize) -> Vec<Score> {
        let state = self.state.read().expect("score store lock poisoned");
        let mut all: Vec<Score> = state.scores.values().cloned().collect();
        all.sort_by(|a, b| {
            b.overall
                .partial_cmp(&a.overall)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.model_id.cmp(&b.model_id))
        });
        all.truncate(n);
        all
    }

    /// Models whose `overall` falls within `[min, max]`.
    pub fn range(&self, min: f64, max: f64) -> Vec<Score> {
        let state = self.state.read().expect("score store lock poisoned");
        state
            .scores
            .values()
            .filter(|s| s.overall >= min && s.overall <= max)
            .cloned()
            .collect()
    }

    pub fn weights(&self) -> ScoreWeights {
        self.state.read().expect("score store lock poisoned").weights
    }

    /// Rejects the update (returning `false`, leaving weights unchanged)
    /// unless the five weights sum to 1.0 ± 0.01 (Testable Property 8).
    /// Accepted updates recompute every stored `Score::overall` in place.
    pub fn set_weights(&self, weights: ScoreWeights) -> bool {
        if !weights.is_valid() {
            return false;
        }
        let mut state = self.state.write().expect("score store lock poisoned");
        state.weights = weights;
        let recomputed: Vec<(String, f64)> = state
            .scores
            .iter()
            .map(|(id, s)| (id.clone(), weights.apply(&s.components)))
            .collect();
        for (id, overall) in recomputed {
            if let Some(s) = state.scores.get_mut(&id) {
                s.overall = overall;
            }
        }
        true
    }

    /// Drops every cached score; weights are retained.
    pub fn invalidate_cache(&self) {
        self.state.write().expect("score store lock poisoned").scores.clear();
    }
}

impl ScoreSource for ScoreStore {
    fn score(&self, provider_name: &str) -> Option<f64> {
        self.get(provider_name).map(|s| s.overall)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn components(v: f64) -> ScoreComponents {
        ScoreComponents {
            speed: v,
            efficiency: v,
            cost: v,
            capability: v,
            recency: v,
        }
    }

    #[test]
    fn weight_update_rejected_unless_sum_is_valid() {
        let store = ScoreStore::new();
        store.record("gpt-x", components(0.8));
        let before = store.weights();

        let bad = ScoreWeights {
            speed: 0.5,
            efficiency: 0.5,
            cost: 0.5,
            capability: 0.5,
            recency: 0.5,
        };
        assert!(!store.set_weights(bad));
        assert_eq!(store.weights().speed, before.speed);
    }

    #[test]
    fn accepted_weight_update_is_read_back_exactly() {
        let store = ScoreStore::new();
        let weights = ScoreWeights {
            speed: 0.1,
            efficiency: 0.2,
            cost: 0.3,
            capability: 0.2,
            recency: 0.2,
        };
        assert!(store.set_weights(weights));
        let got = store.weights();
        assert_eq!(got.speed, weights.speed);
        assert_eq!(got.cost, weights.cost);
    }

    #[test]
    fn top_orders_descending_with_name_tiebreak() {
        let store = ScoreStore::new();
        store.record("b", components(0.5));
        store.record("a", components(0.5));
        store.record("c", components(0.9));
        let top = store.top(3);
        assert_eq!(top[0].model_id, "c");
        assert_eq!(top[1].model_id, "a");
        assert_eq!(top[2].model_id, "b");
    }

    #[test]
    fn invalidate_cache_drops_scores_but_keeps_weights() {
        let store = ScoreStore::new();
        store.record("a", components(0.5));
        store.set_weights(ScoreWeights {
            speed: 0.4,
            efficiency: 0.1,
            cost: 0.2,
            capability: 0.2,
            recency: 0.1,
        });
        store.invalidate_cache();
        assert!(store.get("a").is_none());
        assert_eq!(store.weights().speed, 0.4);
    }
}
