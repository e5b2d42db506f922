//! `/api/v1/verifier/scores/*`: read/compare/rank access to the Verifier
//! Score Store plus the weight-update and cache-invalidation admin surface.
//! Named `verifier` rather than `scores` to avoid shadowing
//! `helixagent_gateway::scores` in handler modules that import both.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use helixagent_gateway::ScoreWeights;

use crate::state::AppState;

pub async fn get_score(State(state): State<AppState>, Path(model_id): Path<String>) -> Result<Json<serde_json::Value>, Response> {
    match state.scores.get(&model_id) {
        Some(score) => Ok(Json(json!(score))),
        None => Err((StatusCode::NOT_FOUND, Json(json!({ "error": format!("no score recorded for {model_id}") }))).into_response()),
    }
}

#[derive(Debug, Deserialize)]
pub struct BatchScoresRequest {
    pub model_ids: Vec<String>,
}

pub async fn batch_scores(State(state): State<AppState>, Json(req): Json<BatchScoresRequest>) -> Json<serde_json::Value> {
    Json(json!({ "data": state.scores.batch(&req.model_ids) }))
}

#[derive(Debug, Deserialize)]
pub struct CompareQuery {
    pub a: String,
    pub b: String,
}

pub async fn compare_scores(State(state): State<AppState>, Query(q): Query<CompareQuery>) -> Result<Json<serde_json::Value>, Response> {
    match state.scores.compare(&q.a, &q.b) {
        Some((sa, sb)) => Ok(Json(json!({ "a": sa, "b": sb }))),
        None => Err((StatusCode::NOT_FOUND, Json(json!({ "error": "one or both model ids are unscored" }))).into_response()),
    }
}

#[derive(Debug, Deserialize)]
pub struct TopQuery {
    #[serde(default = "default_top_n")]
    pub n: usize,
}

fn default_top_n() -> usize {
    10
}

pub async fn top_scores(State(state): State<AppState>, Query(q): Query<TopQuery>) -> Json<serde_json::Value> {
    Json(json!({ "data": state.scores.top(q.n) }))
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub min: f64,
    pub max: f64,
}

pub async fn range_scores(State(state): State<AppState>, Query(q): Query<RangeQuery>) -> Json<serde_json::Value> {
    Json(json!({ "data": state.scores.range(q.min, q.max) }))
}

pub async fn get_weights(State(state): State<AppState>) -> Json<ScoreWeights> {
    Json(state.scores.weights())
}

/// `PUT /api/v1/verifier/scores/weights` — rejects with 400 unless the five
/// weights sum to 1.0 ± 0.01 (Testable Property 8).
pub async fn set_weights(State(state): State<AppState>, Json(weights): Json<ScoreWeights>) -> Response {
    if state.scores.set_weights(weights) {
        Json(json!({ "accepted": true, "weights": weights })).into_response()
    } else {
        (StatusCode::BAD_REQUEST, Json(json!({ "error": "weights must sum to 1.0 (+/- 0.01)" }))).into_response()
    }
}

pub async fn invalidate_cache(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.scores.invalidate_cache();
    Json(json!({ "invalidated": true }))
}
