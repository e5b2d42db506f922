//! `GET /v1/lsp/servers` — route exists for the external language-server
//! facade to attach to; the facade itself (spawning/managing LSP processes)
//! is out of scope here, so this returns an empty, always-available list.

use axum::Json;
use serde_json::json;

pub async fn list_servers() -> Json<serde_json::Value> {
    Json(json!({ "data": [] }))
}
