//! Health endpoint.

use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

/// `GET /` — service identity, configured providers, and aliases.
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "ensemble",
        "version": env!("CARGO_PKG_VERSION"),
        "providers": state.registry.summaries(),
        "aliases": state.registry.aliases(),
    }))
}
