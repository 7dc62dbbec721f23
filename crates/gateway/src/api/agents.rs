//! Control plane: JSON snapshots of the lifecycle manager plus
//! spawn/abort/prompt verbs.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use ens_lifecycle::{Agent, AgentRegistration};

use crate::state::AppState;

use super::error_response;

/// `GET /api/agents` — flat agent list, depth-ordered.
pub async fn list_agents(State(state): State<AppState>) -> Json<Vec<Agent>> {
    Json(state.lifecycle.list())
}

/// One node of the nested tree view.
#[derive(serde::Serialize)]
pub struct TreeNode {
    #[serde(flatten)]
    pub agent: Agent,
    pub children: Vec<TreeNode>,
}

fn build_node(state: &AppState, agent: Agent) -> TreeNode {
    let children = state
        .lifecycle
        .children_of(&agent.id)
        .into_iter()
        .filter_map(|id| state.lifecycle.get(&id))
        .map(|child| build_node(state, child))
        .collect();
    TreeNode { agent, children }
}

/// `GET /api/agents/tree` — the forest, nested.
pub async fn agent_tree(State(state): State<AppState>) -> Json<Vec<TreeNode>> {
    let roots: Vec<TreeNode> = state
        .lifecycle
        .list()
        .into_iter()
        .filter(|a| a.parent_id.is_none())
        .map(|root| build_node(&state, root))
        .collect();
    Json(roots)
}

/// `GET /api/agents/{id}`
pub async fn get_agent(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.lifecycle.get(&id) {
        Some(agent) => Json(agent).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("unknown agent '{id}'")})),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct SpawnBody {
    #[serde(default)]
    pub child_id: Option<String>,
    #[serde(default)]
    pub purpose: String,
    /// Explicit budget; defaults to the decayed parent budget.
    #[serde(default)]
    pub token_budget: Option<u64>,
}

/// `POST /api/agents/{id}/spawn` — admission check, then registration.
pub async fn spawn_agent(
    State(state): State<AppState>,
    Path(parent_id): Path<String>,
    Json(body): Json<SpawnBody>,
) -> Response {
    let check = match state.lifecycle.can_spawn(&parent_id) {
        Ok(check) => check,
        Err(e) => return error_response(&state, e),
    };
    if !check.allowed {
        return (StatusCode::CONFLICT, Json(json!(check))).into_response();
    }

    let token_budget = match body.token_budget {
        Some(budget) => budget,
        None => match state.lifecycle.compute_child_budget(&parent_id) {
            Ok(budget) => budget,
            Err(e) => return error_response(&state, e),
        },
    };
    let registration = AgentRegistration {
        id: body
            .child_id
            .unwrap_or_else(|| format!("agent-{}", uuid::Uuid::new_v4().simple())),
        parent_id: Some(parent_id),
        purpose: body.purpose,
        token_budget,
    };

    match state.lifecycle.register_agent(registration) {
        Ok(agent) => (StatusCode::CREATED, Json(agent)).into_response(),
        Err(e) => error_response(&state, e),
    }
}

/// `POST /api/agents/{id}/abort` — operator kill of the subtree.
pub async fn abort_agent(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.lifecycle.system_kill(&id) {
        Ok(outcome) if outcome.success => Json(outcome).into_response(),
        Ok(outcome) => {
            let status = if outcome
                .reason
                .as_deref()
                .map(|r| r.contains("unknown"))
                .unwrap_or(false)
            {
                StatusCode::NOT_FOUND
            } else {
                StatusCode::CONFLICT
            };
            (status, Json(outcome)).into_response()
        }
        Err(e) => error_response(&state, e),
    }
}

#[derive(Debug, Deserialize)]
pub struct PromptBody {
    pub prompt: String,
}

/// `POST /api/agents/{id}/prompt` — queue a prompt for the agent's loop
/// via the bus (`agent:{id}:prompt`).
pub async fn prompt_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<PromptBody>,
) -> Response {
    if state.lifecycle.get(&id).is_none() {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("unknown agent '{id}'")})),
        )
            .into_response();
    }
    let topic = format!("agent:{id}:prompt");
    match state
        .bus
        .publish(&topic, json!({"prompt": body.prompt}), Some("control-plane"))
    {
        Ok(message_id) => (
            StatusCode::ACCEPTED,
            Json(json!({"queued": true, "message_id": message_id, "topic": topic})),
        )
            .into_response(),
        Err(e) => error_response(&state, e),
    }
}

/// `GET /api/agents/stats` — tree health plus bus and dispatch counters.
pub async fn agent_stats(State(state): State<AppState>) -> Response {
    let health = match state.lifecycle.tree_health() {
        Ok(health) => health,
        Err(e) => return error_response(&state, e),
    };
    Json(json!({
        "tree": health,
        "bus": state.bus.stats(),
        "webhooks_pending": state.webhooks.pending_count(),
        "guardian_findings": state.guardian.recent_findings(0).len(),
    }))
    .into_response()
}
