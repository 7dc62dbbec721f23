pub mod agents;
pub mod auth;
pub mod health;
pub mod messages;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use ens_domain::error::Error;
use ens_domain::wire::{ChatRequest, ErrorEnvelope};
use ens_policy::EvalContext;

use crate::state::AppState;

/// Build the full API router.
///
/// The health probe is public; the proxy and control plane sit behind
/// the API-key middleware. Every response carries an `x-request-id`
/// (propagated from the client or minted here).
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/", get(health::health));

    let protected = Router::new()
        // Proxy surface
        .route("/v1/messages", post(messages::create_message))
        .route("/v1/messages/count_tokens", post(messages::count_tokens))
        // Control plane
        .route("/api/agents", get(agents::list_agents))
        .route("/api/agents/tree", get(agents::agent_tree))
        .route("/api/agents/stats", get(agents::agent_stats))
        .route("/api/agents/:id", get(agents::get_agent))
        .route("/api/agents/:id/spawn", post(agents::spawn_agent))
        .route("/api/agents/:id/abort", post(agents::abort_agent))
        .route("/api/agents/:id/prompt", post(agents::prompt_agent))
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_api_key,
        ));

    public
        .merge(protected)
        .layer(middleware::from_fn(request_id))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Propagate or mint `x-request-id` and stamp it on the response.
async fn request_id(req: Request<Body>, next: Next) -> Response {
    let id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| format!("req_{}", uuid::Uuid::new_v4().simple()));

    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Map a domain error onto the HTTP envelope, scrubbing key material.
pub(crate) fn error_response(state: &AppState, e: Error) -> Response {
    let status = messages::provider_error_status(&e);
    let error_type = match &e {
        Error::Auth(_) => "authentication_error",
        Error::Request(_) | Error::Json(_) | Error::Lifecycle(_) => "invalid_request_error",
        Error::Timeout(_) => "timeout_error",
        Error::Provider { .. } | Error::Http(_) => "upstream_error",
        Error::Disposed(_) => "unavailable_error",
        _ => "api_error",
    };
    let message = state.sanitizer.scrub(&e.to_string());
    tracing::warn!(status = status.as_u16(), error = %message, "request failed");

    let mut response = (
        status,
        Json(ErrorEnvelope::new(error_type, message.clone())),
    )
        .into_response();

    // Pass upstream Retry-After through on 429s.
    if status == StatusCode::TOO_MANY_REQUESTS {
        if let Some(after) = extract_retry_after(&message) {
            if let Ok(value) = HeaderValue::from_str(&after) {
                response.headers_mut().insert("retry-after", value);
            }
        }
    }
    response
}

fn extract_retry_after(message: &str) -> Option<String> {
    let start = message.find("(Retry-After: ")?;
    let rest = &message[start + "(Retry-After: ".len()..];
    let end = rest.find(')')?;
    Some(rest[..end].to_string())
}

/// Assemble the policy context for a proxied request.
pub(crate) fn policy_context(
    state: &AppState,
    headers: &HeaderMap,
    req: &ChatRequest,
) -> EvalContext {
    let session_id = req
        .metadata
        .as_ref()
        .and_then(|m| m.get("user_id"))
        .and_then(|v| v.as_str())
        .map(String::from)
        .or_else(|| {
            headers
                .get("x-session-id")
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        })
        .unwrap_or_else(|| "anonymous".into());

    EvalContext {
        session_id,
        agent_id: String::new(),
        agent_depth: 0,
        project_path: String::new(),
        total_cost_so_far: 0.0,
        cost_budget: state.config.policy.overrides.cost_budget.unwrap_or(0.0),
        files_modified: Vec::new(),
        commands_run: Vec::new(),
        timestamp_ms: chrono::Utc::now().timestamp_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_extraction() {
        assert_eq!(
            extract_retry_after("HTTP 429 - slow (Retry-After: 13)").as_deref(),
            Some("13")
        );
        assert!(extract_retry_after("HTTP 429 - slow").is_none());
    }
}
