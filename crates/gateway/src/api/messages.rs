//! The proxy surface: `/v1/messages` and `/v1/messages/count_tokens`.
//!
//! Requests arrive in the normalized dialect, run through the policy
//! gate (rate limit, budget), route to an upstream adapter, and return
//! either a JSON response or an SSE stream of client-dialect events.

use std::convert::Infallible;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::StreamExt;

use ens_domain::error::Error;
use ens_domain::wire::{ChatRequest, ErrorEnvelope};
use ens_policy::Action;

use crate::state::AppState;

use super::{error_response, policy_context};

/// `POST /v1/messages`
pub async fn create_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let req = match parse_request(body) {
        Ok(req) => req,
        Err(message) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorEnvelope::new("invalid_request_error", message)),
            )
                .into_response();
        }
    };

    // Policy gate: every proxied request is an LLM call.
    if let Some(denied) = evaluate_policy(&state, &headers, &req) {
        return denied;
    }

    let (provider, route) = match state.registry.resolve(&req.model) {
        Ok(resolved) => resolved,
        Err(e) => return error_response(&state, e),
    };
    tracing::debug!(
        model = %req.model,
        provider = %route.provider,
        upstream_model = %route.model,
        stream = req.wants_stream(),
        "routed request"
    );

    let mut routed = req;
    routed.model = route.model;

    if routed.wants_stream() {
        match provider.send_stream(&routed).await {
            Ok(events) => {
                let stream = events.map(|event| {
                    Ok::<Event, Infallible>(
                        Event::default()
                            .event(event.event_name())
                            .data(serde_json::to_string(&event).unwrap_or_else(|_| "{}".into())),
                    )
                });
                Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
            }
            Err(e) => error_response(&state, e),
        }
    } else {
        match provider.send(&routed).await {
            Ok(response) => Json(response).into_response(),
            Err(e) => error_response(&state, e),
        }
    }
}

/// `POST /v1/messages/count_tokens`
pub async fn count_tokens(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let req = match parse_count_request(body) {
        Ok(req) => req,
        Err(message) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorEnvelope::new("invalid_request_error", message)),
            )
                .into_response();
        }
    };

    let (provider, route) = match state.registry.resolve(&req.model) {
        Ok(resolved) => resolved,
        Err(e) => return error_response(&state, e),
    };
    let mut routed = req;
    routed.model = route.model;

    match provider.count_tokens(&routed).await {
        Ok(counts) => Json(counts).into_response(),
        Err(e) => error_response(&state, e),
    }
}

// ── Request validation ─────────────────────────────────────────────

fn parse_request(body: serde_json::Value) -> Result<ChatRequest, String> {
    if body.get("model").and_then(|v| v.as_str()).unwrap_or("").is_empty() {
        return Err("'model' is required".into());
    }
    if !body
        .get("messages")
        .map(|m| m.is_array() && !m.as_array().map(Vec::is_empty).unwrap_or(true))
        .unwrap_or(false)
    {
        return Err("'messages' must be a non-empty array".into());
    }
    match body.get("max_tokens").and_then(|v| v.as_u64()) {
        Some(n) if n > 0 => {}
        _ => return Err("'max_tokens' must be a positive integer".into()),
    }
    serde_json::from_value(body).map_err(|e| format!("invalid request: {e}"))
}

/// Token counting takes the same shape minus `max_tokens` and `stream`.
fn parse_count_request(mut body: serde_json::Value) -> Result<ChatRequest, String> {
    if body.get("model").and_then(|v| v.as_str()).unwrap_or("").is_empty() {
        return Err("'model' is required".into());
    }
    if body.get("max_tokens").is_none() {
        body["max_tokens"] = serde_json::json!(1);
    }
    if !body
        .get("messages")
        .map(|m| m.is_array() && !m.as_array().map(Vec::is_empty).unwrap_or(true))
        .unwrap_or(false)
    {
        return Err("'messages' must be a non-empty array".into());
    }
    serde_json::from_value(body).map_err(|e| format!("invalid request: {e}"))
}

// ── Policy gate ────────────────────────────────────────────────────

/// Returns the denial response when the policy engine blocks this call.
fn evaluate_policy(state: &AppState, headers: &HeaderMap, req: &ChatRequest) -> Option<Response> {
    let ctx = policy_context(state, headers, req);
    let prompt = req
        .messages
        .last()
        .map(|m| {
            m.blocks()
                .iter()
                .filter_map(|b| match b {
                    ens_domain::wire::ContentBlock::Text { text } => Some(text.clone()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();

    let action = Action::LlmCall {
        model: req.model.clone(),
        prompt,
        cost: 0.0,
    };
    let evaluation = state.policy.evaluate(&action, &ctx);
    if !evaluation.is_denied() {
        return None;
    }

    let verdict = evaluation.deny_verdict()?;
    let status = if verdict.rule_id == "cost.rate-limit" {
        StatusCode::TOO_MANY_REQUESTS
    } else {
        StatusCode::FORBIDDEN
    };
    Some(
        (
            status,
            Json(ErrorEnvelope::new("permission_error", verdict.reason.clone())),
        )
            .into_response(),
    )
}

// ── Error helpers shared with other handlers ───────────────────────

pub(super) fn provider_error_status(e: &Error) -> StatusCode {
    match e {
        Error::Auth(_) => StatusCode::UNAUTHORIZED,
        Error::Request(_) | Error::Json(_) => StatusCode::BAD_REQUEST,
        Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        Error::Provider { message, .. } if message.contains("HTTP 429") => {
            StatusCode::TOO_MANY_REQUESTS
        }
        Error::Provider { .. } | Error::Http(_) => StatusCode::BAD_GATEWAY,
        Error::Disposed(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Lifecycle(_) => StatusCode::BAD_REQUEST,
        Error::Io(_) | Error::Config(_) | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_missing_model() {
        let err = parse_request(serde_json::json!({
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 10,
        }))
        .unwrap_err();
        assert!(err.contains("model"));
    }

    #[test]
    fn parse_rejects_empty_messages() {
        let err = parse_request(serde_json::json!({
            "model": "m",
            "messages": [],
            "max_tokens": 10,
        }))
        .unwrap_err();
        assert!(err.contains("messages"));
    }

    #[test]
    fn parse_rejects_zero_max_tokens() {
        let err = parse_request(serde_json::json!({
            "model": "m",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 0,
        }))
        .unwrap_err();
        assert!(err.contains("max_tokens"));
    }

    #[test]
    fn parse_accepts_minimal_request() {
        let req = parse_request(serde_json::json!({
            "model": "sonnet",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 10,
        }))
        .unwrap();
        assert_eq!(req.model, "sonnet");
        assert!(!req.wants_stream());
    }

    #[test]
    fn count_request_does_not_need_max_tokens() {
        let req = parse_count_request(serde_json::json!({
            "model": "sonnet",
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .unwrap();
        assert_eq!(req.model, "sonnet");
    }

    #[test]
    fn provider_429_maps_to_too_many_requests() {
        let e = Error::Provider {
            provider: "openai".into(),
            message: "HTTP 429 - slow down (Retry-After: 13)".into(),
        };
        assert_eq!(provider_error_status(&e), StatusCode::TOO_MANY_REQUESTS);
    }
}
