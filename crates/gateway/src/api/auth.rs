//! API authentication middleware.
//!
//! The configured API key is hashed once at startup; each request's
//! `x-api-key` (or `Authorization: Bearer`) header is hashed and
//! compared in constant time, so neither the key length nor a prefix
//! match leaks through timing. No configured key = open gateway.

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use ens_domain::wire::ErrorEnvelope;

use crate::state::AppState;

/// Axum middleware enforcing key auth on protected routes.
pub async fn require_api_key(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let expected_hash = match &state.api_key_hash {
        Some(h) => h,
        None => return next.run(req).await,
    };

    let provided = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            req.headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        })
        .unwrap_or("");

    let provided_hash = Sha256::digest(provided.as_bytes());

    if !bool::from(provided_hash.ct_eq(expected_hash.as_slice())) {
        return (
            axum::http::StatusCode::UNAUTHORIZED,
            axum::Json(ErrorEnvelope::new(
                "authentication_error",
                "invalid or missing API key",
            )),
        )
            .into_response();
    }

    next.run(req).await
}
