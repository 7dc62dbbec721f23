//! HTTP surface checks against an in-process router: health payload,
//! auth gating, request validation, routing failures, and the body cap.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use sha2::{Digest, Sha256};
use tower::ServiceExt;

use ens_bus::{MessageBus, ResourceBroker, WebhookDispatcher};
use ens_domain::config::Config;
use ens_domain::memory::InMemoryStore;
use ens_gateway::api;
use ens_gateway::sanitize::Sanitizer;
use ens_gateway::state::AppState;
use ens_lifecycle::{AgentRegistration, LifecycleManager};
use ens_policy::build_policy_stack;
use ens_proxy::ProviderRegistry;

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

fn test_state(config: Config) -> AppState {
    let config = Arc::new(config);
    let bus = Arc::new(MessageBus::with_defaults());
    let lifecycle = Arc::new(LifecycleManager::with_bus(
        config.lifecycle.clone(),
        Some(bus.clone()),
    ));
    let stack = build_policy_stack(config.policy.preset, &config.policy.overrides, "/cfg");
    let registry = Arc::new(ProviderRegistry::from_config(
        &config.providers,
        &config.aliases,
    ));
    let webhooks = Arc::new(WebhookDispatcher::new(config.webhooks.clone()));
    webhooks.attach(&bus).unwrap();

    let api_key_hash = config
        .auth
        .api_key
        .as_ref()
        .filter(|k| !k.is_empty())
        .map(|k| Sha256::digest(k.as_bytes()).to_vec());

    AppState {
        config: config.clone(),
        registry,
        bus,
        lifecycle,
        broker: Arc::new(ResourceBroker::new()),
        webhooks,
        policy: Arc::new(stack.engine),
        rate_window: stack.rate_window,
        guardian: Arc::new(ens_policy::GuardianScanner::new("sentinel")),
        memory: Arc::new(InMemoryStore::new()),
        api_key_hash,
        sanitizer: Arc::new(Sanitizer::new()),
    }
}

fn app(config: Config) -> axum::Router {
    let state = test_state(config);
    api::router(state.clone())
        .layer(tower_http::limit::RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ── Health ─────────────────────────────────────────────────────────

#[tokio::test]
async fn health_reports_service_and_providers() {
    let config: Config = Config::from_json(
        r#"{
            "providers": {
                "openai": {"type": "openai-compat", "endpoint": "https://x/v1", "api_key": "k"}
            },
            "aliases": {"sonnet": "openai/gpt-4.1-mini"}
        }"#,
    )
    .unwrap();
    let response = app(config)
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["service"], "ensemble");
    assert_eq!(json["providers"][0]["name"], "openai");
    assert_eq!(json["aliases"]["sonnet"], "openai/gpt-4.1-mini");
}

#[tokio::test]
async fn responses_carry_request_id() {
    let response = app(Config::default())
        .oneshot(
            Request::get("/")
                .header("x-request-id", "req_test123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.headers()["x-request-id"], "req_test123");

    let minted = app(Config::default())
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(minted.headers().contains_key("x-request-id"));
}

// ── Auth ───────────────────────────────────────────────────────────

#[tokio::test]
async fn protected_routes_require_key_when_configured() {
    let config = Config::from_json(r#"{"auth": {"api_key": "sekrit"}}"#).unwrap();

    // Health stays public.
    let health = app(config.clone())
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);

    // Missing key.
    let denied = app(config.clone())
        .oneshot(Request::get("/api/agents").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(denied).await;
    assert_eq!(json["type"], "error");
    assert_eq!(json["error"]["type"], "authentication_error");

    // x-api-key works.
    let with_key = app(config.clone())
        .oneshot(
            Request::get("/api/agents")
                .header("x-api-key", "sekrit")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(with_key.status(), StatusCode::OK);

    // Bearer works too.
    let with_bearer = app(config)
        .oneshot(
            Request::get("/api/agents")
                .header("authorization", "Bearer sekrit")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(with_bearer.status(), StatusCode::OK);
}

#[tokio::test]
async fn wrong_key_is_rejected() {
    let config = Config::from_json(r#"{"auth": {"api_key": "sekrit"}}"#).unwrap();
    let response = app(config)
        .oneshot(
            Request::get("/api/agents")
                .header("x-api-key", "wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// ── /v1/messages validation & routing ──────────────────────────────

fn post_messages(body: &str) -> Request<Body> {
    Request::post("/v1/messages")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn missing_model_is_bad_request() {
    let response = app(Config::default())
        .oneshot(post_messages(
            r#"{"messages": [{"role": "user", "content": "hi"}], "max_tokens": 5}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn empty_messages_is_bad_request() {
    let response = app(Config::default())
        .oneshot(post_messages(
            r#"{"model": "m", "messages": [], "max_tokens": 5}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unroutable_model_is_bad_request() {
    // No providers configured at all.
    let response = app(Config::default())
        .oneshot(post_messages(
            r#"{"model": "mystery", "messages": [{"role": "user", "content": "hi"}], "max_tokens": 5}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["error"]["message"]
        .as_str()
        .unwrap()
        .contains("no provider"));
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    // A body one byte past the cap draws a 413.
    let padding = "x".repeat(MAX_BODY_BYTES + 1);
    let body = format!("{{\"pad\": \"{padding}\"}}");
    let response = app(Config::default())
        .oneshot(post_messages(&body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn body_of_exactly_the_cap_is_accepted() {
    // `{"pad": ""}` is 11 bytes of framing; fill to exactly 10 MiB. The
    // request clears the size gate and fails ordinary validation
    // instead (no model field).
    let padding = "x".repeat(MAX_BODY_BYTES - 11);
    let body = format!("{{\"pad\": \"{padding}\"}}");
    assert_eq!(body.len(), MAX_BODY_BYTES);
    let response = app(Config::default())
        .oneshot(post_messages(&body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ── Control plane ──────────────────────────────────────────────────

#[tokio::test]
async fn control_plane_spawn_and_abort_flow() {
    let state = test_state(Config::default());
    let router = api::router(state.clone()).with_state(state.clone());

    state
        .lifecycle
        .register_agent(AgentRegistration {
            id: "root".into(),
            parent_id: None,
            purpose: "orchestrate".into(),
            token_budget: 100_000,
        })
        .unwrap();

    // Spawn a child under root.
    let response = router
        .clone()
        .oneshot(
            Request::post("/api/agents/root/spawn")
                .header("content-type", "application/json")
                .body(Body::from(
                    r#"{"child_id": "worker", "purpose": "dig"}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["id"], "worker");
    assert_eq!(json["depth"], 1);
    // Budget defaulted to the decayed parent budget.
    assert_eq!(json["token_budget"], 70_000);

    // Tree view shows the nesting.
    let tree = router
        .clone()
        .oneshot(Request::get("/api/agents/tree").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let json = body_json(tree).await;
    assert_eq!(json[0]["id"], "root");
    assert_eq!(json[0]["children"][0]["id"], "worker");

    // Abort the child.
    let abort = router
        .clone()
        .oneshot(
            Request::post("/api/agents/worker/abort")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(abort.status(), StatusCode::OK);
    let json = body_json(abort).await;
    assert_eq!(json["killed_ids"][0], "worker");

    // Stats aggregate.
    let stats = router
        .clone()
        .oneshot(Request::get("/api/agents/stats").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let json = body_json(stats).await;
    assert_eq!(json["tree"]["total_agents"], 2);
    assert_eq!(json["tree"]["alive_agents"], 1);

    // Unknown agent is a 404.
    let missing = router
        .oneshot(Request::get("/api/agents/ghost").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn prompt_lands_on_the_bus() {
    let state = test_state(Config::default());
    let router = api::router(state.clone()).with_state(state.clone());

    state
        .lifecycle
        .register_agent(AgentRegistration {
            id: "root".into(),
            parent_id: None,
            purpose: String::new(),
            token_budget: 10_000,
        })
        .unwrap();

    let response = router
        .oneshot(
            Request::post("/api/agents/root/prompt")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"prompt": "summarize the logs"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let history = state.bus.history("agent:root:prompt", 0);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].payload["prompt"], "summarize the logs");
}

#[tokio::test]
async fn rate_limit_denies_with_429() {
    let config = Config::from_json(
        r#"{
            "providers": {"local": {"type": "openai-compat", "endpoint": "http://127.0.0.1:1/v1", "api_key": "k"}},
            "policy": {"preset": "standard", "overrides": {"max_llm_calls_per_minute": 1}}
        }"#,
    )
    .unwrap();
    let state = test_state(config);
    let router = api::router(state.clone()).with_state(state);

    // First call passes policy (then fails upstream, which is fine —
    // the connection refuses fast).
    let first = router
        .clone()
        .oneshot(post_messages(
            r#"{"model": "anything", "messages": [{"role": "user", "content": "hi"}], "max_tokens": 5, "metadata": {"user_id": "s1"}}"#,
        ))
        .await
        .unwrap();
    assert_ne!(first.status(), StatusCode::TOO_MANY_REQUESTS);

    // Second call in the same window trips the limiter.
    let second = router
        .oneshot(post_messages(
            r#"{"model": "anything", "messages": [{"role": "user", "content": "hi"}], "max_tokens": 5, "metadata": {"user_id": "s1"}}"#,
        ))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}
