//! Anthropic-native passthrough adapter.
//!
//! The client dialect *is* this upstream's dialect, so bodies are
//! forwarded unchanged aside from the resolved model name, and stream
//! events are relayed as-is.

use std::collections::HashMap;

use serde_json::Value;

use ens_domain::config::{ModelConfig, ProviderConfig};
use ens_domain::error::{Error, Result};
use ens_domain::stream::BoxStream;
use ens_domain::wire::{ChatRequest, ChatResponse, StreamEvent};

use crate::sse::upstream_event_stream;
use crate::traits::UpstreamProvider;
use crate::util::from_reqwest;

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct PassthroughProvider {
    name: String,
    base_url: String,
    api_key: Option<String>,
    extra_headers: HashMap<String, String>,
    models: HashMap<String, ModelConfig>,
    client: reqwest::Client,
}

impl PassthroughProvider {
    pub fn from_config(name: &str, cfg: &ProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            name: name.to_string(),
            base_url: cfg.base_url(),
            api_key: cfg.api_key.clone(),
            extra_headers: cfg.headers.clone(),
            models: cfg.models.clone(),
            client,
        })
    }

    fn upstream_model(&self, model: &str) -> String {
        self.models
            .get(model)
            .and_then(|m| m.upstream_name.clone())
            .unwrap_or_else(|| model.to_string())
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("anthropic-version", ANTHROPIC_VERSION);
        if let Some(key) = &self.api_key {
            builder = builder.header("x-api-key", key);
        }
        for (k, v) in &self.extra_headers {
            builder = builder.header(k, v);
        }
        builder
    }

    /// The request body: unchanged apart from the resolved model name.
    fn forward_body(&self, req: &ChatRequest, stream: bool) -> Result<Value> {
        let mut body = serde_json::to_value(req)?;
        body["model"] = Value::String(self.upstream_model(&req.model));
        if stream {
            body["stream"] = Value::Bool(true);
        } else if let Some(obj) = body.as_object_mut() {
            obj.remove("stream");
        }
        Ok(body)
    }

    async fn error_from_response(&self, resp: reqwest::Response) -> Error {
        let status = resp.status().as_u16();
        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let body = resp.text().await.unwrap_or_default();
        let mut message = format!("HTTP {status} - {body}");
        if let Some(after) = retry_after {
            message.push_str(&format!(" (Retry-After: {after})"));
        }
        Error::Provider {
            provider: self.name.clone(),
            message,
        }
    }
}

#[async_trait::async_trait]
impl UpstreamProvider for PassthroughProvider {
    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.forward_body(req, false)?;

        tracing::debug!(provider = %self.name, "passthrough request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;
        if !resp.status().is_success() {
            return Err(self.error_from_response(resp).await);
        }
        resp.json::<ChatResponse>().await.map_err(from_reqwest)
    }

    async fn send_stream(&self, req: &ChatRequest) -> Result<BoxStream<'static, StreamEvent>> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.forward_body(req, true)?;

        tracing::debug!(provider = %self.name, "passthrough stream request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;
        if !resp.status().is_success() {
            return Err(self.error_from_response(resp).await);
        }

        // Upstream already speaks the client dialect; relay events,
        // skipping anything that does not parse.
        Ok(upstream_event_stream(
            resp,
            Vec::new(),
            |data| match serde_json::from_str::<StreamEvent>(data) {
                Ok(event) => vec![event],
                Err(_) => {
                    tracing::debug!("skipping malformed passthrough event");
                    Vec::new()
                }
            },
            Vec::new,
        ))
    }

    async fn count_tokens(&self, req: &ChatRequest) -> Result<Value> {
        let url = format!("{}/v1/messages/count_tokens", self.base_url);
        let mut body = serde_json::to_value(req)?;
        body["model"] = Value::String(self.upstream_model(&req.model));
        if let Some(obj) = body.as_object_mut() {
            obj.remove("stream");
            obj.remove("max_tokens");
        }

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;
        if !resp.status().is_success() {
            return Err(self.error_from_response(resp).await);
        }
        resp.json::<Value>().await.map_err(from_reqwest)
    }

    fn provider_name(&self) -> &str {
        &self.name
    }
}
