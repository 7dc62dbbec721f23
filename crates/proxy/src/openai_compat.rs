//! OpenAI-compatible adapter.
//!
//! Works with OpenAI, Azure-style gateways, Ollama, vLLM, and any other
//! endpoint that follows the chat-completions contract. Translates the
//! normalized wire dialect in both directions, including the SSE stream:
//! chat-completion chunks in, client-dialect events out.

use std::collections::HashMap;

use serde_json::Value;

use ens_domain::config::{ModelConfig, ProviderConfig};
use ens_domain::error::{Error, Result};
use ens_domain::stream::BoxStream;
use ens_domain::wire::{
    BlockDelta, ChatRequest, ChatResponse, ContentBlock, MessageDeltaBody, StopReason,
    StreamEvent, ToolChoice, Usage, UsageDelta,
};

use crate::sse::upstream_event_stream;
use crate::traits::{estimate_tokens, UpstreamProvider};
use crate::util::{from_reqwest, is_o_series};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: Option<String>,
    extra_headers: HashMap<String, String>,
    models: HashMap<String, ModelConfig>,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
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
            max_retries: cfg.max_retries,
            client,
        })
    }

    /// The name to put on the wire, honoring per-model renames.
    fn upstream_model(&self, model: &str) -> String {
        self.models
            .get(model)
            .and_then(|m| m.upstream_name.clone())
            .unwrap_or_else(|| model.to_string())
    }

    fn capped_max_tokens(&self, model: &str, requested: u32) -> u32 {
        match self.models.get(model).and_then(|m| m.max_tokens_cap) {
            Some(cap) => requested.min(cap),
            None => requested,
        }
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(url)
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        for (k, v) in &self.extra_headers {
            builder = builder.header(k, v);
        }
        builder
    }

    async fn post_with_retries(&self, url: &str, body: &Value) -> Result<reqwest::Response> {
        let mut attempt = 0;
        loop {
            let result = self.authed_post(url).json(body).send().await;
            match result {
                Ok(resp) if resp.status().is_server_error() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        provider = %self.name,
                        status = resp.status().as_u16(),
                        attempt,
                        "upstream 5xx, retrying"
                    );
                }
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_timeout() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(provider = %self.name, attempt, "upstream timeout, retrying");
                }
                Err(e) => return Err(from_reqwest(e)),
            }
        }
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

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request conversion
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Re-shape a normalized request into a chat-completions body.
///
/// `thinking` blocks are dropped; o-series models take
/// `max_completion_tokens` instead of `max_tokens`.
pub fn build_chat_body(req: &ChatRequest, upstream_model: &str, max_tokens: u32, stream: bool) -> Value {
    let mut messages: Vec<Value> = Vec::new();

    if let Some(system) = req.system_text() {
        messages.push(serde_json::json!({"role": "system", "content": system}));
    }
    for msg in &req.messages {
        append_message(&mut messages, msg);
    }

    let mut body = serde_json::json!({
        "model": upstream_model,
        "messages": messages,
        "stream": stream,
    });

    if is_o_series(upstream_model) {
        body["max_completion_tokens"] = serde_json::json!(max_tokens);
    } else {
        body["max_tokens"] = serde_json::json!(max_tokens);
    }
    if let Some(temp) = req.temperature {
        body["temperature"] = serde_json::json!(temp);
    }
    if let Some(top_p) = req.top_p {
        body["top_p"] = serde_json::json!(top_p);
    }
    if let Some(stops) = &req.stop_sequences {
        if !stops.is_empty() {
            body["stop"] = serde_json::json!(stops);
        }
    }
    if let Some(tools) = &req.tools {
        if !tools.is_empty() {
            let tools: Vec<Value> = tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description.clone().unwrap_or_default(),
                            "parameters": t.input_schema,
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }
    }
    if let Some(choice) = &req.tool_choice {
        body["tool_choice"] = tool_choice_to_openai(choice);
    }
    if stream {
        body["stream_options"] = serde_json::json!({"include_usage": true});
    }
    body
}

fn tool_choice_to_openai(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => Value::String("auto".into()),
        ToolChoice::Any => Value::String("required".into()),
        ToolChoice::None => Value::String("none".into()),
        ToolChoice::Tool { name } => serde_json::json!({
            "type": "function",
            "function": {"name": name},
        }),
    }
}

/// A single wire message can expand to several chat-completion messages:
/// tool results become `role: tool` entries, the remaining blocks form
/// the user/assistant turn.
fn append_message(out: &mut Vec<Value>, msg: &ens_domain::wire::ChatMessage) {
    use ens_domain::wire::ChatRole;

    let blocks = msg.blocks();
    match msg.role {
        ChatRole::Assistant => {
            let mut text_parts: Vec<&str> = Vec::new();
            let mut tool_calls: Vec<Value> = Vec::new();
            for block in &blocks {
                match block {
                    ContentBlock::Text { text } => text_parts.push(text),
                    ContentBlock::ToolUse { id, name, input } => {
                        tool_calls.push(serde_json::json!({
                            "id": id,
                            "type": "function",
                            "function": {
                                "name": name,
                                "arguments": input.to_string(),
                            }
                        }));
                    }
                    // Thinking never goes back upstream.
                    _ => {}
                }
            }
            let mut entry = serde_json::json!({"role": "assistant"});
            entry["content"] = if text_parts.is_empty() {
                Value::Null
            } else {
                Value::String(text_parts.join("\n"))
            };
            if !tool_calls.is_empty() {
                entry["tool_calls"] = Value::Array(tool_calls);
            }
            out.push(entry);
        }
        ChatRole::User => {
            // Tool results first, so they directly follow the assistant
            // turn that issued the calls.
            let mut content_parts: Vec<Value> = Vec::new();
            for block in &blocks {
                match block {
                    ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        ..
                    } => {
                        let text = match content {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        out.push(serde_json::json!({
                            "role": "tool",
                            "tool_call_id": tool_use_id,
                            "content": text,
                        }));
                    }
                    ContentBlock::Text { text } => {
                        content_parts.push(serde_json::json!({"type": "text", "text": text}));
                    }
                    ContentBlock::Image { source } => {
                        content_parts.push(serde_json::json!({
                            "type": "image_url",
                            "image_url": {"url": source.to_data_url()},
                        }));
                    }
                    _ => {}
                }
            }
            if !content_parts.is_empty() {
                // Collapse a lone text part to a plain string.
                let content = match content_parts.as_slice() {
                    [only] if only["type"] == "text" => only["text"].clone(),
                    _ => Value::Array(content_parts),
                };
                out.push(serde_json::json!({"role": "user", "content": content}));
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response conversion
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn map_finish_reason(reason: &str) -> StopReason {
    match reason {
        "length" => StopReason::MaxTokens,
        "tool_calls" => StopReason::ToolUse,
        // "stop", "content_filter", and anything unknown.
        _ => StopReason::EndTurn,
    }
}

/// Parse a complete chat-completions response into the wire dialect.
pub fn parse_chat_response(body: &Value, provider: &str, fallback_model: &str) -> Result<ChatResponse> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Provider {
            provider: provider.to_string(),
            message: "no choices in response".into(),
        })?;

    let message = choice.get("message").ok_or_else(|| Error::Provider {
        provider: provider.to_string(),
        message: "no message in choice".into(),
    })?;

    let mut content: Vec<ContentBlock> = Vec::new();
    if let Some(text) = message.get("content").and_then(|v| v.as_str()) {
        if !text.is_empty() {
            content.push(ContentBlock::Text { text: text.into() });
        }
    }
    if let Some(calls) = message.get("tool_calls").and_then(|v| v.as_array()) {
        for call in calls {
            let Some(id) = call.get("id").and_then(|v| v.as_str()) else {
                continue;
            };
            let func = call.get("function").cloned().unwrap_or_default();
            let name = func.get("name").and_then(|v| v.as_str()).unwrap_or("");
            let args = func.get("arguments").and_then(|v| v.as_str()).unwrap_or("{}");
            let input: Value = serde_json::from_str(args).unwrap_or(Value::Object(Default::default()));
            content.push(ContentBlock::ToolUse {
                id: id.to_string(),
                name: name.to_string(),
                input,
            });
        }
    }

    let stop_reason = choice
        .get("finish_reason")
        .and_then(|v| v.as_str())
        .map(map_finish_reason);

    let usage = body
        .get("usage")
        .map(|u| Usage {
            input_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            output_tokens: u
                .get("completion_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32,
        })
        .unwrap_or_default();

    Ok(ChatResponse {
        id: body
            .get("id")
            .and_then(|v| v.as_str())
            .map(String::from)
            .unwrap_or_else(|| format!("msg_{}", uuid::Uuid::new_v4().simple())),
        kind: "message".into(),
        role: "assistant".into(),
        model: body
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or(fallback_model)
            .to_string(),
        content,
        stop_reason,
        stop_sequence: None,
        usage,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stream translation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum OpenBlock {
    Text,
    ToolUse,
    Thinking,
}

/// Per-stream state machine translating chat-completion chunks into the
/// client event sequence.
pub struct OpenAiStreamTranslator {
    message_id: String,
    model: String,
    open_block: Option<OpenBlock>,
    next_index: usize,
    output_tokens: Option<u32>,
    finished: bool,
}

impl OpenAiStreamTranslator {
    pub fn new(model: &str) -> Self {
        Self {
            message_id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            model: model.to_string(),
            open_block: None,
            next_index: 0,
            output_tokens: None,
            finished: false,
        }
    }

    /// Events emitted before any upstream data: the message shell and a
    /// ping, per the client dialect.
    pub fn prelude(&self) -> Vec<StreamEvent> {
        vec![
            StreamEvent::MessageStart {
                message: ChatResponse::shell(self.message_id.clone(), self.model.clone()),
            },
            StreamEvent::Ping,
        ]
    }

    fn open_block_index(&self) -> usize {
        self.next_index - 1
    }

    fn close_open_block(&mut self, out: &mut Vec<StreamEvent>) {
        if self.open_block.take().is_some() {
            out.push(StreamEvent::ContentBlockStop {
                index: self.open_block_index(),
            });
        }
    }

    fn start_block(&mut self, block: ContentBlock, kind: OpenBlock, out: &mut Vec<StreamEvent>) {
        self.close_open_block(out);
        out.push(StreamEvent::ContentBlockStart {
            index: self.next_index,
            content_block: block,
        });
        self.open_block = Some(kind);
        self.next_index += 1;
    }

    fn finish(&mut self, stop_reason: StopReason, out: &mut Vec<StreamEvent>) {
        if self.finished {
            return;
        }
        self.close_open_block(out);
        out.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: Some(stop_reason),
                stop_sequence: None,
            },
            usage: self.output_tokens.map(|output_tokens| UsageDelta { output_tokens }),
        });
        out.push(StreamEvent::MessageStop);
        self.finished = true;
    }

    /// Translate one `data:` payload. Malformed payloads yield nothing.
    pub fn on_data(&mut self, data: &str) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        if self.finished {
            return out;
        }
        if data.trim() == "[DONE]" {
            self.finish(StopReason::EndTurn, &mut out);
            return out;
        }

        let chunk: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(_) => {
                tracing::debug!("skipping malformed upstream chunk");
                return out;
            }
        };

        let choice = chunk
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first());

        // Usage-only chunk (stream_options.include_usage).
        let Some(choice) = choice else {
            if let Some(tokens) = chunk
                .get("usage")
                .and_then(|u| u.get("completion_tokens"))
                .and_then(|v| v.as_u64())
            {
                self.output_tokens = Some(tokens as u32);
            }
            return out;
        };

        if let Some(usage) = chunk.get("usage") {
            if let Some(tokens) = usage.get("completion_tokens").and_then(|v| v.as_u64()) {
                self.output_tokens = Some(tokens as u32);
            }
        }

        let delta = choice.get("delta").unwrap_or(&Value::Null);

        // Tool-call deltas.
        if let Some(calls) = delta.get("tool_calls").and_then(|v| v.as_array()) {
            for call in calls {
                if let Some(id) = call.get("id").and_then(|v| v.as_str()) {
                    let name = call
                        .get("function")
                        .and_then(|f| f.get("name"))
                        .and_then(|v| v.as_str())
                        .unwrap_or("");
                    self.start_block(
                        ContentBlock::ToolUse {
                            id: id.to_string(),
                            name: name.to_string(),
                            input: Value::Object(Default::default()),
                        },
                        OpenBlock::ToolUse,
                        &mut out,
                    );
                }
                if let Some(args) = call
                    .get("function")
                    .and_then(|f| f.get("arguments"))
                    .and_then(|v| v.as_str())
                {
                    if !args.is_empty() && matches!(self.open_block, Some(OpenBlock::ToolUse)) {
                        out.push(StreamEvent::ContentBlockDelta {
                            index: self.open_block_index(),
                            delta: BlockDelta::InputJsonDelta {
                                partial_json: args.to_string(),
                            },
                        });
                    }
                }
            }
        }

        // Reasoning deltas (DeepSeek-style `reasoning_content`).
        if let Some(text) = delta.get("reasoning_content").and_then(|v| v.as_str()) {
            if !text.is_empty() {
                if !matches!(self.open_block, Some(OpenBlock::Thinking)) {
                    self.start_block(
                        ContentBlock::Thinking {
                            thinking: String::new(),
                        },
                        OpenBlock::Thinking,
                        &mut out,
                    );
                }
                out.push(StreamEvent::ContentBlockDelta {
                    index: self.open_block_index(),
                    delta: BlockDelta::ThinkingDelta {
                        thinking: text.to_string(),
                    },
                });
            }
        }

        // Text deltas.
        if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
            if !text.is_empty() {
                if !matches!(self.open_block, Some(OpenBlock::Text)) {
                    self.start_block(
                        ContentBlock::Text {
                            text: String::new(),
                        },
                        OpenBlock::Text,
                        &mut out,
                    );
                }
                out.push(StreamEvent::ContentBlockDelta {
                    index: self.open_block_index(),
                    delta: BlockDelta::TextDelta {
                        text: text.to_string(),
                    },
                });
            }
        }

        // Finish reason closes the message.
        if let Some(reason) = choice.get("finish_reason").and_then(|v| v.as_str()) {
            let stop = map_finish_reason(reason);
            self.finish(stop, &mut out);
        }

        out
    }

    /// Close out a stream the upstream abandoned without a finish.
    pub fn flush(&mut self) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        self.finish(StopReason::EndTurn, &mut out);
        out
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl UpstreamProvider for OpenAiCompatProvider {
    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let upstream_model = self.upstream_model(&req.model);
        let max_tokens = self.capped_max_tokens(&req.model, req.max_tokens);
        let body = build_chat_body(req, &upstream_model, max_tokens, false);

        tracing::debug!(provider = %self.name, model = %upstream_model, "chat request");

        let resp = self.post_with_retries(&url, &body).await?;
        if !resp.status().is_success() {
            return Err(self.error_from_response(resp).await);
        }
        let resp_json: Value = resp.json().await.map_err(from_reqwest)?;
        parse_chat_response(&resp_json, &self.name, &upstream_model)
    }

    async fn send_stream(&self, req: &ChatRequest) -> Result<BoxStream<'static, StreamEvent>> {
        let url = format!("{}/chat/completions", self.base_url);
        let upstream_model = self.upstream_model(&req.model);
        let max_tokens = self.capped_max_tokens(&req.model, req.max_tokens);
        let body = build_chat_body(req, &upstream_model, max_tokens, true);

        tracing::debug!(provider = %self.name, model = %upstream_model, "stream request");

        let resp = self.post_with_retries(&url, &body).await?;
        if !resp.status().is_success() {
            return Err(self.error_from_response(resp).await);
        }

        let translator = OpenAiStreamTranslator::new(&req.model);
        let prelude = translator.prelude();
        let translator = std::sync::Arc::new(parking_lot::Mutex::new(translator));
        let for_flush = translator.clone();
        Ok(upstream_event_stream(
            resp,
            prelude,
            move |data| translator.lock().on_data(data),
            move || for_flush.lock().flush(),
        ))
    }

    async fn count_tokens(&self, req: &ChatRequest) -> Result<Value> {
        let estimate = estimate_tokens(&serde_json::to_value(req)?);
        Ok(serde_json::json!({"input_tokens": estimate}))
    }

    fn provider_name(&self) -> &str {
        &self.name
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use ens_domain::wire::{ChatMessage, MessageContent, SystemPrompt, ToolDefinition};

    fn basic_request(model: &str) -> ChatRequest {
        ChatRequest {
            model: model.into(),
            messages: vec![ChatMessage::user("hello")],
            system: None,
            max_tokens: 256,
            temperature: None,
            top_p: None,
            stop_sequences: None,
            tools: None,
            tool_choice: None,
            stream: None,
            metadata: None,
        }
    }

    #[test]
    fn system_prompt_becomes_first_message() {
        let mut req = basic_request("gpt-4.1-mini");
        req.system = Some(SystemPrompt::Text("be brief".into()));
        let body = build_chat_body(&req, "gpt-4.1-mini", 256, false);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "be brief");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["max_tokens"], 256);
    }

    #[test]
    fn o_series_uses_max_completion_tokens() {
        let req = basic_request("o3-mini");
        let body = build_chat_body(&req, "o3-mini", 512, false);
        assert_eq!(body["max_completion_tokens"], 512);
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn tool_result_becomes_tool_role_message() {
        let mut req = basic_request("gpt-4.1-mini");
        req.messages = vec![ChatMessage {
            role: ens_domain::wire::ChatRole::User,
            content: MessageContent::Blocks(vec![
                ContentBlock::ToolResult {
                    tool_use_id: "call_1".into(),
                    content: Value::String("42".into()),
                    is_error: false,
                },
                ContentBlock::Text {
                    text: "what next?".into(),
                },
            ]),
        }];
        let body = build_chat_body(&req, "gpt-4.1-mini", 64, false);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "tool");
        assert_eq!(messages[0]["tool_call_id"], "call_1");
        assert_eq!(messages[0]["content"], "42");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[1]["content"], "what next?");
    }

    #[test]
    fn assistant_tool_use_becomes_tool_calls() {
        let mut req = basic_request("gpt-4.1-mini");
        req.messages = vec![ChatMessage {
            role: ens_domain::wire::ChatRole::Assistant,
            content: MessageContent::Blocks(vec![ContentBlock::ToolUse {
                id: "call_9".into(),
                name: "read_file".into(),
                input: serde_json::json!({"path": "/x"}),
            }]),
        }];
        let body = build_chat_body(&req, "gpt-4.1-mini", 64, false);
        let calls = body["messages"][0]["tool_calls"].as_array().unwrap();
        assert_eq!(calls[0]["function"]["name"], "read_file");
        assert_eq!(body["messages"][0]["content"], Value::Null);
    }

    #[test]
    fn image_blocks_become_data_urls() {
        let mut req = basic_request("gpt-4.1-mini");
        req.messages = vec![ChatMessage {
            role: ens_domain::wire::ChatRole::User,
            content: MessageContent::Blocks(vec![
                ContentBlock::Text { text: "look".into() },
                ContentBlock::Image {
                    source: ens_domain::wire::ImageSource {
                        source_type: "base64".into(),
                        media_type: "image/png".into(),
                        data: "aGk=".into(),
                    },
                },
            ]),
        }];
        let body = build_chat_body(&req, "gpt-4.1-mini", 64, false);
        let parts = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(parts[1]["image_url"]["url"], "data:image/png;base64,aGk=");
    }

    #[test]
    fn thinking_blocks_are_dropped() {
        let mut req = basic_request("gpt-4.1-mini");
        req.messages = vec![ChatMessage {
            role: ens_domain::wire::ChatRole::Assistant,
            content: MessageContent::Blocks(vec![
                ContentBlock::Thinking {
                    thinking: "secret reasoning".into(),
                },
                ContentBlock::Text { text: "answer".into() },
            ]),
        }];
        let body = build_chat_body(&req, "gpt-4.1-mini", 64, false);
        assert_eq!(body["messages"][0]["content"], "answer");
        assert!(!body.to_string().contains("secret reasoning"));
    }

    #[test]
    fn tool_choice_translations() {
        let mut req = basic_request("gpt-4.1-mini");
        req.tools = Some(vec![ToolDefinition {
            name: "t".into(),
            description: None,
            input_schema: serde_json::json!({"type": "object"}),
        }]);

        req.tool_choice = Some(ToolChoice::Any);
        let body = build_chat_body(&req, "m", 64, false);
        assert_eq!(body["tool_choice"], "required");

        req.tool_choice = Some(ToolChoice::Tool { name: "t".into() });
        let body = build_chat_body(&req, "m", 64, false);
        assert_eq!(body["tool_choice"]["function"]["name"], "t");
    }

    #[test]
    fn response_parse_maps_finish_reasons() {
        let body = serde_json::json!({
            "id": "chatcmpl-1",
            "model": "gpt-4.1-mini",
            "choices": [{
                "message": {"content": "hi", "role": "assistant"},
                "finish_reason": "length",
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5},
        });
        let resp = parse_chat_response(&body, "openai", "fallback").unwrap();
        assert_eq!(resp.stop_reason, Some(StopReason::MaxTokens));
        assert_eq!(resp.usage.input_tokens, 10);
        assert_eq!(resp.usage.output_tokens, 5);
        assert_eq!(
            resp.content,
            vec![ContentBlock::Text { text: "hi".into() }]
        );
    }

    #[test]
    fn response_parse_extracts_tool_calls() {
        let body = serde_json::json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "function": {"name": "exec", "arguments": "{\"cmd\":\"ls\"}"},
                    }],
                },
                "finish_reason": "tool_calls",
            }],
        });
        let resp = parse_chat_response(&body, "openai", "m").unwrap();
        assert_eq!(resp.stop_reason, Some(StopReason::ToolUse));
        assert!(matches!(
            &resp.content[0],
            ContentBlock::ToolUse { name, input, .. }
                if name == "exec" && input["cmd"] == "ls"
        ));
    }

    // ── Stream translation ─────────────────────────────────────────

    fn event_names(events: &[StreamEvent]) -> Vec<&'static str> {
        events.iter().map(|e| e.event_name()).collect()
    }

    #[test]
    fn text_stream_round_trip() {
        let mut tr = OpenAiStreamTranslator::new("gpt-4.1-mini");
        let mut events = tr.prelude();
        events.extend(tr.on_data(r#"{"choices":[{"delta":{"content":"Hel"}}]}"#));
        events.extend(tr.on_data(r#"{"choices":[{"delta":{"content":"lo"}}]}"#));
        events.extend(tr.on_data(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#));
        events.extend(tr.on_data("[DONE]"));

        assert_eq!(
            event_names(&events),
            vec![
                "message_start",
                "ping",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );

        // Concatenated text deltas equal the upstream content.
        let text: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ContentBlockDelta {
                    delta: BlockDelta::TextDelta { text },
                    ..
                } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Hello");

        // Stop reason mapped to end_turn.
        assert!(events.iter().any(|e| matches!(
            e,
            StreamEvent::MessageDelta { delta, .. }
                if delta.stop_reason == Some(StopReason::EndTurn)
        )));
    }

    #[test]
    fn tool_call_stream_emits_input_json_deltas() {
        let mut tr = OpenAiStreamTranslator::new("m");
        let mut events = Vec::new();
        events.extend(tr.on_data(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"exec","arguments":""}}]}}]}"#,
        ));
        events.extend(tr.on_data(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"cmd\":"}}]}}]}"#,
        ));
        events.extend(tr.on_data(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"ls\"}"}}]}}]}"#,
        ));
        events.extend(tr.on_data(r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#));

        assert_eq!(
            event_names(&events),
            vec![
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
        let json: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ContentBlockDelta {
                    delta: BlockDelta::InputJsonDelta { partial_json },
                    ..
                } => Some(partial_json.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(json, "{\"cmd\":\"ls\"}");
    }

    #[test]
    fn malformed_chunks_are_skipped() {
        let mut tr = OpenAiStreamTranslator::new("m");
        assert!(tr.on_data("{not json").is_empty());
        assert!(tr.on_data("").is_empty());
        // Stream still works afterwards.
        let events = tr.on_data(r#"{"choices":[{"delta":{"content":"ok"}}]}"#);
        assert_eq!(events.len(), 2); // block start + delta
    }

    #[test]
    fn usage_chunk_lands_in_message_delta() {
        let mut tr = OpenAiStreamTranslator::new("m");
        tr.on_data(r#"{"choices":[{"delta":{"content":"x"}}]}"#);
        tr.on_data(r#"{"choices":[],"usage":{"prompt_tokens":3,"completion_tokens":7}}"#);
        let events = tr.on_data(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#);
        assert!(events.iter().any(|e| matches!(
            e,
            StreamEvent::MessageDelta { usage: Some(u), .. } if u.output_tokens == 7
        )));
    }

    #[test]
    fn flush_closes_abandoned_stream() {
        let mut tr = OpenAiStreamTranslator::new("m");
        tr.on_data(r#"{"choices":[{"delta":{"content":"partial"}}]}"#);
        let tail = tr.flush();
        assert_eq!(
            event_names(&tail),
            vec!["content_block_stop", "message_delta", "message_stop"]
        );
        // Idempotent once finished.
        assert!(tr.flush().is_empty());
    }

    #[test]
    fn events_after_finish_are_dropped() {
        let mut tr = OpenAiStreamTranslator::new("m");
        tr.on_data(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#);
        assert!(tr.on_data(r#"{"choices":[{"delta":{"content":"late"}}]}"#).is_empty());
    }
}
