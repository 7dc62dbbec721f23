//! Google Gemini adapter.
//!
//! Speaks the `generateContent` / `streamGenerateContent` APIs. Auth is
//! an API key in the query string. Gemini has no tool-call ids, so the
//! adapter mints them; tool results are matched by function name.

use std::collections::HashMap;

use serde_json::Value;

use ens_domain::config::{ModelConfig, ProviderConfig};
use ens_domain::error::{Error, Result};
use ens_domain::stream::BoxStream;
use ens_domain::wire::{
    BlockDelta, ChatMessage, ChatRequest, ChatResponse, ChatRole, ContentBlock, MessageDeltaBody,
    StopReason, StreamEvent, Usage, UsageDelta,
};

use crate::sse::upstream_event_stream;
use crate::traits::{estimate_tokens, UpstreamProvider};
use crate::util::from_reqwest;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct GoogleProvider {
    name: String,
    base_url: String,
    api_key: String,
    models: HashMap<String, ModelConfig>,
    client: reqwest::Client,
}

impl GoogleProvider {
    pub fn from_config(name: &str, cfg: &ProviderConfig) -> Result<Self> {
        let api_key = cfg
            .api_key
            .clone()
            .ok_or_else(|| Error::Config(format!("provider '{name}' requires an api_key")))?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            name: name.to_string(),
            base_url: cfg.base_url(),
            api_key,
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

    fn generate_url(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, model, self.api_key
        )
    }

    fn stream_url(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url, model, self.api_key
        )
    }

    fn count_url(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:countTokens?key={}",
            self.base_url, model, self.api_key
        )
    }

    async fn error_from_response(&self, resp: reqwest::Response) -> Error {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Error::Provider {
            provider: self.name.clone(),
            message: format!("HTTP {status} - {body}"),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request conversion
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Re-shape a normalized request into a `generateContent` body.
pub fn build_generate_body(req: &ChatRequest) -> Value {
    let contents: Vec<Value> = req.messages.iter().map(message_to_gemini).collect();

    let mut body = serde_json::json!({
        "contents": contents,
    });

    if let Some(system) = req.system_text() {
        body["systemInstruction"] = serde_json::json!({
            "parts": [{"text": system}],
        });
    }

    if let Some(tools) = &req.tools {
        if !tools.is_empty() {
            let declarations: Vec<Value> = tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "name": t.name,
                        "description": t.description.clone().unwrap_or_default(),
                        "parameters": t.input_schema,
                    })
                })
                .collect();
            body["tools"] = serde_json::json!([{
                "functionDeclarations": declarations,
            }]);
        }
    }

    let mut generation = serde_json::json!({
        "maxOutputTokens": req.max_tokens,
    });
    if let Some(temp) = req.temperature {
        generation["temperature"] = serde_json::json!(temp);
    }
    if let Some(top_p) = req.top_p {
        generation["topP"] = serde_json::json!(top_p);
    }
    if let Some(stops) = &req.stop_sequences {
        if !stops.is_empty() {
            generation["stopSequences"] = serde_json::json!(stops);
        }
    }
    body["generationConfig"] = generation;

    body
}

fn message_to_gemini(msg: &ChatMessage) -> Value {
    let role = match msg.role {
        ChatRole::User => "user",
        ChatRole::Assistant => "model",
    };
    let mut parts: Vec<Value> = Vec::new();
    for block in msg.blocks() {
        match block {
            ContentBlock::Text { text } => {
                parts.push(serde_json::json!({"text": text}));
            }
            ContentBlock::Image { source } => {
                parts.push(serde_json::json!({
                    "inlineData": {
                        "mimeType": source.media_type,
                        "data": source.data,
                    }
                }));
            }
            ContentBlock::ToolUse { name, input, .. } => {
                parts.push(serde_json::json!({
                    "functionCall": {
                        "name": name,
                        "args": input,
                    }
                }));
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => {
                // Gemini matches responses by function name; the routed
                // id carries `name:` when the caller preserved it.
                let name = tool_use_id
                    .split_once(':')
                    .map(|(name, _)| name.to_string())
                    .unwrap_or(tool_use_id);
                parts.push(serde_json::json!({
                    "functionResponse": {
                        "name": name,
                        "response": {"content": content},
                    }
                }));
            }
            // Thinking never goes back upstream.
            ContentBlock::Thinking { .. } => {}
        }
    }
    serde_json::json!({"role": role, "parts": parts})
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response conversion
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn map_finish_reason(reason: &str) -> StopReason {
    match reason {
        "MAX_TOKENS" => StopReason::MaxTokens,
        // "STOP", "SAFETY", "RECITATION", and anything unknown.
        _ => StopReason::EndTurn,
    }
}

fn parse_usage(body: &Value) -> Usage {
    let meta = body.get("usageMetadata");
    Usage {
        input_tokens: meta
            .and_then(|m| m.get("promptTokenCount"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32,
        output_tokens: meta
            .and_then(|m| m.get("candidatesTokenCount"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32,
    }
}

/// Parse a complete `generateContent` response into the wire dialect.
pub fn parse_generate_response(body: &Value, provider: &str, model: &str) -> Result<ChatResponse> {
    let candidate = body
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Provider {
            provider: provider.to_string(),
            message: "no candidates in response".into(),
        })?;

    let mut content: Vec<ContentBlock> = Vec::new();
    let mut has_tool_call = false;
    if let Some(parts) = candidate
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
    {
        for part in parts {
            if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
                if !text.is_empty() {
                    content.push(ContentBlock::Text { text: text.into() });
                }
            }
            if let Some(call) = part.get("functionCall") {
                has_tool_call = true;
                let name = call.get("name").and_then(|v| v.as_str()).unwrap_or("");
                content.push(ContentBlock::ToolUse {
                    id: format!("{name}:{}", uuid::Uuid::new_v4().simple()),
                    name: name.to_string(),
                    input: call.get("args").cloned().unwrap_or(Value::Object(Default::default())),
                });
            }
        }
    }

    let stop_reason = if has_tool_call {
        Some(StopReason::ToolUse)
    } else {
        candidate
            .get("finishReason")
            .and_then(|v| v.as_str())
            .map(map_finish_reason)
    };

    Ok(ChatResponse {
        id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
        kind: "message".into(),
        role: "assistant".into(),
        model: model.to_string(),
        content,
        stop_reason,
        stop_sequence: None,
        usage: parse_usage(body),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stream translation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-stream state machine translating `streamGenerateContent` chunks
/// into the client event sequence.
pub struct GeminiStreamTranslator {
    message_id: String,
    model: String,
    text_block_open: bool,
    next_index: usize,
    output_tokens: Option<u32>,
    stop_reason: Option<StopReason>,
    finished: bool,
}

impl GeminiStreamTranslator {
    pub fn new(model: &str) -> Self {
        Self {
            message_id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            model: model.to_string(),
            text_block_open: false,
            next_index: 0,
            output_tokens: None,
            stop_reason: None,
            finished: false,
        }
    }

    pub fn prelude(&self) -> Vec<StreamEvent> {
        vec![
            StreamEvent::MessageStart {
                message: ChatResponse::shell(self.message_id.clone(), self.model.clone()),
            },
            StreamEvent::Ping,
        ]
    }

    fn close_text_block(&mut self, out: &mut Vec<StreamEvent>) {
        if self.text_block_open {
            out.push(StreamEvent::ContentBlockStop {
                index: self.next_index - 1,
            });
            self.text_block_open = false;
        }
    }

    fn finish(&mut self, out: &mut Vec<StreamEvent>) {
        if self.finished {
            return;
        }
        self.close_text_block(out);
        out.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: Some(self.stop_reason.unwrap_or(StopReason::EndTurn)),
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
        let chunk: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(_) => {
                tracing::debug!("skipping malformed upstream chunk");
                return out;
            }
        };

        if let Some(tokens) = chunk
            .get("usageMetadata")
            .and_then(|m| m.get("candidatesTokenCount"))
            .and_then(|v| v.as_u64())
        {
            self.output_tokens = Some(tokens as u32);
        }

        let Some(candidate) = chunk
            .get("candidates")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first())
        else {
            return out;
        };

        if let Some(parts) = candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.as_array())
        {
            for part in parts {
                if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
                    if text.is_empty() {
                        continue;
                    }
                    if !self.text_block_open {
                        out.push(StreamEvent::ContentBlockStart {
                            index: self.next_index,
                            content_block: ContentBlock::Text {
                                text: String::new(),
                            },
                        });
                        self.next_index += 1;
                        self.text_block_open = true;
                    }
                    out.push(StreamEvent::ContentBlockDelta {
                        index: self.next_index - 1,
                        delta: BlockDelta::TextDelta { text: text.into() },
                    });
                }
                if let Some(call) = part.get("functionCall") {
                    self.close_text_block(&mut out);
                    let name = call.get("name").and_then(|v| v.as_str()).unwrap_or("");
                    let args = call
                        .get("args")
                        .cloned()
                        .unwrap_or(Value::Object(Default::default()));
                    let index = self.next_index;
                    self.next_index += 1;
                    out.push(StreamEvent::ContentBlockStart {
                        index,
                        content_block: ContentBlock::ToolUse {
                            id: format!("{name}:{}", uuid::Uuid::new_v4().simple()),
                            name: name.to_string(),
                            input: Value::Object(Default::default()),
                        },
                    });
                    // Gemini delivers arguments whole, not incrementally.
                    out.push(StreamEvent::ContentBlockDelta {
                        index,
                        delta: BlockDelta::InputJsonDelta {
                            partial_json: args.to_string(),
                        },
                    });
                    out.push(StreamEvent::ContentBlockStop { index });
                    self.stop_reason = Some(StopReason::ToolUse);
                }
            }
        }

        if let Some(reason) = candidate.get("finishReason").and_then(|v| v.as_str()) {
            if self.stop_reason.is_none() {
                self.stop_reason = Some(map_finish_reason(reason));
            }
            self.finish(&mut out);
        }

        out
    }

    pub fn flush(&mut self) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        self.finish(&mut out);
        out
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl UpstreamProvider for GoogleProvider {
    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let model = self.upstream_model(&req.model);
        let url = self.generate_url(&model);
        let body = build_generate_body(req);

        tracing::debug!(provider = %self.name, model = %model, "generateContent request");

        let resp = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;
        if !resp.status().is_success() {
            return Err(self.error_from_response(resp).await);
        }
        let resp_json: Value = resp.json().await.map_err(from_reqwest)?;
        parse_generate_response(&resp_json, &self.name, &req.model)
    }

    async fn send_stream(&self, req: &ChatRequest) -> Result<BoxStream<'static, StreamEvent>> {
        let model = self.upstream_model(&req.model);
        let url = self.stream_url(&model);
        let body = build_generate_body(req);

        tracing::debug!(provider = %self.name, model = %model, "streamGenerateContent request");

        let resp = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;
        if !resp.status().is_success() {
            return Err(self.error_from_response(resp).await);
        }

        let translator = GeminiStreamTranslator::new(&req.model);
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
        let model = self.upstream_model(&req.model);
        let url = self.count_url(&model);
        let body = serde_json::json!({
            "contents": req.messages.iter().map(message_to_gemini).collect::<Vec<_>>(),
        });

        let resp = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;
        if !resp.status().is_success() {
            // Fall back to the local estimate rather than failing the
            // whole request for a count.
            let estimate = estimate_tokens(&serde_json::to_value(req)?);
            return Ok(serde_json::json!({"input_tokens": estimate}));
        }
        let resp_json: Value = resp.json().await.map_err(from_reqwest)?;
        let total = resp_json
            .get("totalTokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        Ok(serde_json::json!({"input_tokens": total}))
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
    use ens_domain::wire::{MessageContent, SystemPrompt};

    fn request_with(messages: Vec<ChatMessage>) -> ChatRequest {
        ChatRequest {
            model: "gemini-2.0-flash".into(),
            messages,
            system: Some(SystemPrompt::Text("be helpful".into())),
            max_tokens: 128,
            temperature: Some(0.3),
            top_p: None,
            stop_sequences: None,
            tools: None,
            tool_choice: None,
            stream: None,
            metadata: None,
        }
    }

    #[test]
    fn system_becomes_system_instruction() {
        let body = build_generate_body(&request_with(vec![ChatMessage::user("hi")]));
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be helpful");
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hi");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 128);
    }

    #[test]
    fn assistant_role_maps_to_model() {
        let body = build_generate_body(&request_with(vec![
            ChatMessage::user("q"),
            ChatMessage::assistant("a"),
        ]));
        assert_eq!(body["contents"][1]["role"], "model");
    }

    #[test]
    fn tool_blocks_become_function_parts() {
        let messages = vec![
            ChatMessage {
                role: ChatRole::Assistant,
                content: MessageContent::Blocks(vec![ContentBlock::ToolUse {
                    id: "lookup:abc".into(),
                    name: "lookup".into(),
                    input: serde_json::json!({"q": "rust"}),
                }]),
            },
            ChatMessage {
                role: ChatRole::User,
                content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                    tool_use_id: "lookup:abc".into(),
                    content: Value::String("found it".into()),
                    is_error: false,
                }]),
            },
        ];
        let body = build_generate_body(&request_with(messages));
        assert_eq!(body["contents"][0]["parts"][0]["functionCall"]["name"], "lookup");
        let resp = &body["contents"][1]["parts"][0]["functionResponse"];
        assert_eq!(resp["name"], "lookup");
        assert_eq!(resp["response"]["content"], "found it");
    }

    #[test]
    fn image_blocks_become_inline_data() {
        let messages = vec![ChatMessage {
            role: ChatRole::User,
            content: MessageContent::Blocks(vec![ContentBlock::Image {
                source: ens_domain::wire::ImageSource {
                    source_type: "base64".into(),
                    media_type: "image/png".into(),
                    data: "aGk=".into(),
                },
            }]),
        }];
        let body = build_generate_body(&request_with(messages));
        let inline = &body["contents"][0]["parts"][0]["inlineData"];
        assert_eq!(inline["mimeType"], "image/png");
        assert_eq!(inline["data"], "aGk=");
    }

    #[test]
    fn response_parse_text_and_usage() {
        let body = serde_json::json!({
            "candidates": [{
                "content": {"parts": [{"text": "bonjour"}], "role": "model"},
                "finishReason": "STOP",
            }],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2},
        });
        let resp = parse_generate_response(&body, "google", "gemini-2.0-flash").unwrap();
        assert_eq!(resp.stop_reason, Some(StopReason::EndTurn));
        assert_eq!(resp.usage.input_tokens, 4);
        assert!(matches!(&resp.content[0], ContentBlock::Text { text } if text == "bonjour"));
    }

    #[test]
    fn response_parse_function_call_sets_tool_use() {
        let body = serde_json::json!({
            "candidates": [{
                "content": {"parts": [
                    {"functionCall": {"name": "exec", "args": {"cmd": "ls"}}},
                ]},
                "finishReason": "STOP",
            }],
        });
        let resp = parse_generate_response(&body, "google", "m").unwrap();
        assert_eq!(resp.stop_reason, Some(StopReason::ToolUse));
        assert!(matches!(
            &resp.content[0],
            ContentBlock::ToolUse { name, .. } if name == "exec"
        ));
    }

    #[test]
    fn stream_text_round_trip() {
        let mut tr = GeminiStreamTranslator::new("gemini-2.0-flash");
        let mut events = tr.prelude();
        events.extend(tr.on_data(
            r#"{"candidates":[{"content":{"parts":[{"text":"Bon"}]}}]}"#,
        ));
        events.extend(tr.on_data(
            r#"{"candidates":[{"content":{"parts":[{"text":"jour"}]},"finishReason":"STOP"}],"usageMetadata":{"candidatesTokenCount":3}}"#,
        ));

        let names: Vec<&str> = events.iter().map(|e| e.event_name()).collect();
        assert_eq!(
            names,
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
        assert_eq!(text, "Bonjour");
    }

    #[test]
    fn stream_function_call_emits_whole_arguments() {
        let mut tr = GeminiStreamTranslator::new("m");
        let events = tr.on_data(
            r#"{"candidates":[{"content":{"parts":[{"functionCall":{"name":"exec","args":{"cmd":"ls"}}}]},"finishReason":"STOP"}]}"#,
        );
        let names: Vec<&str> = events.iter().map(|e| e.event_name()).collect();
        assert_eq!(
            names,
            vec![
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
        assert!(events.iter().any(|e| matches!(
            e,
            StreamEvent::MessageDelta { delta, .. }
                if delta.stop_reason == Some(StopReason::ToolUse)
        )));
    }

    #[test]
    fn malformed_chunks_are_skipped() {
        let mut tr = GeminiStreamTranslator::new("m");
        assert!(tr.on_data("{broken").is_empty());
        let events = tr.on_data(r#"{"candidates":[{"content":{"parts":[{"text":"ok"}]}}]}"#);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn flush_closes_abandoned_stream() {
        let mut tr = GeminiStreamTranslator::new("m");
        tr.on_data(r#"{"candidates":[{"content":{"parts":[{"text":"partial"}]}}]}"#);
        let names: Vec<&str> = tr.flush().iter().map(|e| e.event_name()).collect();
        assert_eq!(names, vec!["content_block_stop", "message_delta", "message_stop"]);
        assert!(tr.flush().is_empty());
    }
}
