use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Upstream dialect spoken by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderKind {
    /// OpenAI chat-completions contract (OpenAI, Azure, Ollama, vLLM, ...).
    #[serde(rename = "openai-compat")]
    OpenaiCompat,
    /// Google Gemini `generateContent` contract.
    #[serde(rename = "google")]
    Google,
    /// Anthropic-native upstream; bodies forwarded unchanged.
    #[serde(rename = "passthrough")]
    Passthrough,
}

/// One configured upstream provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(rename = "type")]
    pub kind: ProviderKind,
    /// Base URL. Optional for kinds with a well-known default endpoint.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Explicit model list. Empty = wildcard (provider accepts any model).
    #[serde(default)]
    pub models: HashMap<String, ModelConfig>,
    /// Extra headers sent on every upstream request.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Upstream request timeout.
    #[serde(default = "d_provider_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "d_provider_max_retries")]
    pub max_retries: u32,
}

impl ProviderConfig {
    /// The effective base URL, falling back to the kind's default endpoint.
    pub fn base_url(&self) -> String {
        match &self.endpoint {
            Some(e) => e.trim_end_matches('/').to_string(),
            None => match self.kind {
                ProviderKind::OpenaiCompat => "https://api.openai.com/v1".into(),
                ProviderKind::Google => "https://generativelanguage.googleapis.com".into(),
                ProviderKind::Passthrough => "https://api.anthropic.com".into(),
            },
        }
    }
}

/// Per-model overrides within a provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Name to send upstream when it differs from the advertised name.
    #[serde(default)]
    pub upstream_name: Option<String>,
    /// Hard cap applied to the request's `max_tokens`.
    #[serde(default)]
    pub max_tokens_cap: Option<u32>,
}

fn d_provider_timeout_ms() -> u64 {
    120_000
}

fn d_provider_max_retries() -> u32 {
    2
}
