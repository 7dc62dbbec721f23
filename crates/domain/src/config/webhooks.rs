use serde::{Deserialize, Serialize};

/// One webhook endpoint fed from the message bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    /// Topic patterns (`*` / `**` wildcards) this endpoint receives.
    #[serde(default)]
    pub topics: Vec<String>,
    /// Shared secret for the HMAC-SHA256 signature header.
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "d_webhook_max_retries")]
    pub max_retries: u32,
    #[serde(default = "d_webhook_timeout_ms")]
    pub timeout_ms: u64,
}

fn d_webhook_max_retries() -> u32 {
    5
}

fn d_webhook_timeout_ms() -> u64 {
    10_000
}
