//! The upstream provider abstraction.
//!
//! Adapters accept the normalized wire dialect and speak their upstream's
//! dialect on the network; the translation in both directions lives
//! entirely inside the adapter.

use ens_domain::error::Result;
use ens_domain::stream::BoxStream;
use ens_domain::wire::{ChatRequest, ChatResponse, StreamEvent};

/// Trait every upstream adapter implements.
#[async_trait::async_trait]
pub trait UpstreamProvider: Send + Sync {
    /// Send a request and wait for the complete response.
    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse>;

    /// Send a request and return the client-dialect event stream.
    ///
    /// The stream is total: upstream failures surface as a terminal
    /// `error` event, never as a broken stream.
    async fn send_stream(&self, req: &ChatRequest) -> Result<BoxStream<'static, StreamEvent>>;

    /// Count tokens for a request.
    ///
    /// Native upstreams proxy their count endpoint; dialects without one
    /// return a character-based estimate.
    async fn count_tokens(&self, req: &ChatRequest) -> Result<serde_json::Value>;

    /// A unique name for this provider instance.
    fn provider_name(&self) -> &str;
}

/// Rough token estimate for upstreams without a count endpoint: one
/// token per four characters of serialized content.
pub(crate) fn estimate_tokens(body: &serde_json::Value) -> u64 {
    let chars = serde_json::to_string(body).map(|s| s.len()).unwrap_or(0);
    (chars / 4) as u64
}
