use std::sync::Arc;

use ens_bus::{MessageBus, ResourceBroker, WebhookDispatcher};
use ens_domain::config::Config;
use ens_domain::memory::MemoryStore;
use ens_lifecycle::LifecycleManager;
use ens_policy::{GuardianScanner, PolicyEngine, SlidingWindow};
use ens_proxy::ProviderRegistry;

use crate::sanitize::Sanitizer;

/// Shared application state passed to all API handlers.
///
/// Fields are grouped by concern:
/// - **Routing** — config, provider registry
/// - **Coordination** — bus, lifecycle manager, resource broker, webhooks
/// - **Policy** — engine, rate window, guardian
/// - **Security** — startup-hashed API key, error sanitizer
#[derive(Clone)]
pub struct AppState {
    // ── Routing ───────────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub registry: Arc<ProviderRegistry>,

    // ── Coordination ──────────────────────────────────────────────────
    pub bus: Arc<MessageBus>,
    pub lifecycle: Arc<LifecycleManager>,
    pub broker: Arc<ResourceBroker>,
    pub webhooks: Arc<WebhookDispatcher>,

    // ── Policy ────────────────────────────────────────────────────────
    pub policy: Arc<PolicyEngine>,
    /// Shared with the rate-limit rule; pruned periodically.
    pub rate_window: Arc<SlidingWindow>,
    pub guardian: Arc<GuardianScanner>,

    // ── Persistence façade ────────────────────────────────────────────
    pub memory: Arc<dyn MemoryStore>,

    // ── Security (startup-computed) ───────────────────────────────────
    /// SHA-256 hash of the configured API key. `None` = auth disabled.
    pub api_key_hash: Option<Vec<u8>>,
    /// Scrubs key material from outbound error messages.
    pub sanitizer: Arc<Sanitizer>,
}
