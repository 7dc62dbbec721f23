//! Webhook dispatch from the message bus.
//!
//! Each configured endpoint subscribes to a set of topic patterns. Bus
//! deliveries are enqueued synchronously by the subscription handler and
//! drained by [`WebhookDispatcher::tick`], which the gateway drives on a
//! periodic timer. Failed posts back off exponentially until the
//! endpoint's retry budget is exhausted; outcomes land in a bounded
//! delivery log.

use std::sync::Arc;
use std::time::{Duration, Instant};

use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use serde::Serialize;
use sha2::Sha256;

use ens_domain::config::WebhookConfig;
use ens_domain::error::Result;
use ens_domain::ring::RingBuffer;

use crate::bus::{Message, MessageBus, SubscribeOpts, SubscriptionHandle};

const DELIVERY_LOG_CAPACITY: usize = 500;
const BACKOFF_BASE_MS: u64 = 1_000;
const BACKOFF_CAP_MS: u64 = 60_000;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Terminal state of one delivery attempt chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered,
    Failed,
}

/// One entry in the delivery log.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryRecord {
    pub message_id: String,
    pub topic: String,
    pub url: String,
    pub status: DeliveryStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

struct PendingDelivery {
    endpoint_index: usize,
    message_id: String,
    topic: String,
    body: String,
    attempt: u32,
    due_at: Instant,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// WebhookDispatcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct WebhookDispatcher {
    endpoints: Vec<WebhookConfig>,
    client: reqwest::Client,
    queue: Mutex<Vec<PendingDelivery>>,
    log: Mutex<RingBuffer<DeliveryRecord>>,
    /// Handles for the bus subscriptions, kept for detach on shutdown.
    handles: Mutex<Vec<SubscriptionHandle>>,
}

impl WebhookDispatcher {
    pub fn new(endpoints: Vec<WebhookConfig>) -> Self {
        Self {
            endpoints,
            client: reqwest::Client::new(),
            queue: Mutex::new(Vec::new()),
            log: Mutex::new(RingBuffer::new(DELIVERY_LOG_CAPACITY)),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe every endpoint's topic patterns on `bus`. Deliveries are
    /// queued here and sent by [`Self::tick`].
    pub fn attach(self: &Arc<Self>, bus: &MessageBus) -> Result<()> {
        for (index, endpoint) in self.endpoints.iter().enumerate() {
            for pattern in &endpoint.topics {
                let dispatcher = Arc::clone(self);
                let handle = bus.subscribe_pattern(
                    pattern,
                    Arc::new(move |msg: &Message| dispatcher.enqueue(index, msg)),
                    SubscribeOpts::default(),
                )?;
                self.handles.lock().push(handle);
            }
        }
        Ok(())
    }

    /// Detach all bus subscriptions.
    pub fn detach(&self) {
        for handle in self.handles.lock().drain(..) {
            handle.unsubscribe();
        }
    }

    fn enqueue(&self, endpoint_index: usize, msg: &Message) {
        let body = match serde_json::to_string(msg) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, "webhook payload serialization failed");
                return;
            }
        };
        self.queue.lock().push(PendingDelivery {
            endpoint_index,
            message_id: msg.id.clone(),
            topic: msg.topic.clone(),
            body,
            attempt: 0,
            due_at: Instant::now(),
        });
    }

    /// Attempt every due delivery once. Call from a periodic task.
    ///
    /// Returns the number of deliveries attempted this tick.
    pub async fn tick(&self) -> usize {
        let now = Instant::now();
        let due: Vec<PendingDelivery> = {
            let mut queue = self.queue.lock();
            let (ready, waiting): (Vec<_>, Vec<_>) =
                queue.drain(..).partition(|d| d.due_at <= now);
            *queue = waiting;
            ready
        };
        let attempted = due.len();

        for mut delivery in due {
            let endpoint = &self.endpoints[delivery.endpoint_index];
            delivery.attempt += 1;

            match self.post(endpoint, &delivery).await {
                Ok(()) => {
                    tracing::debug!(
                        url = %endpoint.url,
                        topic = %delivery.topic,
                        attempts = delivery.attempt,
                        "webhook delivered"
                    );
                    self.record(&delivery, endpoint, DeliveryStatus::Delivered, None);
                }
                Err(error) => {
                    if delivery.attempt > endpoint.max_retries {
                        tracing::warn!(
                            url = %endpoint.url,
                            topic = %delivery.topic,
                            attempts = delivery.attempt,
                            error = %error,
                            "webhook delivery abandoned"
                        );
                        self.record(&delivery, endpoint, DeliveryStatus::Failed, Some(error));
                    } else {
                        let backoff = backoff_for_attempt(delivery.attempt);
                        delivery.due_at = Instant::now() + backoff;
                        self.queue.lock().push(delivery);
                    }
                }
            }
        }
        attempted
    }

    async fn post(
        &self,
        endpoint: &WebhookConfig,
        delivery: &PendingDelivery,
    ) -> std::result::Result<(), String> {
        let mut req = self
            .client
            .post(&endpoint.url)
            .timeout(Duration::from_millis(endpoint.timeout_ms))
            .header("Content-Type", "application/json")
            .header("X-Ensemble-Topic", &delivery.topic);

        if let Some(secret) = &endpoint.secret {
            req = req.header(
                "X-Ensemble-Signature",
                format!("sha256={}", sign_payload(secret, &delivery.body)),
            );
        }

        let resp = req
            .body(delivery.body.clone())
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(format!("HTTP {}", resp.status().as_u16()))
        }
    }

    fn record(
        &self,
        delivery: &PendingDelivery,
        endpoint: &WebhookConfig,
        status: DeliveryStatus,
        last_error: Option<String>,
    ) {
        self.log.lock().push(DeliveryRecord {
            message_id: delivery.message_id.clone(),
            topic: delivery.topic.clone(),
            url: endpoint.url.clone(),
            status,
            attempts: delivery.attempt,
            last_error,
        });
    }

    /// The most recent delivery outcomes, oldest-first.
    pub fn delivery_log(&self, limit: usize) -> Vec<DeliveryRecord> {
        let log = self.log.lock();
        if limit == 0 {
            log.iter().cloned().collect()
        } else {
            log.latest(limit).into_iter().cloned().collect()
        }
    }

    /// Deliveries queued and not yet resolved.
    pub fn pending_count(&self) -> usize {
        self.queue.lock().len()
    }
}

/// HMAC-SHA256 of the payload, hex-encoded.
fn sign_payload(secret: &str, body: &str) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn backoff_for_attempt(attempt: u32) -> Duration {
    let ms = BACKOFF_BASE_MS.saturating_mul(1u64 << attempt.min(16)).min(BACKOFF_CAP_MS);
    Duration::from_millis(ms)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
