//! In-process topic pub/sub with bounded history.
//!
//! Delivery is synchronous: `publish` runs every matching handler before
//! returning, in descending priority order (ties broken by subscription
//! order). Handler panics are trapped and logged so one bad subscriber
//! never starves the rest. Each topic keeps a fixed-capacity ring of past
//! messages; the set of tracked topics is itself capped, evicting the
//! least-recently-published topic on overflow.
//!
//! Handler contract: handlers run outside the bus's internal locks, but a
//! handler must not block on async work and must not call `destroy` on
//! the bus that is delivering to it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use ens_domain::error::{Error, Result};
use ens_domain::ring::RingBuffer;

use crate::glob::topic_matches;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A published message.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: String,
    pub topic: String,
    pub payload: serde_json::Value,
    pub sender: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Subscriber callback. Invoked synchronously during `publish`.
pub type Handler = Arc<dyn Fn(&Message) + Send + Sync>;

/// Options accepted by [`MessageBus::subscribe`] and
/// [`MessageBus::subscribe_pattern`].
#[derive(Debug, Clone, Default)]
pub struct SubscribeOpts {
    /// Higher priority handlers run first.
    pub priority: i32,
    /// Only deliver messages from this sender.
    pub filter_sender: Option<String>,
    /// Auto-unsubscribe after the first delivery.
    pub once: bool,
}

/// Matching mode for a subscription.
enum TopicFilter {
    Exact(String),
    Pattern(String),
}

impl TopicFilter {
    fn matches(&self, topic: &str) -> bool {
        match self {
            TopicFilter::Exact(t) => t == topic,
            TopicFilter::Pattern(p) => topic_matches(p, topic),
        }
    }
}

struct SubEntry {
    id: u64,
    filter: TopicFilter,
    priority: i32,
    filter_sender: Option<String>,
    once: bool,
    /// Set on first delivery of a `once` subscription.
    fired: Arc<AtomicBool>,
    /// Cleared by [`SubscriptionHandle::unsubscribe`].
    active: Arc<AtomicBool>,
    handler: Handler,
}

/// Returned by subscribe calls; detaches the subscription.
pub struct SubscriptionHandle {
    active: Arc<AtomicBool>,
}

impl SubscriptionHandle {
    /// Detach the subscription. Safe to call any number of times.
    pub fn unsubscribe(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Whether the subscription is still attached.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

struct TopicHistory {
    ring: RingBuffer<Message>,
    /// Monotonic publish sequence; smallest = least recently published.
    last_published: u64,
}

/// Counters exposed on the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct BusStats {
    pub topics: usize,
    pub subscriptions: usize,
    pub messages_published: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MessageBus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct MessageBus {
    subs: RwLock<Vec<SubEntry>>,
    topics: RwLock<HashMap<String, TopicHistory>>,
    history_capacity: usize,
    max_topics: usize,
    disposed: AtomicBool,
    next_sub_id: AtomicU64,
    publish_seq: AtomicU64,
}

impl MessageBus {
    /// Create a bus with the given per-topic ring capacity and tracked
    /// topic cap.
    pub fn new(history_capacity: usize, max_topics: usize) -> Self {
        Self {
            subs: RwLock::new(Vec::new()),
            topics: RwLock::new(HashMap::new()),
            history_capacity: history_capacity.max(1),
            max_topics: max_topics.max(1),
            disposed: AtomicBool::new(false),
            next_sub_id: AtomicU64::new(0),
            publish_seq: AtomicU64::new(0),
        }
    }

    /// A bus with the documented defaults (1000-deep history, 10 000
    /// tracked topics).
    pub fn with_defaults() -> Self {
        Self::new(1000, 10_000)
    }

    fn check_disposed(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            Err(Error::Disposed("message bus"))
        } else {
            Ok(())
        }
    }

    // ── Publish ────────────────────────────────────────────────────

    /// Publish `payload` on `topic`, delivering synchronously to every
    /// matching subscriber, then appending to the topic's history ring.
    /// Returns the message id.
    pub fn publish(
        &self,
        topic: &str,
        payload: serde_json::Value,
        sender: Option<&str>,
    ) -> Result<String> {
        self.check_disposed()?;

        let message = Message {
            id: uuid::Uuid::new_v4().to_string(),
            topic: topic.to_string(),
            payload,
            sender: sender.map(String::from),
            timestamp: Utc::now(),
        };

        // Snapshot matching subscriptions under the read lock, then
        // dispatch outside it so handlers can subscribe/publish without
        // deadlocking.
        let mut matched: Vec<(i32, u64, bool, Arc<AtomicBool>, Handler)> = {
            let subs = self.subs.read();
            subs.iter()
                .filter(|s| s.active.load(Ordering::Acquire))
                .filter(|s| !(s.once && s.fired.load(Ordering::Acquire)))
                .filter(|s| s.filter.matches(topic))
                .filter(|s| match (&s.filter_sender, &message.sender) {
                    (Some(want), Some(got)) => want == got,
                    (Some(_), None) => false,
                    (None, _) => true,
                })
                .map(|s| {
                    (
                        s.priority,
                        s.id,
                        s.once,
                        s.fired.clone(),
                        s.handler.clone(),
                    )
                })
                .collect()
        };

        // Highest priority first; insertion order breaks ties.
        matched.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        for (_, sub_id, once, fired, handler) in matched {
            if once && fired.swap(true, Ordering::AcqRel) {
                continue;
            }
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                handler(&message)
            }));
            if result.is_err() {
                tracing::error!(topic = %topic, sub_id, "subscriber panicked during delivery");
            }
        }

        // Drop spent once-subscriptions and anything unsubscribed.
        self.subs
            .write()
            .retain(|s| s.active.load(Ordering::Acquire) && !(s.once && s.fired.load(Ordering::Acquire)));

        let message_id = message.id.clone();
        self.append_history(message);
        Ok(message_id)
    }

    fn append_history(&self, message: Message) {
        let seq = self.publish_seq.fetch_add(1, Ordering::AcqRel);
        let mut topics = self.topics.write();

        if !topics.contains_key(&message.topic) && topics.len() >= self.max_topics {
            // Evict the least-recently-published topic with its history.
            if let Some(lru) = topics
                .iter()
                .min_by_key(|(_, h)| h.last_published)
                .map(|(t, _)| t.clone())
            {
                tracing::debug!(topic = %lru, "evicting LRU topic history");
                topics.remove(&lru);
            }
        }

        let entry = topics
            .entry(message.topic.clone())
            .or_insert_with(|| TopicHistory {
                ring: RingBuffer::new(self.history_capacity),
                last_published: seq,
            });
        entry.last_published = seq;
        entry.ring.push(message);
    }

    // ── Subscribe ──────────────────────────────────────────────────

    /// Subscribe to an exact topic.
    pub fn subscribe(
        &self,
        topic: &str,
        handler: Handler,
        opts: SubscribeOpts,
    ) -> Result<SubscriptionHandle> {
        self.check_disposed()?;
        Ok(self.insert_sub(TopicFilter::Exact(topic.to_string()), handler, opts))
    }

    /// Subscribe with `*` / `**` wildcards over `:`-delimited segments.
    pub fn subscribe_pattern(
        &self,
        pattern: &str,
        handler: Handler,
        opts: SubscribeOpts,
    ) -> Result<SubscriptionHandle> {
        self.check_disposed()?;
        Ok(self.insert_sub(TopicFilter::Pattern(pattern.to_string()), handler, opts))
    }

    fn insert_sub(
        &self,
        filter: TopicFilter,
        handler: Handler,
        opts: SubscribeOpts,
    ) -> SubscriptionHandle {
        let active = Arc::new(AtomicBool::new(true));
        let entry = SubEntry {
            id: self.next_sub_id.fetch_add(1, Ordering::AcqRel),
            filter,
            priority: opts.priority,
            filter_sender: opts.filter_sender,
            once: opts.once,
            fired: Arc::new(AtomicBool::new(false)),
            active: active.clone(),
            handler,
        };
        self.subs.write().push(entry);
        SubscriptionHandle { active }
    }

    // ── Wait ───────────────────────────────────────────────────────

    /// Resolve with the next message published on `topic`.
    ///
    /// `timeout_ms == 0` waits forever. Times out with
    /// [`Error::Timeout`]; the one-shot subscription is detached either
    /// way.
    pub async fn wait_for(&self, topic: &str, timeout_ms: u64) -> Result<Message> {
        self.check_disposed()?;

        let (tx, rx) = tokio::sync::oneshot::channel::<Message>();
        let slot = Arc::new(Mutex::new(Some(tx)));
        let handler: Handler = {
            let slot = slot.clone();
            Arc::new(move |msg: &Message| {
                if let Some(tx) = slot.lock().take() {
                    let _ = tx.send(msg.clone());
                }
            })
        };
        let handle = self.subscribe(
            topic,
            handler,
            SubscribeOpts {
                once: true,
                ..Default::default()
            },
        )?;

        let received = if timeout_ms == 0 {
            rx.await.ok()
        } else {
            match tokio::time::timeout(std::time::Duration::from_millis(timeout_ms), rx).await {
                Ok(result) => result.ok(),
                Err(_) => None,
            }
        };

        match received {
            Some(msg) => Ok(msg),
            None => {
                handle.unsubscribe();
                Err(Error::Timeout(format!(
                    "no message on '{topic}' within {timeout_ms}ms"
                )))
            }
        }
    }

    // ── History / stats / teardown ─────────────────────────────────

    /// Past messages on `topic`, oldest-first. `limit == 0` returns the
    /// full ring; otherwise the most recent `limit` messages.
    pub fn history(&self, topic: &str, limit: usize) -> Vec<Message> {
        let topics = self.topics.read();
        match topics.get(topic) {
            Some(h) if limit == 0 => h.ring.iter().cloned().collect(),
            Some(h) => h.ring.latest(limit).into_iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            topics: self.topics.read().len(),
            subscriptions: self
                .subs
                .read()
                .iter()
                .filter(|s| s.active.load(Ordering::Acquire))
                .count(),
            messages_published: self.publish_seq.load(Ordering::Acquire),
        }
    }

    /// Mark the bus inert. Every subsequent call fails with
    /// [`Error::Disposed`]; existing subscriptions are dropped.
    pub fn destroy(&self) {
        self.disposed.store(true, Ordering::Release);
        self.subs.write().clear();
        self.topics.write().clear();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
