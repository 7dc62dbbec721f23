//! Per-session sliding-window call tracking.
//!
//! Backs the LLM rate-limit rule. Entries older than the window are
//! pruned on every touch so the store stays bounded by call volume, not
//! by session lifetime.

use std::collections::HashMap;

use parking_lot::RwLock;

/// Sliding window of call timestamps, keyed by session id.
pub struct SlidingWindow {
    window_ms: u64,
    calls: RwLock<HashMap<String, Vec<u64>>>,
}

impl SlidingWindow {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            calls: RwLock::new(HashMap::new()),
        }
    }

    /// Record a call at `now_ms` and return the number of calls within
    /// the trailing window, including this one.
    pub fn record(&self, session_id: &str, now_ms: u64) -> usize {
        let cutoff = now_ms.saturating_sub(self.window_ms);
        let mut calls = self.calls.write();
        let entry = calls.entry(session_id.to_string()).or_default();
        entry.retain(|t| *t > cutoff);
        entry.push(now_ms);
        entry.len()
    }

    /// Calls within the trailing window without recording a new one.
    pub fn count(&self, session_id: &str, now_ms: u64) -> usize {
        let cutoff = now_ms.saturating_sub(self.window_ms);
        let calls = self.calls.read();
        calls
            .get(session_id)
            .map(|entry| entry.iter().filter(|t| **t > cutoff).count())
            .unwrap_or(0)
    }

    /// Drop sessions whose every entry has aged out.
    pub fn prune(&self, now_ms: u64) {
        let cutoff = now_ms.saturating_sub(self.window_ms);
        self.calls.write().retain(|_, entry| {
            entry.retain(|t| *t > cutoff);
            !entry.is_empty()
        });
    }
}
