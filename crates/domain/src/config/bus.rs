use serde::{Deserialize, Serialize};

/// Message bus tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Per-topic ring-buffer capacity.
    #[serde(default = "d_history_capacity")]
    pub history_capacity: usize,
    /// Cap on tracked topics; the least-recently-published topic is
    /// evicted on overflow.
    #[serde(default = "d_max_topics")]
    pub max_topics: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            history_capacity: d_history_capacity(),
            max_topics: d_max_topics(),
        }
    }
}

fn d_history_capacity() -> usize {
    1000
}

fn d_max_topics() -> usize {
    10_000
}
