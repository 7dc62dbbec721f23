use serde::{Deserialize, Serialize};

/// Where an agent sits in its lifecycle.
///
/// `Dead`, `Completed`, and `Killed` are absorbing. `Error` can only be
/// left through an ancestor's heal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Alive,
    Stale,
    Dead,
    Completed,
    Error,
    Killed,
}

impl AgentStatus {
    /// States no transition may leave (heal exempts `Error`).
    pub fn is_absorbing(self) -> bool {
        matches!(
            self,
            AgentStatus::Dead | AgentStatus::Completed | AgentStatus::Killed
        )
    }

    /// States that count as "no longer running" for parent checks.
    pub fn is_terminal(self) -> bool {
        self.is_absorbing() || self == AgentStatus::Error
    }
}

/// One agent in the forest.
#[derive(Debug, Clone, Serialize)]
pub struct Agent {
    pub id: String,
    pub parent_id: Option<String>,
    pub depth: u32,
    pub status: AgentStatus,
    /// Wall-clock ms of the last heartbeat.
    pub last_beat_ms: u64,
    pub started_at_ms: u64,
    pub turn_count: u64,
    pub token_usage: u64,
    pub token_budget: u64,
    pub purpose: String,
    /// Reason recorded by `report_stuck`, cleared on recovery.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stuck_reason: Option<String>,
}

/// Parameters for registering a new agent.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentRegistration {
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub purpose: String,
    pub token_budget: u64,
}

/// Counter updates carried by a heartbeat.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct HeartbeatUpdate {
    #[serde(default)]
    pub turn_count: Option<u64>,
    #[serde(default)]
    pub token_usage: Option<u64>,
}

/// Result of a kill request.
#[derive(Debug, Clone, Serialize)]
pub struct KillOutcome {
    pub success: bool,
    /// Bottom-up (post-order) ids of agents transitioned to killed.
    pub killed_ids: Vec<String>,
    /// Σ max(token_budget − token_usage, 0) over the killed agents.
    pub freed_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl KillOutcome {
    pub(crate) fn denied(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            killed_ids: Vec::new(),
            freed_tokens: 0,
            reason: Some(reason.into()),
        }
    }
}

/// Result of a heal request.
#[derive(Debug, Clone, Serialize)]
pub struct HealOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl HealOutcome {
    pub(crate) fn healed() -> Self {
        Self {
            success: true,
            reason: None,
        }
    }

    pub(crate) fn denied(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            reason: Some(reason.into()),
        }
    }
}

/// Result of a spawn admission check.
#[derive(Debug, Clone, Serialize)]
pub struct SpawnCheck {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SpawnCheck {
    pub(crate) fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub(crate) fn denied(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// What one `heal_tree` sweep did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub marked_stale: Vec<String>,
    /// Dead agents removed from the tree.
    pub reaped: Vec<String>,
    /// Agents killed for exceeding their token budget.
    pub budget_killed: Vec<String>,
    /// Orphans handled per the configured policy.
    pub orphans_handled: Vec<String>,
}

impl SweepReport {
    pub fn is_quiet(&self) -> bool {
        self.marked_stale.is_empty()
            && self.reaped.is_empty()
            && self.budget_killed.is_empty()
            && self.orphans_handled.is_empty()
    }
}

/// Aggregate view of the forest.
#[derive(Debug, Clone, Serialize)]
pub struct TreeHealth {
    pub total_agents: usize,
    pub alive_agents: usize,
    pub max_depth: u32,
    pub highest_token_usage: u64,
    pub agents: Vec<Agent>,
}
