use serde::{Deserialize, Serialize};

use super::{ConfigIssue, ConfigSeverity};

/// Hard ceiling on agent tree depth; runtime config is clamped to this.
pub const MAX_AGENT_DEPTH: u32 = 10;

/// Minimum budget a child must be able to receive for a spawn to proceed.
pub const MIN_CHILD_BUDGET: u64 = 1000;

/// What happens to descendants whose parent disappears during a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanPolicy {
    /// Remove the whole orphaned subtree.
    Cascade,
    /// Re-root orphans as depth-0 agents.
    PromoteToRoot,
    /// Mark orphans killed but keep them for inspection.
    Kill,
}

/// Agent lifecycle tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Interval between `heal_tree` sweeps.
    #[serde(default = "d_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Silence after which an alive agent is marked stale.
    #[serde(default = "d_stale_threshold_ms")]
    pub stale_threshold_ms: u64,
    /// Silence after which an agent is declared dead and reaped.
    #[serde(default = "d_dead_threshold_ms")]
    pub dead_threshold_ms: u64,
    /// Maximum tree depth; clamped to [`MAX_AGENT_DEPTH`].
    #[serde(default = "d_max_agent_depth")]
    pub max_agent_depth: u32,
    /// Maximum living children per agent.
    #[serde(default = "d_max_sub_agents")]
    pub max_sub_agents: usize,
    /// Multiplicative parent→child token budget reduction.
    #[serde(default = "d_decay_factor")]
    pub decay_factor: f64,
    #[serde(default = "d_orphan_policy")]
    pub orphan_policy: OrphanPolicy,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: d_heartbeat_interval_ms(),
            stale_threshold_ms: d_stale_threshold_ms(),
            dead_threshold_ms: d_dead_threshold_ms(),
            max_agent_depth: d_max_agent_depth(),
            max_sub_agents: d_max_sub_agents(),
            decay_factor: d_decay_factor(),
            orphan_policy: d_orphan_policy(),
        }
    }
}

impl LifecycleConfig {
    /// The configured depth limit, clamped to the compile-time ceiling.
    pub fn effective_max_depth(&self) -> u32 {
        self.max_agent_depth.min(MAX_AGENT_DEPTH)
    }

    pub(super) fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        if !(self.decay_factor > 0.0 && self.decay_factor <= 1.0) {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "lifecycle.decay_factor".into(),
                message: "decay_factor must be in (0, 1]".into(),
            });
        }
        if self.stale_threshold_ms >= self.dead_threshold_ms {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "lifecycle.stale_threshold_ms".into(),
                message: "stale threshold must be below dead threshold".into(),
            });
        }
        if self.max_agent_depth > MAX_AGENT_DEPTH {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "lifecycle.max_agent_depth".into(),
                message: format!("clamped to system ceiling {MAX_AGENT_DEPTH}"),
            });
        }
        issues
    }
}

fn d_heartbeat_interval_ms() -> u64 {
    30_000
}

fn d_stale_threshold_ms() -> u64 {
    60_000
}

fn d_dead_threshold_ms() -> u64 {
    300_000
}

fn d_max_agent_depth() -> u32 {
    MAX_AGENT_DEPTH
}

fn d_max_sub_agents() -> usize {
    5
}

fn d_decay_factor() -> f64 {
    0.7
}

fn d_orphan_policy() -> OrphanPolicy {
    OrphanPolicy::Cascade
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = LifecycleConfig::default();
        assert_eq!(cfg.stale_threshold_ms, 60_000);
        assert_eq!(cfg.dead_threshold_ms, 300_000);
        assert_eq!(cfg.max_sub_agents, 5);
        assert_eq!(cfg.decay_factor, 0.7);
        assert_eq!(cfg.orphan_policy, OrphanPolicy::Cascade);
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn depth_is_clamped_to_ceiling() {
        let cfg = LifecycleConfig {
            max_agent_depth: 99,
            ..Default::default()
        };
        assert_eq!(cfg.effective_max_depth(), MAX_AGENT_DEPTH);
        assert!(cfg
            .validate()
            .iter()
            .any(|i| i.severity == ConfigSeverity::Warning));
    }

    #[test]
    fn inverted_thresholds_rejected() {
        let cfg = LifecycleConfig {
            stale_threshold_ms: 400_000,
            ..Default::default()
        };
        assert!(cfg
            .validate()
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error));
    }
}
