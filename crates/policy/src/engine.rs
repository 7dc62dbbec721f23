//! The rule pipeline.
//!
//! Rules are bundled into priority-ordered sets; evaluation walks sets
//! from highest priority down and aggregates per-rule verdicts into one
//! outcome: any deny ⇒ deny, else any warn ⇒ warn, else allow. Strict
//! enforcement stops at the first deny; otherwise evaluation continues so
//! every violation is reported. Review mode evaluates everything but
//! downgrades the aggregate so nothing blocks.

use parking_lot::RwLock;
use serde::Serialize;

use crate::action::{Action, EvalContext, Rule, Verdict, VerdictStatus};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A named bundle of rules with a set-level priority.
pub struct PolicySet {
    pub name: String,
    pub priority: i32,
    pub rules: Vec<Box<dyn Rule>>,
}

/// Engine-level enforcement switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineConfig {
    /// Stop evaluating at the first deny.
    pub enforce_strict: bool,
    /// Evaluate everything but never block (denies aggregate to warn).
    pub report_only: bool,
}

/// The combined outcome of one evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct Evaluation {
    pub status: VerdictStatus,
    /// Non-allow verdicts, in rule order.
    pub verdicts: Vec<Verdict>,
}

impl Evaluation {
    pub fn is_denied(&self) -> bool {
        self.status == VerdictStatus::Deny
    }

    /// The verdict that caused a deny, if any.
    pub fn deny_verdict(&self) -> Option<&Verdict> {
        self.verdicts
            .iter()
            .find(|v| v.status == VerdictStatus::Deny)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PolicyEngine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct PolicyEngine {
    sets: RwLock<Vec<PolicySet>>,
    config: RwLock<EngineConfig>,
}

impl PolicyEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            sets: RwLock::new(Vec::new()),
            config: RwLock::new(config),
        }
    }

    /// Add a rule set, keeping sets sorted by descending priority.
    pub fn register_set(&self, set: PolicySet) {
        let mut sets = self.sets.write();
        sets.push(set);
        sets.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// Add a single rule to the lowest-priority "custom" set, creating
    /// it on first use.
    pub fn register_rule(&self, rule: Box<dyn Rule>) {
        let mut sets = self.sets.write();
        match sets.iter_mut().find(|s| s.name == "custom") {
            Some(set) => set.rules.push(rule),
            None => {
                sets.push(PolicySet {
                    name: "custom".into(),
                    priority: i32::MIN,
                    rules: vec![rule],
                });
                sets.sort_by(|a, b| b.priority.cmp(&a.priority));
            }
        }
    }

    pub fn set_enforcement(&self, config: EngineConfig) {
        *self.config.write() = config;
    }

    pub fn enforcement(&self) -> EngineConfig {
        *self.config.read()
    }

    /// Names and priorities of the registered sets, highest first.
    pub fn set_summaries(&self) -> Vec<(String, i32, usize)> {
        self.sets
            .read()
            .iter()
            .map(|s| (s.name.clone(), s.priority, s.rules.len()))
            .collect()
    }

    /// Evaluate `action` against every registered rule.
    pub fn evaluate(&self, action: &Action, ctx: &EvalContext) -> Evaluation {
        let config = *self.config.read();
        let sets = self.sets.read();
        let mut verdicts: Vec<Verdict> = Vec::new();
        let mut denied = false;

        'sets: for set in sets.iter() {
            for rule in &set.rules {
                let verdict = rule.evaluate(action, ctx);
                if verdict.status == VerdictStatus::Allow {
                    continue;
                }
                if verdict.status == VerdictStatus::Deny {
                    denied = true;
                    tracing::warn!(
                        rule_id = %verdict.rule_id,
                        reason = %verdict.reason,
                        agent_id = %ctx.agent_id,
                        "policy deny"
                    );
                }
                verdicts.push(verdict);
                if denied && config.enforce_strict {
                    break 'sets;
                }
            }
        }

        let mut status = verdicts
            .iter()
            .map(|v| v.status)
            .max()
            .unwrap_or(VerdictStatus::Allow);
        if config.report_only && status == VerdictStatus::Deny {
            status = VerdictStatus::Warn;
        }

        Evaluation { status, verdicts }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{RuleCategory, Severity};

    /// A rule with a canned verdict, for pipeline tests.
    struct FixedRule {
        id: &'static str,
        status: VerdictStatus,
    }

    impl Rule for FixedRule {
        fn id(&self) -> &str {
            self.id
        }
        fn name(&self) -> &str {
            self.id
        }
        fn severity(&self) -> Severity {
            Severity::Error
        }
        fn category(&self) -> RuleCategory {
            RuleCategory::Security
        }
        fn evaluate(&self, _action: &Action, _ctx: &EvalContext) -> Verdict {
            match self.status {
                VerdictStatus::Allow => Verdict::allow(self.id),
                VerdictStatus::Warn => Verdict::warn(self.id, "warned"),
                VerdictStatus::Deny => Verdict::deny(self.id, "denied"),
            }
        }
    }

    fn action() -> Action {
        Action::ShellExec {
            command: "true".into(),
        }
    }

    fn engine_with(rules: Vec<(&'static str, VerdictStatus)>, config: EngineConfig) -> PolicyEngine {
        let engine = PolicyEngine::new(config);
        engine.register_set(PolicySet {
            name: "test".into(),
            priority: 0,
            rules: rules
                .into_iter()
                .map(|(id, status)| Box::new(FixedRule { id, status }) as Box<dyn Rule>)
                .collect(),
        });
        engine
    }

    #[test]
    fn deny_wins_over_warn() {
        let engine = engine_with(
            vec![
                ("r1", VerdictStatus::Warn),
                ("r2", VerdictStatus::Deny),
                ("r3", VerdictStatus::Allow),
            ],
            EngineConfig::default(),
        );
        let eval = engine.evaluate(&action(), &EvalContext::default());
        assert!(eval.is_denied());
        assert_eq!(eval.verdicts.len(), 2);
        assert_eq!(eval.deny_verdict().unwrap().rule_id, "r2");
    }

    #[test]
    fn warn_without_deny_aggregates_to_warn() {
        let engine = engine_with(
            vec![("r1", VerdictStatus::Warn), ("r2", VerdictStatus::Allow)],
            EngineConfig::default(),
        );
        let eval = engine.evaluate(&action(), &EvalContext::default());
        assert_eq!(eval.status, VerdictStatus::Warn);
    }

    #[test]
    fn all_allow_aggregates_to_allow_with_no_verdicts() {
        let engine = engine_with(vec![("r1", VerdictStatus::Allow)], EngineConfig::default());
        let eval = engine.evaluate(&action(), &EvalContext::default());
        assert_eq!(eval.status, VerdictStatus::Allow);
        assert!(eval.verdicts.is_empty());
    }

    #[test]
    fn strict_mode_short_circuits_after_deny() {
        let engine = engine_with(
            vec![
                ("r1", VerdictStatus::Deny),
                ("r2", VerdictStatus::Warn),
            ],
            EngineConfig {
                enforce_strict: true,
                report_only: false,
            },
        );
        let eval = engine.evaluate(&action(), &EvalContext::default());
        assert!(eval.is_denied());
        // r2 never ran.
        assert_eq!(eval.verdicts.len(), 1);
    }

    #[test]
    fn lenient_mode_reports_all_violations() {
        let engine = engine_with(
            vec![
                ("r1", VerdictStatus::Deny),
                ("r2", VerdictStatus::Warn),
                ("r3", VerdictStatus::Deny),
            ],
            EngineConfig::default(),
        );
        let eval = engine.evaluate(&action(), &EvalContext::default());
        assert_eq!(eval.verdicts.len(), 3);
    }

    #[test]
    fn report_only_downgrades_deny_to_warn() {
        let engine = engine_with(
            vec![("r1", VerdictStatus::Deny)],
            EngineConfig {
                enforce_strict: false,
                report_only: true,
            },
        );
        let eval = engine.evaluate(&action(), &EvalContext::default());
        assert_eq!(eval.status, VerdictStatus::Warn);
        // The underlying verdict still records the deny.
        assert_eq!(eval.verdicts[0].status, VerdictStatus::Deny);
    }

    #[test]
    fn sets_run_in_priority_order() {
        let engine = PolicyEngine::new(EngineConfig {
            enforce_strict: true,
            report_only: false,
        });
        engine.register_set(PolicySet {
            name: "low".into(),
            priority: 0,
            rules: vec![Box::new(FixedRule {
                id: "low-rule",
                status: VerdictStatus::Deny,
            })],
        });
        engine.register_set(PolicySet {
            name: "high".into(),
            priority: 100,
            rules: vec![Box::new(FixedRule {
                id: "high-rule",
                status: VerdictStatus::Deny,
            })],
        });
        let eval = engine.evaluate(&action(), &EvalContext::default());
        // Strict mode stops at the first deny, which must come from the
        // higher-priority set.
        assert_eq!(eval.verdicts[0].rule_id, "high-rule");
    }

    #[test]
    fn register_rule_lands_in_custom_set() {
        let engine = PolicyEngine::new(EngineConfig::default());
        engine.register_rule(Box::new(FixedRule {
            id: "late",
            status: VerdictStatus::Warn,
        }));
        let eval = engine.evaluate(&action(), &EvalContext::default());
        assert_eq!(eval.status, VerdictStatus::Warn);
        assert!(engine
            .set_summaries()
            .iter()
            .any(|(name, _, n)| name == "custom" && *n == 1));
    }
}
