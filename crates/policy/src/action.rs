//! Actions, evaluation context, and verdicts.

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Action
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An operation an agent wants to perform, evaluated before execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    LlmCall {
        model: String,
        #[serde(default)]
        prompt: String,
        /// Estimated cost of this call in USD.
        #[serde(default)]
        cost: f64,
    },
    FileRead {
        file_path: String,
    },
    FileWrite {
        file_path: String,
        #[serde(default)]
        content: String,
    },
    FileDelete {
        file_path: String,
    },
    ShellExec {
        command: String,
    },
    NetworkRequest {
        url: String,
    },
    AgentSpawn {
        #[serde(default)]
        purpose: String,
    },
}

impl Action {
    /// The file path this action touches, if any.
    pub fn file_path(&self) -> Option<&str> {
        match self {
            Action::FileRead { file_path }
            | Action::FileWrite { file_path, .. }
            | Action::FileDelete { file_path } => Some(file_path),
            _ => None,
        }
    }

    /// Whether this action mutates state outside the agent.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Action::FileWrite { .. } | Action::FileDelete { .. } | Action::ShellExec { .. }
        )
    }
}

/// Session state the rules evaluate against.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvalContext {
    pub session_id: String,
    pub agent_id: String,
    pub agent_depth: u32,
    pub project_path: String,
    pub total_cost_so_far: f64,
    pub cost_budget: f64,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default)]
    pub commands_run: Vec<String>,
    pub timestamp_ms: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Verdict
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleCategory {
    Security,
    Cost,
    Scope,
    Convention,
}

/// Ordered worst-to-best: deny > warn > allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictStatus {
    Allow,
    Warn,
    Deny,
}

/// One rule's outcome for one action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub status: VerdictStatus,
    pub rule_id: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl Verdict {
    pub fn allow(rule_id: impl Into<String>) -> Self {
        Self {
            status: VerdictStatus::Allow,
            rule_id: rule_id.into(),
            reason: String::new(),
            suggestion: None,
        }
    }

    pub fn warn(rule_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            status: VerdictStatus::Warn,
            rule_id: rule_id.into(),
            reason: reason.into(),
            suggestion: None,
        }
    }

    pub fn deny(rule_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            status: VerdictStatus::Deny,
            rule_id: rule_id.into(),
            reason: reason.into(),
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rule
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A policy rule.
///
/// `evaluate` must be total and deterministic for a fixed action and
/// context; the rate-limit window is the only sanctioned side effect.
pub trait Rule: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn severity(&self) -> Severity;
    fn category(&self) -> RuleCategory;
    fn evaluate(&self, action: &Action, ctx: &EvalContext) -> Verdict;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_deserializes_from_tagged_json() {
        let action: Action = serde_json::from_value(serde_json::json!({
            "type": "shell_exec",
            "command": "ls -la",
        }))
        .unwrap();
        assert!(matches!(action, Action::ShellExec { ref command } if command == "ls -la"));
        assert!(action.is_mutation());
    }

    #[test]
    fn verdict_status_orders_worst_last() {
        assert!(VerdictStatus::Deny > VerdictStatus::Warn);
        assert!(VerdictStatus::Warn > VerdictStatus::Allow);
    }

    #[test]
    fn file_path_extraction() {
        let action = Action::FileWrite {
            file_path: "/p/x.rs".into(),
            content: String::new(),
        };
        assert_eq!(action.file_path(), Some("/p/x.rs"));
        assert_eq!(
            Action::NetworkRequest { url: "http://x".into() }.file_path(),
            None
        );
    }
}
