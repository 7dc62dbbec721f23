//! Scope rules: project boundary, read-only paths, git history
//! protection, and the full read-only mode used by the `readonly` preset.

use regex::Regex;

use crate::action::{Action, EvalContext, Rule, RuleCategory, Severity, Verdict};

fn path_inside(path: &str, root: &str) -> bool {
    if root.is_empty() {
        return false;
    }
    let root = root.trim_end_matches('/');
    path == root || path.starts_with(&format!("{root}/"))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Project boundary
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Denies mutations to files outside the project tree.
pub struct ProjectBoundaryRule;

impl Rule for ProjectBoundaryRule {
    fn id(&self) -> &str {
        "scope.project-boundary"
    }
    fn name(&self) -> &str {
        "Mutations stay inside the project"
    }
    fn severity(&self) -> Severity {
        Severity::Error
    }
    fn category(&self) -> RuleCategory {
        RuleCategory::Scope
    }

    fn evaluate(&self, action: &Action, ctx: &EvalContext) -> Verdict {
        let mutating_path = match action {
            Action::FileWrite { file_path, .. } | Action::FileDelete { file_path } => file_path,
            _ => return Verdict::allow(self.id()),
        };
        if path_inside(mutating_path, &ctx.project_path) {
            Verdict::allow(self.id())
        } else {
            Verdict::deny(
                self.id(),
                format!("write to '{mutating_path}' is outside the project"),
            )
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Read-only paths
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Denies writes to configured read-only subtrees (lockfiles, vendored
/// code, generated artifacts).
pub struct ReadOnlyPathsRule {
    paths: Vec<String>,
}

impl ReadOnlyPathsRule {
    pub fn new(paths: Vec<String>) -> Self {
        Self { paths }
    }
}

impl Rule for ReadOnlyPathsRule {
    fn id(&self) -> &str {
        "scope.read-only-paths"
    }
    fn name(&self) -> &str {
        "Protected paths are read-only"
    }
    fn severity(&self) -> Severity {
        Severity::Error
    }
    fn category(&self) -> RuleCategory {
        RuleCategory::Scope
    }

    fn evaluate(&self, action: &Action, _ctx: &EvalContext) -> Verdict {
        let target = match action {
            Action::FileWrite { file_path, .. } | Action::FileDelete { file_path } => file_path,
            _ => return Verdict::allow(self.id()),
        };
        match self
            .paths
            .iter()
            .find(|root| path_inside(target, root) || target.ends_with(root.as_str()))
        {
            Some(root) => Verdict::deny(
                self.id(),
                format!("'{target}' is under the read-only path '{root}'"),
            ),
            None => Verdict::allow(self.id()),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Denied paths
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Denies any access to configured off-limits subtrees: reads as well
/// as writes, and shell commands that name them.
pub struct DeniedPathsRule {
    paths: Vec<String>,
}

impl DeniedPathsRule {
    pub fn new(paths: Vec<String>) -> Self {
        Self { paths }
    }

    fn matching_root(&self, target: &str) -> Option<&String> {
        self.paths
            .iter()
            .find(|root| path_inside(target, root) || target.ends_with(root.as_str()))
    }
}

impl Rule for DeniedPathsRule {
    fn id(&self) -> &str {
        "scope.denied-paths"
    }
    fn name(&self) -> &str {
        "Off-limits paths"
    }
    fn severity(&self) -> Severity {
        Severity::Error
    }
    fn category(&self) -> RuleCategory {
        RuleCategory::Scope
    }

    fn evaluate(&self, action: &Action, _ctx: &EvalContext) -> Verdict {
        if let Some(target) = action.file_path() {
            if let Some(root) = self.matching_root(target) {
                return Verdict::deny(
                    self.id(),
                    format!("'{target}' is under the denied path '{root}'"),
                );
            }
        }
        if let Action::ShellExec { command } = action {
            if let Some(root) = self.paths.iter().find(|root| command.contains(root.as_str())) {
                return Verdict::deny(
                    self.id(),
                    format!("command touches the denied path '{root}'"),
                );
            }
        }
        Verdict::allow(self.id())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Git history
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Denies commands and writes that rewrite committed history.
pub struct GitHistoryRule {
    patterns: Vec<Regex>,
}

impl GitHistoryRule {
    pub fn new() -> Self {
        let patterns = [
            r"git\s+push\s+[^|;]*(--force|-f)\b",
            r"git\s+filter-branch",
            r"git\s+reflog\s+expire",
            r"git\s+update-ref\s+-d",
            r"git\s+reset\s+--hard\s+\S+",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static pattern"))
        .collect();
        Self { patterns }
    }
}

impl Default for GitHistoryRule {
    fn default() -> Self {
        Self::new()
    }
}

impl Rule for GitHistoryRule {
    fn id(&self) -> &str {
        "scope.no-git-history"
    }
    fn name(&self) -> &str {
        "Git history is immutable"
    }
    fn severity(&self) -> Severity {
        Severity::Error
    }
    fn category(&self) -> RuleCategory {
        RuleCategory::Scope
    }

    fn evaluate(&self, action: &Action, _ctx: &EvalContext) -> Verdict {
        match action {
            Action::ShellExec { command } => {
                if self.patterns.iter().any(|p| p.is_match(command)) {
                    Verdict::deny(self.id(), format!("history-rewriting command: {command}"))
                } else {
                    Verdict::allow(self.id())
                }
            }
            Action::FileWrite { file_path, .. } | Action::FileDelete { file_path } => {
                if file_path.contains("/.git/") {
                    Verdict::deny(self.id(), format!("direct write into '{file_path}'"))
                } else {
                    Verdict::allow(self.id())
                }
            }
            _ => Verdict::allow(self.id()),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Read-only mode
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Denies every mutation; backs the `readonly` preset.
pub struct ReadOnlyModeRule;

impl Rule for ReadOnlyModeRule {
    fn id(&self) -> &str {
        "scope.read-only-mode"
    }
    fn name(&self) -> &str {
        "Read-only mode"
    }
    fn severity(&self) -> Severity {
        Severity::Error
    }
    fn category(&self) -> RuleCategory {
        RuleCategory::Scope
    }

    fn evaluate(&self, action: &Action, _ctx: &EvalContext) -> Verdict {
        if action.is_mutation() {
            Verdict::deny(self.id(), "mutations are disabled in read-only mode")
        } else {
            Verdict::allow(self.id())
        }
    }
}
