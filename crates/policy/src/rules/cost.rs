//! Cost rules: session budget caps, per-call spend, model-tier fit, and
//! per-session LLM rate limiting.

use std::sync::Arc;

use regex::RegexBuilder;

use crate::action::{Action, EvalContext, Rule, RuleCategory, Severity, Verdict};
use crate::ratelimit::SlidingWindow;

/// Budget fraction at which warnings begin.
const BUDGET_WARN_FRACTION: f64 = 0.8;

/// Per-call spend above which a warning fires.
const PER_CALL_WARN_USD: f64 = 1.0;

/// Prompts shorter than this that use a premium model draw a warning.
const SHORT_PROMPT_CHARS: usize = 200;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Budget cap
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Denies once the session budget is spent; warns from 80%.
pub struct BudgetCapRule;

impl Rule for BudgetCapRule {
    fn id(&self) -> &str {
        "cost.budget-cap"
    }
    fn name(&self) -> &str {
        "Session budget cap"
    }
    fn severity(&self) -> Severity {
        Severity::Error
    }
    fn category(&self) -> RuleCategory {
        RuleCategory::Cost
    }

    fn evaluate(&self, action: &Action, ctx: &EvalContext) -> Verdict {
        if !matches!(action, Action::LlmCall { .. }) || ctx.cost_budget <= 0.0 {
            return Verdict::allow(self.id());
        }
        if ctx.total_cost_so_far >= ctx.cost_budget {
            return Verdict::deny(
                self.id(),
                format!(
                    "session spend ${:.2} has reached the budget ${:.2}",
                    ctx.total_cost_so_far, ctx.cost_budget
                ),
            );
        }
        if ctx.total_cost_so_far >= ctx.cost_budget * BUDGET_WARN_FRACTION {
            return Verdict::warn(
                self.id(),
                format!(
                    "session spend ${:.2} is above {}% of the ${:.2} budget",
                    ctx.total_cost_so_far,
                    (BUDGET_WARN_FRACTION * 100.0) as u32,
                    ctx.cost_budget
                ),
            );
        }
        Verdict::allow(self.id())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-call cost
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Warns on single calls estimated above $1.00.
pub struct PerCallCostRule;

impl Rule for PerCallCostRule {
    fn id(&self) -> &str {
        "cost.per-call"
    }
    fn name(&self) -> &str {
        "Expensive single call"
    }
    fn severity(&self) -> Severity {
        Severity::Warning
    }
    fn category(&self) -> RuleCategory {
        RuleCategory::Cost
    }

    fn evaluate(&self, action: &Action, _ctx: &EvalContext) -> Verdict {
        let Action::LlmCall { cost, .. } = action else {
            return Verdict::allow(self.id());
        };
        if *cost > PER_CALL_WARN_USD {
            Verdict::warn(
                self.id(),
                format!("single call estimated at ${cost:.2}"),
            )
        } else {
            Verdict::allow(self.id())
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model tier
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Warns when a premium model is pointed at a short, code-free prompt.
pub struct ModelTierRule {
    premium: regex::Regex,
}

impl ModelTierRule {
    pub fn new() -> Self {
        Self {
            premium: RegexBuilder::new(r"(opus|ultra|gpt-4o\b|\bo1\b|\bo3\b)")
                .case_insensitive(true)
                .build()
                .expect("static pattern"),
        }
    }
}

impl Default for ModelTierRule {
    fn default() -> Self {
        Self::new()
    }
}

impl Rule for ModelTierRule {
    fn id(&self) -> &str {
        "cost.model-tier"
    }
    fn name(&self) -> &str {
        "Premium model for trivial prompt"
    }
    fn severity(&self) -> Severity {
        Severity::Warning
    }
    fn category(&self) -> RuleCategory {
        RuleCategory::Cost
    }

    fn evaluate(&self, action: &Action, _ctx: &EvalContext) -> Verdict {
        let Action::LlmCall { model, prompt, .. } = action else {
            return Verdict::allow(self.id());
        };
        let short = prompt.len() < SHORT_PROMPT_CHARS;
        let has_code = prompt.contains("```");
        if self.premium.is_match(model) && short && !has_code {
            Verdict::warn(
                self.id(),
                format!("premium model '{model}' used for a short prompt"),
            )
            .with_suggestion("route short utility prompts to a cheaper tier")
        } else {
            Verdict::allow(self.id())
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rate limit
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Denies beyond `max_calls` LLM calls per session in a trailing 60 s.
///
/// The only rule with a sanctioned side effect: each LLM-call evaluation
/// records into the shared sliding window.
pub struct RateLimitRule {
    window: Arc<SlidingWindow>,
    max_calls: usize,
}

impl RateLimitRule {
    pub fn new(window: Arc<SlidingWindow>, max_calls: usize) -> Self {
        Self { window, max_calls }
    }
}

impl Rule for RateLimitRule {
    fn id(&self) -> &str {
        "cost.rate-limit"
    }
    fn name(&self) -> &str {
        "Per-session LLM rate limit"
    }
    fn severity(&self) -> Severity {
        Severity::Error
    }
    fn category(&self) -> RuleCategory {
        RuleCategory::Cost
    }

    fn evaluate(&self, action: &Action, ctx: &EvalContext) -> Verdict {
        if !matches!(action, Action::LlmCall { .. }) {
            return Verdict::allow(self.id());
        }
        let count = self.window.record(&ctx.session_id, ctx.timestamp_ms);
        if count > self.max_calls {
            Verdict::deny(
                self.id(),
                format!(
                    "{count} LLM calls in the last 60s exceeds the limit of {}",
                    self.max_calls
                ),
            )
        } else {
            Verdict::allow(self.id())
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
