pub mod convention;
pub mod cost;
pub mod scope;
pub mod security;

pub use convention::{
    FileSizeRule, ImportOrderRule, KebabCaseRule, LoggingHygieneRule, TestPresenceRule,
};
pub use cost::{BudgetCapRule, ModelTierRule, PerCallCostRule, RateLimitRule};
pub use scope::{
    DeniedPathsRule, GitHistoryRule, ProjectBoundaryRule, ReadOnlyModeRule, ReadOnlyPathsRule,
};
pub use security::{
    CredentialRule, DestructiveCommandRule, ExfiltrationRule, SandboxRule, SudoRule,
};
