use serde::{Deserialize, Serialize};

/// Which rule preset the policy engine boots with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyPreset {
    Strict,
    Standard,
    Permissive,
    Readonly,
    Review,
}

/// Policy section of the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySelection {
    #[serde(default = "d_preset")]
    pub preset: PolicyPreset,
    #[serde(default)]
    pub overrides: PolicyOverrides,
}

impl Default for PolicySelection {
    fn default() -> Self {
        Self {
            preset: d_preset(),
            overrides: PolicyOverrides::default(),
        }
    }
}

/// Per-deployment tweaks layered over a preset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyOverrides {
    /// Stop evaluating at the first deny instead of collecting all verdicts.
    #[serde(default)]
    pub enforce_strict: Option<bool>,
    /// Session cost ceiling in USD.
    #[serde(default)]
    pub cost_budget: Option<f64>,
    /// LLM calls allowed per session in a trailing 60 s window.
    #[serde(default)]
    pub max_llm_calls_per_minute: Option<u32>,
    /// Paths that may be read but never written.
    #[serde(default)]
    pub read_only_paths: Option<Vec<String>>,
    /// Paths denied entirely.
    #[serde(default)]
    pub denied_paths: Option<Vec<String>>,
    /// Guardian findings below this confidence are discarded.
    #[serde(default)]
    pub confidence_threshold: Option<f64>,
    /// Guardian finding retention cap.
    #[serde(default)]
    pub max_findings: Option<usize>,
}

fn d_preset() -> PolicyPreset {
    PolicyPreset::Standard
}
