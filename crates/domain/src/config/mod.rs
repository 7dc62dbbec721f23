//! Configuration model.
//!
//! The config file is JSON, located at `$ENSEMBLE_CONFIG_HOME/config.json`
//! (falling back to `$CONFIG_HOME/config.json`, then the platform config
//! dir).  Every string value supports `${ENV_VAR}` interpolation, applied
//! recursively before deserialization so secrets never need to live in the
//! file itself.

mod bus;
mod lifecycle;
mod policy;
mod providers;
mod webhooks;

pub use bus::*;
pub use lifecycle::*;
pub use policy::*;
pub use providers::*;
pub use webhooks::*;

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    /// Upstream LLM providers, keyed by provider name.
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    /// Model alias table: alias → `"provider/model"`.
    #[serde(default)]
    pub aliases: HashMap<String, String>,
    #[serde(default)]
    pub auth: AuthConfig,
    /// When true (default), responds with permissive CORS headers.
    #[serde(default = "d_true")]
    pub cors: bool,
    #[serde(default)]
    pub policy: PolicySelection,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub bus: BusConfig,
    /// Webhook endpoints fed from the message bus.
    #[serde(default)]
    pub webhooks: Vec<WebhookConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: d_port(),
            host: d_host(),
            providers: HashMap::new(),
            aliases: HashMap::new(),
            auth: AuthConfig::default(),
            cors: true,
            policy: PolicySelection::default(),
            lifecycle: LifecycleConfig::default(),
            bus: BusConfig::default(),
            webhooks: Vec::new(),
        }
    }
}

fn d_port() -> u16 {
    8791
}

fn d_host() -> String {
    "127.0.0.1".into()
}

pub(crate) fn d_true() -> bool {
    true
}

/// Gateway authentication.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// API key clients must present (`x-api-key` or `Authorization: Bearer`).
    /// `None` disables auth.
    #[serde(default)]
    pub api_key: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Loading + env interpolation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Config {
    /// Resolve the config file location.
    ///
    /// `$ENSEMBLE_CONFIG_HOME` wins, then `$CONFIG_HOME`, then the
    /// platform config directory.
    pub fn default_path() -> PathBuf {
        let home = std::env::var("ENSEMBLE_CONFIG_HOME")
            .or_else(|_| std::env::var("CONFIG_HOME"))
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("ensemble")
            });
        home.join("config.json")
    }

    /// Load and interpolate the config file at `path`.
    ///
    /// A missing file yields the default config (the gateway can run with
    /// zero providers, it just cannot route anything).
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(Error::Io(e)),
        };
        Self::from_json(&raw)
    }

    /// Parse a JSON config string, applying `${ENV_VAR}` interpolation.
    pub fn from_json(raw: &str) -> Result<Self> {
        let mut value: serde_json::Value = serde_json::from_str(raw)?;
        interpolate_env(&mut value);
        serde_json::from_value(value).map_err(|e| Error::Config(e.to_string()))
    }
}

/// Recursively replace `${VAR}` in every string value with the
/// environment variable's contents. Unset variables are left verbatim and
/// logged, so a typo is visible instead of silently becoming "".
pub fn interpolate_env(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::String(s) => {
            if s.contains("${") {
                *s = interpolate_str(s);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                interpolate_env(item);
            }
        }
        serde_json::Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                interpolate_env(v);
            }
        }
        _ => {}
    }
}

fn interpolate_str(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match std::env::var(name) {
                    Ok(val) => out.push_str(&val),
                    Err(_) => {
                        tracing::warn!(var = %name, "env var referenced in config is not set");
                        out.push_str(&rest[start..start + 2 + end + 1]);
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                // Unterminated `${` — keep the remainder as-is.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.port == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "port".into(),
                message: "port must be greater than 0".into(),
            });
        }
        if self.host.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "host".into(),
                message: "host must not be empty".into(),
            });
        }

        for (name, pc) in &self.providers {
            if pc.kind == ProviderKind::OpenaiCompat && pc.endpoint.is_none() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: format!("providers.{name}.endpoint"),
                    message: "openai-compat providers require an endpoint".into(),
                });
            }
            if pc.api_key.is_none() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Warning,
                    field: format!("providers.{name}.api_key"),
                    message: "no API key configured; upstream may reject requests".into(),
                });
            }
        }

        for (alias, target) in &self.aliases {
            if !target.contains('/') {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: format!("aliases.{alias}"),
                    message: format!("alias target '{target}' must be 'provider/model'"),
                });
            } else if let Some((provider, _)) = target.split_once('/') {
                if !self.providers.contains_key(provider) {
                    issues.push(ConfigIssue {
                        severity: ConfigSeverity::Warning,
                        field: format!("aliases.{alias}"),
                        message: format!("alias points at unknown provider '{provider}'"),
                    });
                }
            }
        }

        issues.extend(self.lifecycle.validate());

        for (i, wh) in self.webhooks.iter().enumerate() {
            if wh.url.is_empty() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: format!("webhooks[{i}].url"),
                    message: "webhook url must not be empty".into(),
                });
            }
            if wh.topics.is_empty() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Warning,
                    field: format!("webhooks[{i}].topics"),
                    message: "webhook has no topic patterns and will never fire".into(),
                });
            }
        }

        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
