//! Model → provider routing.
//!
//! Resolution order:
//! 1. strip any `anthropic/` prefix from the requested model
//! 2. exact alias-table match
//! 3. fuzzy alias: an alias key appearing inside the lowercased model
//! 4. explicit `provider/model` syntax
//! 5. an exact hit in any provider's explicit model list
//! 6. the first wildcard provider (empty model list, not passthrough)
//! 7. otherwise: no provider for the model
//!
//! Fuzzy and list scans iterate in sorted order (longest alias key
//! first) so resolution is deterministic regardless of map layout.

use std::collections::HashMap;

use ens_domain::config::{ProviderConfig, ProviderKind};
use ens_domain::error::{Error, Result};

/// A routing decision: which provider, and the model name it advertises.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub provider: String,
    pub model: String,
}

fn parse_target(target: &str) -> Option<RouteTarget> {
    target.split_once('/').map(|(provider, model)| RouteTarget {
        provider: provider.to_string(),
        model: model.to_string(),
    })
}

/// Resolve the provider and model for a requested model name.
pub fn route_model(
    requested: &str,
    aliases: &HashMap<String, String>,
    providers: &HashMap<String, ProviderConfig>,
) -> Result<RouteTarget> {
    // 1. The client dialect is Anthropic-shaped; a dialect prefix on the
    //    model is noise.
    let model = requested.strip_prefix("anthropic/").unwrap_or(requested);

    // 2. Exact alias.
    if let Some(target) = aliases.get(model) {
        if let Some(route) = parse_target(target) {
            return Ok(route);
        }
    }

    // 3. Fuzzy alias: longest key first so "sonnet-fast" beats "sonnet".
    let lowered = model.to_lowercase();
    let mut alias_keys: Vec<&String> = aliases.keys().collect();
    alias_keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    for key in alias_keys {
        if lowered.contains(&key.to_lowercase()) {
            if let Some(route) = aliases.get(key).and_then(|t| parse_target(t)) {
                return Ok(route);
            }
        }
    }

    // 4. Explicit provider/model syntax.
    if let Some((provider, rest)) = model.split_once('/') {
        if providers.contains_key(provider) {
            return Ok(RouteTarget {
                provider: provider.to_string(),
                model: rest.to_string(),
            });
        }
    }

    // 5. Exact hit in a provider's model list.
    let mut provider_names: Vec<&String> = providers.keys().collect();
    provider_names.sort();
    for name in &provider_names {
        if providers[*name].models.contains_key(model) {
            return Ok(RouteTarget {
                provider: (*name).clone(),
                model: model.to_string(),
            });
        }
    }

    // 6. First wildcard provider that is not a passthrough.
    for name in &provider_names {
        let cfg = &providers[*name];
        if cfg.models.is_empty() && cfg.kind != ProviderKind::Passthrough {
            return Ok(RouteTarget {
                provider: (*name).clone(),
                model: model.to_string(),
            });
        }
    }

    // 7. Nothing can serve this model.
    Err(Error::Request(format!("no provider for model '{requested}'")))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
