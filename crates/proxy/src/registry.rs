//! Provider registry.
//!
//! Instantiates one adapter per configured provider at startup and pairs
//! the routing table with the adapters. Providers that fail to
//! initialize are logged and skipped so one bad entry cannot take the
//! gateway down.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use ens_domain::config::{ProviderConfig, ProviderKind};
use ens_domain::error::Result;

use crate::google::GoogleProvider;
use crate::openai_compat::OpenAiCompatProvider;
use crate::passthrough::PassthroughProvider;
use crate::router::{route_model, RouteTarget};
use crate::traits::UpstreamProvider;

/// Health-endpoint view of one provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ProviderKind,
    pub models: usize,
}

pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn UpstreamProvider>>,
    configs: HashMap<String, ProviderConfig>,
    aliases: HashMap<String, String>,
}

impl ProviderRegistry {
    pub fn from_config(
        provider_configs: &HashMap<String, ProviderConfig>,
        aliases: &HashMap<String, String>,
    ) -> Self {
        let mut providers: HashMap<String, Arc<dyn UpstreamProvider>> = HashMap::new();

        for (name, cfg) in provider_configs {
            let result: Result<Arc<dyn UpstreamProvider>> = match cfg.kind {
                ProviderKind::OpenaiCompat => OpenAiCompatProvider::from_config(name, cfg)
                    .map(|p| Arc::new(p) as Arc<dyn UpstreamProvider>),
                ProviderKind::Google => GoogleProvider::from_config(name, cfg)
                    .map(|p| Arc::new(p) as Arc<dyn UpstreamProvider>),
                ProviderKind::Passthrough => PassthroughProvider::from_config(name, cfg)
                    .map(|p| Arc::new(p) as Arc<dyn UpstreamProvider>),
            };
            match result {
                Ok(provider) => {
                    tracing::info!(provider = %name, kind = ?cfg.kind, "registered provider");
                    providers.insert(name.clone(), provider);
                }
                Err(e) => {
                    tracing::warn!(provider = %name, error = %e, "provider failed to initialize, skipping");
                }
            }
        }

        Self {
            providers,
            configs: provider_configs.clone(),
            aliases: aliases.clone(),
        }
    }

    /// Route a model name and return the adapter plus the resolved
    /// model the adapter should see.
    pub fn resolve(&self, model: &str) -> Result<(Arc<dyn UpstreamProvider>, RouteTarget)> {
        let route = route_model(model, &self.aliases, &self.configs)?;
        let provider = self.providers.get(&route.provider).ok_or_else(|| {
            ens_domain::error::Error::Request(format!(
                "provider '{}' for model '{model}' is not available",
                route.provider
            ))
        })?;
        Ok((provider.clone(), route))
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn aliases(&self) -> &HashMap<String, String> {
        &self.aliases
    }

    pub fn summaries(&self) -> Vec<ProviderSummary> {
        let mut out: Vec<ProviderSummary> = self
            .configs
            .iter()
            .filter(|(name, _)| self.providers.contains_key(name.as_str()))
            .map(|(name, cfg)| ProviderSummary {
                name: name.clone(),
                kind: cfg.kind,
                models: cfg.models.len(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ProviderRegistry {
        let providers: HashMap<String, ProviderConfig> = serde_json::from_value(serde_json::json!({
            "openai": {
                "type": "openai-compat",
                "endpoint": "https://api.openai.com/v1",
                "api_key": "sk-test",
                "models": {"gpt-4.1-mini": {}},
            },
            "anthropic": {"type": "passthrough", "api_key": "k"},
        }))
        .unwrap();
        let mut aliases = HashMap::new();
        aliases.insert("sonnet".to_string(), "openai/gpt-4.1-mini".to_string());
        ProviderRegistry::from_config(&providers, &aliases)
    }

    #[test]
    fn resolve_returns_adapter_and_route() {
        let reg = registry();
        let (provider, route) = reg.resolve("sonnet").unwrap();
        assert_eq!(provider.provider_name(), "openai");
        assert_eq!(route.model, "gpt-4.1-mini");
    }

    #[test]
    fn summaries_are_sorted_and_complete() {
        let reg = registry();
        let summaries = reg.summaries();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].name, "anthropic");
        assert_eq!(summaries[1].name, "openai");
        assert_eq!(summaries[1].models, 1);
    }
}
