//! Provider router: selects the provider that backs a model.
//!
//! Providers are registered per [`ProviderKind`]; the generation client
//! looks up the kind recorded in the model catalog.

use crate::anthropic::AnthropicProvider;
use crate::openai_compat::OpenAiCompatProvider;
use paperchain_core::{Provider, ProviderError, ProviderKind};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Routes generation requests to the correct provider.
#[derive(Default)]
pub struct ProviderRouter {
    providers: HashMap<ProviderKind, Arc<dyn Provider>>,
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider, replacing any previous one for the same kind.
    pub fn register(&mut self, kind: ProviderKind, provider: Arc<dyn Provider>) {
        self.providers.insert(kind, provider);
    }

    /// Get the provider for a kind, if one is configured.
    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn Provider>> {
        self.providers.get(&kind).cloned()
    }

    /// Get the provider for a kind, or fail with a configuration error.
    pub fn require(&self, kind: ProviderKind) -> Result<Arc<dyn Provider>, ProviderError> {
        self.get(kind).ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "no API key configured for provider '{kind}'"
            ))
        })
    }

    /// List registered provider kinds.
    pub fn list(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<ProviderKind> = self.providers.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }
}

/// Base URL used when the config does not override it.
pub fn default_base_url(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::Anthropic => "https://api.anthropic.com",
        ProviderKind::OpenAi => "https://api.openai.com/v1",
    }
}

/// Build providers from configuration.
///
/// Only providers with an API key are registered; a stage that needs a
/// missing provider fails at preflight with `NotConfigured`.
pub fn build_from_config(config: &paperchain_config::AppConfig) -> ProviderRouter {
    let mut router = ProviderRouter::new();
    let timeout = Duration::from_secs(config.request_timeout_secs);

    for kind in [ProviderKind::Anthropic, ProviderKind::OpenAi] {
        let Some(api_key) = config.api_key_for(kind) else {
            tracing::debug!(provider = %kind, "No API key, provider not registered");
            continue;
        };
        let base_url = config
            .api_url_for(kind)
            .unwrap_or_else(|| default_base_url(kind).to_string());

        let provider: Arc<dyn Provider> = match kind {
            ProviderKind::Anthropic => Arc::new(
                AnthropicProvider::new(api_key)
                    .with_base_url(base_url)
                    .with_timeout(timeout),
            ),
            ProviderKind::OpenAi => Arc::new(
                OpenAiCompatProvider::new(kind.as_str(), base_url, api_key).with_timeout(timeout),
            ),
        };
        router.register(kind, provider);
    }

    router
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperchain_config::{AppConfig, ProviderConfig};

    #[test]
    fn only_keyed_providers_are_registered() {
        let mut config = AppConfig::default();
        config.providers.insert(
            "anthropic".into(),
            ProviderConfig {
                api_key: Some("sk-ant".into()),
                api_url: None,
            },
        );

        let router = build_from_config(&config);
        assert_eq!(router.list(), vec![ProviderKind::Anthropic]);
        assert_eq!(router.require(ProviderKind::Anthropic).unwrap().name(), "anthropic");
        assert!(matches!(
            router.require(ProviderKind::OpenAi),
            Err(ProviderError::NotConfigured(_))
        ));
    }

    #[test]
    fn shared_key_registers_every_provider() {
        let config = AppConfig {
            api_key: Some("shared".into()),
            ..AppConfig::default()
        };
        let router = build_from_config(&config);
        assert_eq!(
            router.list(),
            vec![ProviderKind::Anthropic, ProviderKind::OpenAi]
        );
        assert_eq!(router.get(ProviderKind::OpenAi).unwrap().name(), "openai");
    }

    #[test]
    fn default_urls() {
        assert_eq!(default_base_url(ProviderKind::Anthropic), "https://api.anthropic.com");
        assert!(default_base_url(ProviderKind::OpenAi).ends_with("/v1"));
    }
}
