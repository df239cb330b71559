//! Model catalog: short aliases mapped to concrete provider models.
//!
//! Plans name models by alias (`sonnet`, `haiku`, `o1`, `o3-mini`). The
//! catalog resolves an alias to the provider that serves it, the
//! provider-side id, the output and reasoning caps, and the price.
//! Entries under `[models.<alias>]` in `config.toml` replace or extend the
//! built-in set.

use paperchain_core::ProviderKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Which service hosts the model
    pub provider: ProviderKind,

    /// Provider-side model identifier
    pub id: String,

    /// Hard cap on generated tokens
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// Largest reasoning budget the model accepts; 0 means no reasoning mode
    #[serde(default)]
    pub max_thinking_tokens: u32,

    /// USD per 1M input tokens
    pub input_per_m: f64,

    /// USD per 1M output tokens
    pub output_per_m: f64,
}

fn default_max_output_tokens() -> u32 {
    8192
}

impl ModelSpec {
    pub fn supports_thinking(&self) -> bool {
        self.max_thinking_tokens > 0
    }
}

/// Alias → model lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelCatalog {
    models: BTreeMap<String, ModelSpec>,
}

impl ModelCatalog {
    /// The built-in catalog.
    pub fn with_defaults() -> Self {
        let mut models = BTreeMap::new();

        // ── Anthropic ──────────────────────────────────────────────
        models.insert(
            "sonnet".into(),
            ModelSpec {
                provider: ProviderKind::Anthropic,
                id: "claude-3-7-sonnet-20250219".into(),
                max_output_tokens: 8192,
                max_thinking_tokens: 8192,
                input_per_m: 3.0,
                output_per_m: 15.0,
            },
        );
        models.insert(
            "haiku".into(),
            ModelSpec {
                provider: ProviderKind::Anthropic,
                id: "claude-3-5-haiku-20241022".into(),
                max_output_tokens: 8192,
                max_thinking_tokens: 0,
                input_per_m: 0.8,
                output_per_m: 4.0,
            },
        );

        // ── OpenAI ─────────────────────────────────────────────────
        models.insert(
            "o1".into(),
            ModelSpec {
                provider: ProviderKind::OpenAi,
                id: "o1".into(),
                max_output_tokens: 8192,
                max_thinking_tokens: 0,
                input_per_m: 15.0,
                output_per_m: 60.0,
            },
        );
        models.insert(
            "o3-mini".into(),
            ModelSpec {
                provider: ProviderKind::OpenAi,
                id: "o3-mini".into(),
                max_output_tokens: 8192,
                max_thinking_tokens: 0,
                input_per_m: 1.1,
                output_per_m: 4.4,
            },
        );

        Self { models }
    }

    pub fn empty() -> Self {
        Self {
            models: BTreeMap::new(),
        }
    }

    /// Add or replace an entry.
    pub fn insert(&mut self, alias: impl Into<String>, spec: ModelSpec) {
        self.models.insert(alias.into(), spec);
    }

    /// Layer `overrides` over this catalog.
    pub fn merged(mut self, overrides: &ModelCatalog) -> Self {
        for (alias, spec) in &overrides.models {
            self.models.insert(alias.clone(), spec.clone());
        }
        self
    }

    /// Resolve an alias, falling back to a match on the provider-side id.
    pub fn resolve(&self, name: &str) -> Option<&ModelSpec> {
        self.models
            .get(name)
            .or_else(|| self.models.values().find(|spec| spec.id == name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    /// All entries, ordered by alias.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ModelSpec)> {
        self.models.iter().map(|(alias, spec)| (alias.as_str(), spec))
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_both_providers() {
        let catalog = ModelCatalog::with_defaults();
        assert_eq!(catalog.resolve("sonnet").unwrap().provider, ProviderKind::Anthropic);
        assert_eq!(catalog.resolve("o1").unwrap().provider, ProviderKind::OpenAi);
        assert!(catalog.resolve("sonnet").unwrap().supports_thinking());
        assert!(!catalog.resolve("haiku").unwrap().supports_thinking());
    }

    #[test]
    fn resolves_by_provider_id() {
        let catalog = ModelCatalog::with_defaults();
        let spec = catalog.resolve("claude-3-5-haiku-20241022").unwrap();
        assert_eq!(spec.max_thinking_tokens, 0);
        assert!(catalog.resolve("gpt-2").is_none());
    }

    #[test]
    fn overrides_replace_and_extend() {
        let overrides: ModelCatalog = toml::from_str(
            r#"
[sonnet]
provider = "anthropic"
id = "claude-sonnet-4-20250514"
max_output_tokens = 64000
max_thinking_tokens = 32000
input_per_m = 3.0
output_per_m = 15.0

[local]
provider = "openai"
id = "llama-3.1-70b"
input_per_m = 0.0
output_per_m = 0.0
"#,
        )
        .unwrap();

        let catalog = ModelCatalog::with_defaults().merged(&overrides);
        assert_eq!(catalog.len(), 5);
        assert_eq!(catalog.resolve("sonnet").unwrap().max_output_tokens, 64000);
        let local = catalog.resolve("local").unwrap();
        assert_eq!(local.max_output_tokens, 8192);
        assert_eq!(local.max_thinking_tokens, 0);
    }
}
