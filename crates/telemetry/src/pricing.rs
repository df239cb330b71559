//! Pricing table for the models the pipeline can call.
//!
//! Prices are in USD per 1 million tokens. Each model has an input and
//! output price. Entries from the model catalog in `config.toml` are
//! layered over the built-in defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-million-token pricing for a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Price per 1M input tokens in USD.
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD.
    pub output_per_m: f64,
}

impl ModelPricing {
    /// Create a new pricing entry.
    pub fn new(input_per_m: f64, output_per_m: f64) -> Self {
        Self {
            input_per_m,
            output_per_m,
        }
    }

    /// Cost of the input side of a call.
    pub fn input_cost(&self, input_tokens: u32) -> f64 {
        input_tokens as f64 * self.input_per_m / 1_000_000.0
    }

    /// Cost of the output side of a call.
    pub fn output_cost(&self, output_tokens: u32) -> f64 {
        output_tokens as f64 * self.output_per_m / 1_000_000.0
    }

    /// Compute cost for the given token counts.
    pub fn cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        self.input_cost(input_tokens) + self.output_cost(output_tokens)
    }
}

/// Pricing keyed by provider-side model identifier.
#[derive(Debug, Clone)]
pub struct PricingTable {
    prices: HashMap<String, ModelPricing>,
}

impl PricingTable {
    /// Create a pricing table with built-in model prices.
    pub fn with_defaults() -> Self {
        let mut prices = HashMap::new();

        // ── Anthropic ──────────────────────────────────────────────
        prices.insert(
            "claude-3-7-sonnet-20250219".into(),
            ModelPricing::new(3.0, 15.0),
        );
        prices.insert(
            "claude-3-5-haiku-20241022".into(),
            ModelPricing::new(0.8, 4.0),
        );

        // ── OpenAI ─────────────────────────────────────────────────
        prices.insert("o1".into(), ModelPricing::new(15.0, 60.0));
        prices.insert("o3-mini".into(), ModelPricing::new(1.1, 4.4));

        Self { prices }
    }

    /// Create an empty pricing table.
    pub fn empty() -> Self {
        Self {
            prices: HashMap::new(),
        }
    }

    /// Look up pricing for a model. Returns None if not found.
    pub fn get(&self, model: &str) -> Option<ModelPricing> {
        self.lookup(model)
    }

    /// Add or update pricing for a model.
    pub fn set(&mut self, model: impl Into<String>, pricing: ModelPricing) {
        self.prices.insert(model.into(), pricing);
    }

    /// Compute cost for a model call, returning 0.0 if model is not in table.
    ///
    /// Tries an exact match first, then the longest known id that prefixes
    /// the model (`o3-mini-2025-01-31` matches `o3-mini`).
    pub fn compute_cost(&self, model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
        match self.lookup(model) {
            Some(p) => p.cost(input_tokens, output_tokens),
            None => {
                tracing::warn!(model = %model, "No pricing for model, recording zero cost");
                0.0
            }
        }
    }

    fn lookup(&self, model: &str) -> Option<ModelPricing> {
        if let Some(p) = self.prices.get(model) {
            return Some(*p);
        }

        let model_lower = model.to_lowercase();
        self.prices
            .iter()
            .filter(|(key, _)| model_lower.starts_with(&key.to_lowercase()))
            .max_by_key(|(key, _)| key.len())
            .map(|(_, p)| *p)
    }

    /// List all known model names.
    pub fn models(&self) -> Vec<String> {
        let mut names: Vec<String> = self.prices.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of models in the pricing table.
    pub fn len(&self) -> usize {
        self.prices.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}
