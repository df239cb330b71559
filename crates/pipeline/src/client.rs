//! Generation client: one uniform call over every backing provider.
//!
//! Resolves a model alias through the catalog, normalizes the generation
//! budget to what the provider accepts, streams the response while
//! surfacing partial text, prices the call and writes the cost ledger entry.

use paperchain_config::{ModelCatalog, ModelSpec};
use paperchain_core::{Error, Message, ProviderError, ProviderRequest, Usage};
use paperchain_providers::ProviderRouter;
use paperchain_telemetry::{CallPurpose, CostLedger, ModelPricing, PricingTable};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Smallest reasoning budget providers accept.
pub const MIN_THINKING_BUDGET: u32 = 1024;

/// Temperature required while reasoning mode is active.
pub const THINKING_TEMPERATURE: f32 = 1.0;

/// Receives partial text as it streams in.
pub type TextObserver = Arc<dyn Fn(&str) + Send + Sync>;

/// One generation call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub payload: String,
    /// Model alias or provider-side id
    pub model: String,
    pub max_output_tokens: u32,
    pub thinking_budget: u32,
    pub temperature: f32,
    pub system_instructions: Option<String>,
}

/// The normalized outcome of a generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost: f64,
    /// Provider-side id of the model that was called
    pub model_id: String,
}

/// Budget actually dispatched after normalization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationBudget {
    pub max_output_tokens: u32,
    pub thinking_budget: u32,
    pub temperature: f32,
}

impl GenerationBudget {
    /// Normalize a requested budget against a model's limits.
    ///
    /// In order: clamp to the model's output and reasoning caps, raise a
    /// non-zero reasoning budget to [`MIN_THINKING_BUDGET`], halve the
    /// output cap when reasoning would consume all of it, and pin the
    /// temperature while reasoning is active. If halving leaves less than
    /// the floor, reasoning is turned off.
    pub fn normalize(
        spec: &ModelSpec,
        max_output_tokens: u32,
        thinking_budget: u32,
        temperature: f32,
    ) -> Self {
        let max_output_tokens = max_output_tokens.min(spec.max_output_tokens);
        let mut thinking = thinking_budget.min(spec.max_thinking_tokens);
        if thinking < thinking_budget {
            debug!(
                model = %spec.id,
                requested = thinking_budget,
                cap = spec.max_thinking_tokens,
                "Thinking budget clamped to model cap"
            );
        }

        if thinking > 0 && thinking < MIN_THINKING_BUDGET {
            warn!(
                model = %spec.id,
                requested = thinking,
                floor = MIN_THINKING_BUDGET,
                "Thinking budget below provider minimum, raising it"
            );
            thinking = MIN_THINKING_BUDGET;
        }

        if thinking >= max_output_tokens && thinking > 0 {
            let halved = max_output_tokens / 2;
            warn!(
                model = %spec.id,
                requested = thinking,
                max_output_tokens,
                clamped = halved,
                "Thinking budget must be below max output tokens, clamping to half"
            );
            thinking = halved;
        }

        if thinking > 0 && thinking < MIN_THINKING_BUDGET {
            warn!(
                model = %spec.id,
                budget = thinking,
                floor = MIN_THINKING_BUDGET,
                max_output_tokens,
                "Output cap leaves no room for the minimum thinking budget, disabling reasoning"
            );
            thinking = 0;
        }

        let temperature = if thinking > 0 {
            if (temperature - THINKING_TEMPERATURE).abs() > f32::EPSILON {
                debug!(model = %spec.id, temperature, "Reasoning mode forces temperature 1.0");
            }
            THINKING_TEMPERATURE
        } else {
            temperature
        };

        Self {
            max_output_tokens,
            thinking_budget: thinking,
            temperature,
        }
    }
}

/// Uniform generation over the configured providers.
pub struct GenerationClient {
    router: ProviderRouter,
    catalog: ModelCatalog,
    pricing: PricingTable,
    ledger: Arc<CostLedger>,
    timeout: Duration,
    observer: Option<TextObserver>,
}

impl GenerationClient {
    /// Create a client. Prices come from the catalog entries.
    pub fn new(router: ProviderRouter, catalog: ModelCatalog, ledger: Arc<CostLedger>) -> Self {
        let mut pricing = PricingTable::with_defaults();
        for (_, spec) in catalog.iter() {
            pricing.set(spec.id.clone(), ModelPricing::new(spec.input_per_m, spec.output_per_m));
        }
        Self {
            router,
            catalog,
            pricing,
            ledger,
            timeout: Duration::from_secs(600),
            observer: None,
        }
    }

    /// Treat any call running longer than `timeout` as failed.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Surface partial text while a response streams.
    pub fn with_observer(mut self, observer: TextObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    pub fn ledger(&self) -> &Arc<CostLedger> {
        &self.ledger
    }

    fn resolve(&self, model: &str) -> Result<&ModelSpec, Error> {
        self.catalog.resolve(model).ok_or_else(|| Error::Config {
            message: format!("model '{model}' is not in the model catalog"),
        })
    }

    /// Check that every model resolves and has a configured provider.
    pub fn preflight<'a>(&self, models: impl IntoIterator<Item = &'a str>) -> Result<(), Error> {
        for model in models {
            let spec = self.resolve(model)?;
            self.router.require(spec.provider).map_err(|e| Error::Config {
                message: format!("model '{model}': {e}"),
            })?;
        }
        Ok(())
    }

    /// Run one generation call and record its cost.
    ///
    /// Partial text is passed to the observer as it arrives but is never
    /// returned on failure; only a complete response produces a result.
    pub async fn generate(
        &self,
        stage: &str,
        purpose: CallPurpose,
        request: &GenerationRequest,
    ) -> Result<GenerationResult, Error> {
        let spec = self.resolve(&request.model)?;
        let provider = self.router.require(spec.provider).map_err(|e| Error::Config {
            message: format!("model '{}': {e}", request.model),
        })?;

        let budget = GenerationBudget::normalize(
            spec,
            request.max_output_tokens,
            request.thinking_budget,
            request.temperature,
        );

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system_instructions.as_deref().filter(|s| !s.is_empty()) {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(request.payload.as_str()));

        let provider_request = ProviderRequest {
            model: spec.id.clone(),
            messages,
            temperature: budget.temperature,
            max_tokens: Some(budget.max_output_tokens),
            thinking_budget: (budget.thinking_budget > 0).then_some(budget.thinking_budget),
            stream: true,
        };

        info!(
            stage = %stage,
            purpose = ?purpose,
            provider = %provider.name(),
            model = %spec.id,
            max_tokens = budget.max_output_tokens,
            thinking_budget = budget.thinking_budget,
            temperature = budget.temperature,
            payload_chars = request.payload.len(),
            "Dispatching generation request"
        );

        let (text, usage) = tokio::time::timeout(self.timeout, self.stream_text(provider.as_ref(), provider_request))
            .await
            .map_err(|_| {
                ProviderError::Timeout(format!(
                    "no complete response from {} within {}s",
                    spec.id,
                    self.timeout.as_secs()
                ))
            })??;

        let usage = usage.unwrap_or_else(|| {
            warn!(stage = %stage, model = %spec.id, "Provider reported no token usage");
            Usage::default()
        });
        let cost = self
            .pricing
            .compute_cost(&spec.id, usage.prompt_tokens, usage.completion_tokens);
        self.ledger.record(
            stage,
            purpose,
            &spec.id,
            usage.prompt_tokens,
            usage.completion_tokens,
            cost,
        )
        .await;

        info!(
            stage = %stage,
            model = %spec.id,
            input_tokens = usage.prompt_tokens,
            output_tokens = usage.completion_tokens,
            cost_usd = cost,
            "Generation complete"
        );

        Ok(GenerationResult {
            text,
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            cost,
            model_id: spec.id.clone(),
        })
    }

    async fn stream_text(
        &self,
        provider: &dyn paperchain_core::Provider,
        request: ProviderRequest,
    ) -> Result<(String, Option<Usage>), ProviderError> {
        let mut rx = provider.stream(request).await?;
        let mut text = String::new();

        while let Some(item) = rx.recv().await {
            let chunk = item?;
            if let Some(content) = chunk.content.as_deref().filter(|c| !c.is_empty()) {
                if let Some(observer) = &self.observer {
                    observer(content);
                }
                text.push_str(content);
            }
            if chunk.done {
                return Ok((text, chunk.usage));
            }
        }

        Err(ProviderError::StreamInterrupted(
            "response stream closed before completion".into(),
        ))
    }
}
