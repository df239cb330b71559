//! Plan files: the ordered stage list plus run-wide defaults.
//!
//! ```toml
//! [config]
//! temperature = 0.0
//! max_tokens = 8192
//! thinking_budget = 0
//! system_prompt = "You are a finance professor..."
//! convert_to_document = true
//! run_range = { start = 1, end = 3 }
//!
//! [config.conversion]
//! model = "haiku"
//! fallback_model = "sonnet"
//!
//! [[stages]]
//! name = "intro"
//! model = "sonnet"
//! instructions = "Write the introduction."
//! references = ["lit-summary.md"]
//! ```
//!
//! Loading resolves every per-stage override against `[config]` and checks
//! the plan against the model catalog, so an invalid plan fails before any
//! stage runs.

use paperchain_core::{ContextScope, Plan, PlanError, RunRange, Stage};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::ConfigError;
use crate::catalog::ModelCatalog;

/// The plan file as written on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanFile {
    #[serde(default)]
    pub config: PlanDefaults,

    #[serde(default, alias = "prompts")]
    pub stages: Vec<StageDef>,
}

/// `[config]`: defaults that apply to every stage unless overridden.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanDefaults {
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default)]
    pub thinking_budget: u32,

    #[serde(default = "default_true")]
    pub use_system_prompt: bool,

    #[serde(default)]
    pub system_prompt: String,

    #[serde(default, alias = "convert_all_latex")]
    pub convert_to_document: bool,

    #[serde(default)]
    pub continue_on_failure: bool,

    #[serde(default)]
    pub run_range: RunRange,

    #[serde(default)]
    pub conversion: ConversionSettings,
}

fn default_temperature() -> f32 {
    0.0
}
fn default_max_tokens() -> u32 {
    8192
}
fn default_true() -> bool {
    true
}

impl Default for PlanDefaults {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            thinking_budget: 0,
            use_system_prompt: true,
            system_prompt: String::new(),
            convert_to_document: false,
            continue_on_failure: false,
            run_range: RunRange::default(),
            conversion: ConversionSettings::default(),
        }
    }
}

/// `[config.conversion]`: how responses become document markup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionSettings {
    /// Model used for the first conversion attempt
    #[serde(default = "default_conversion_model")]
    pub model: String,

    /// Model used for the single retry after a failed compile
    #[serde(default = "default_fallback_model")]
    pub fallback_model: Option<String>,

    /// Paragraphs per chunk when the text has no headings
    #[serde(default = "default_paragraphs_per_chunk")]
    pub paragraphs_per_chunk: usize,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default)]
    pub temperature: f32,

    /// Chunk conversions allowed in flight at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Reference document holding bibliography entries; used for stages
    /// that include reference material
    #[serde(default = "default_bibliography")]
    pub bibliography: Option<String>,
}

fn default_conversion_model() -> String {
    "haiku".into()
}
fn default_fallback_model() -> Option<String> {
    Some("sonnet".into())
}
fn default_paragraphs_per_chunk() -> usize {
    5
}
fn default_concurrency() -> usize {
    1
}
fn default_bibliography() -> Option<String> {
    Some("bibtex-all.bib".into())
}

impl Default for ConversionSettings {
    fn default() -> Self {
        Self {
            model: default_conversion_model(),
            fallback_model: default_fallback_model(),
            paragraphs_per_chunk: default_paragraphs_per_chunk(),
            max_tokens: default_max_tokens(),
            temperature: 0.0,
            concurrency: default_concurrency(),
            bibliography: default_bibliography(),
        }
    }
}

/// One `[[stages]]` entry. Unset fields inherit from `[config]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDef {
    pub name: String,

    pub instructions: String,

    #[serde(alias = "model_name")]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_system_prompt: Option<bool>,

    /// Include reference material; defaults to true when `references` is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_references: Option<bool>,

    #[serde(default, alias = "lit_files", skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,

    /// Restrict context to these earlier stages (default: all earlier stages)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<String>>,

    /// Earlier stages whose converted documents are added as context
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub documents: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub convert: Option<bool>,

    #[serde(default)]
    pub full_document: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_on_failure: Option<bool>,
}

/// Run-wide settings handed to the scheduler at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub system_prompt: String,
    pub continue_on_failure: bool,
    pub run_range: RunRange,
    pub conversion: ConversionSettings,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            continue_on_failure: false,
            run_range: RunRange::default(),
            conversion: ConversionSettings::default(),
        }
    }
}

/// A loaded, validated plan.
#[derive(Debug, Clone)]
pub struct LoadedPlan {
    pub plan: Plan,
    pub settings: PipelineSettings,
}

impl PlanFile {
    /// Parse a plan from TOML text.
    pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Read a plan file. A missing plan is a configuration error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::parse(&content, path)
    }

    /// Resolve per-stage overrides and validate against the catalog.
    pub fn resolve(self, catalog: &ModelCatalog) -> Result<LoadedPlan, ConfigError> {
        let mut defaults = self.config;
        validate_defaults(&defaults)?;
        defaults.conversion.fallback_model = defaults
            .conversion
            .fallback_model
            .filter(|m| !m.trim().is_empty());

        for model in std::iter::once(&defaults.conversion.model)
            .chain(defaults.conversion.fallback_model.iter())
        {
            if !catalog.contains(model) {
                return Err(ConfigError::ValidationError(format!(
                    "conversion model '{model}' is not in the model catalog"
                )));
            }
        }

        let mut stages = Vec::with_capacity(self.stages.len());
        for def in self.stages {
            if !catalog.contains(&def.model) {
                return Err(PlanError::UnknownModel {
                    stage: def.name,
                    model: def.model,
                }
                .into());
            }

            let temperature = def.temperature.unwrap_or(defaults.temperature);
            if !(0.0..=2.0).contains(&temperature) {
                return Err(ConfigError::ValidationError(format!(
                    "stage '{}': temperature must be between 0.0 and 2.0",
                    def.name
                )));
            }

            stages.push(Stage {
                include_reference_material: def
                    .include_references
                    .unwrap_or(!def.references.is_empty()),
                references: def.references,
                max_output_tokens: def.max_tokens.unwrap_or(defaults.max_tokens),
                thinking_budget: def.thinking_budget.unwrap_or(defaults.thinking_budget),
                temperature,
                use_system_instructions: def.use_system_prompt.unwrap_or(defaults.use_system_prompt),
                context: match def.depends_on {
                    Some(names) => ContextScope::Only(names),
                    None => ContextScope::AllPrior,
                },
                document_context: def.documents,
                convert: def.convert.unwrap_or(defaults.convert_to_document) || def.full_document,
                full_document: def.full_document,
                continue_on_failure: def.continue_on_failure,
                name: def.name,
                instructions: def.instructions,
                model: def.model,
            });
        }

        let plan = Plan::new(stages)?;
        plan.resolve_range(&defaults.run_range)?;

        Ok(LoadedPlan {
            plan,
            settings: PipelineSettings {
                system_prompt: defaults.system_prompt,
                continue_on_failure: defaults.continue_on_failure,
                run_range: defaults.run_range,
                conversion: defaults.conversion,
            },
        })
    }
}

/// Load, resolve and validate a plan file in one step.
pub fn load_plan(path: &Path, catalog: &ModelCatalog) -> Result<LoadedPlan, ConfigError> {
    let loaded = PlanFile::load(path)?.resolve(catalog)?;
    tracing::info!(
        path = %path.display(),
        stages = loaded.plan.len(),
        "Plan loaded"
    );
    Ok(loaded)
}

fn validate_defaults(defaults: &PlanDefaults) -> Result<(), ConfigError> {
    if !(0.0..=2.0).contains(&defaults.temperature) {
        return Err(ConfigError::ValidationError(
            "temperature must be between 0.0 and 2.0".into(),
        ));
    }
    if defaults.max_tokens == 0 {
        return Err(ConfigError::ValidationError("max_tokens must be > 0".into()));
    }
    if defaults.conversion.paragraphs_per_chunk == 0 {
        return Err(ConfigError::ValidationError(
            "conversion.paragraphs_per_chunk must be > 0".into(),
        ));
    }
    if defaults.conversion.concurrency == 0 {
        return Err(ConfigError::ValidationError(
            "conversion.concurrency must be > 0".into(),
        ));
    }
    Ok(())
}
