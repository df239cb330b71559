//! Configuration loading, validation, and management for paperchain.
//!
//! Loads configuration from `~/.paperchain/config.toml` with environment
//! variable overrides, and loads plan files. Validates all settings before
//! the pipeline starts.

pub mod catalog;
pub mod plan;

pub use catalog::{ModelCatalog, ModelSpec};
pub use plan::{ConversionSettings, LoadedPlan, PipelineSettings, PlanFile, load_plan};

use paperchain_core::{PlanError, ProviderKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.paperchain/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key used for any provider without its own key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Where stage artifacts, logs and the cost ledger are written
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Where reference material (literature notes, bibliography) is read from
    #[serde(default = "default_reference_dir")]
    pub reference_dir: PathBuf,

    /// Per-request timeout for generation calls
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Provider-specific configurations, keyed by provider tag
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Model catalog entries layered over the built-in catalog
    #[serde(default = "ModelCatalog::empty")]
    pub models: ModelCatalog,

    /// Document compiler settings
    #[serde(default)]
    pub latex: LatexConfig,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./output")
}
fn default_reference_dir() -> PathBuf {
    PathBuf::from("./lit-context")
}
fn default_request_timeout_secs() -> u64 {
    600
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("output_dir", &self.output_dir)
            .field("reference_dir", &self.reference_dir)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("providers", &self.providers)
            .field("models", &self.models)
            .field("latex", &self.latex)
            .finish()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Override of the provider's base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .finish()
    }
}

/// `[latex]`: the external document compiler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatexConfig {
    /// Typesetting engine
    #[serde(default = "default_engine")]
    pub engine: String,

    /// Bibliography processor run after the first pass
    #[serde(default = "default_bibliography_tool")]
    pub bibliography_tool: String,

    /// Document template containing the `% [input-goes-here]` placeholder;
    /// a minimal article template is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<PathBuf>,

    /// Per-pass timeout
    #[serde(default = "default_pass_timeout_secs")]
    pub pass_timeout_secs: u64,
}

fn default_engine() -> String {
    "pdflatex".into()
}
fn default_bibliography_tool() -> String {
    "biber".into()
}
fn default_pass_timeout_secs() -> u64 {
    120
}

impl Default for LatexConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            bibliography_tool: default_bibliography_tool(),
            template: None,
            pass_timeout_secs: default_pass_timeout_secs(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.paperchain/config.toml).
    ///
    /// Also checks environment variables:
    /// - `ANTHROPIC_API_KEY`, `OPENAI_API_KEY` (per provider)
    /// - `PAPERCHAIN_API_KEY` (fallback for any provider)
    /// - `PAPERCHAIN_OUTPUT_DIR`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        Self::load_with_env(&config_path)
    }

    /// Load from a specific path, then apply environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through a lookup function.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = var("PAPERCHAIN_API_KEY");
        }

        for (kind, name) in [
            (ProviderKind::Anthropic, "ANTHROPIC_API_KEY"),
            (ProviderKind::OpenAi, "OPENAI_API_KEY"),
        ] {
            let entry = self.providers.entry(kind.as_str().to_string()).or_default();
            if entry.api_key.is_none() {
                entry.api_key = var(name);
            }
        }

        if let Some(dir) = var("PAPERCHAIN_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".paperchain")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "request_timeout_secs must be > 0".into(),
            ));
        }

        for (alias, spec) in self.models.iter() {
            if spec.max_output_tokens == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "models.{alias}: max_output_tokens must be > 0"
                )));
            }
            if spec.input_per_m < 0.0 || spec.output_per_m < 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "models.{alias}: prices must not be negative"
                )));
            }
        }

        if self.latex.engine.trim().is_empty() {
            return Err(ConfigError::ValidationError("latex.engine must be set".into()));
        }

        Ok(())
    }

    /// The effective model catalog: built-in entries plus `[models]`.
    pub fn catalog(&self) -> ModelCatalog {
        ModelCatalog::with_defaults().merged(&self.models)
    }

    /// The API key for a provider, falling back to the shared key.
    pub fn api_key_for(&self, kind: ProviderKind) -> Option<String> {
        self.providers
            .get(kind.as_str())
            .and_then(|p| p.api_key.clone())
            .or_else(|| self.api_key.clone())
            .filter(|k| !k.trim().is_empty())
    }

    /// The configured base URL override for a provider.
    pub fn api_url_for(&self, kind: ProviderKind) -> Option<String> {
        self.providers.get(kind.as_str()).and_then(|p| p.api_url.clone())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            output_dir: default_output_dir(),
            reference_dir: default_reference_dir(),
            request_timeout_secs: default_request_timeout_secs(),
            providers: HashMap::new(),
            models: ModelCatalog::empty(),
            latex: LatexConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Invalid plan: {0}")]
    Plan(#[from] PlanError),
}
