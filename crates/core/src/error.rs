//! Error types for the paperchain domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum.

use thiserror::Error;

/// The top-level error type for all pipeline operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Context store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Plan errors ---
    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    // --- Dependency errors ---
    #[error("Missing dependency for stage '{stage}': {artifact} does not exist")]
    MissingDependency { stage: String, artifact: String },

    // --- Document errors ---
    #[error("Conversion failed for '{stage}': {reason}")]
    Conversion { stage: String, reason: String },

    #[error("Compiler invocation failed: {0}")]
    Compile(String),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to read {key}: {reason}")]
    ReadFailed { key: String, reason: String },

    #[error("Failed to write {key}: {reason}")]
    WriteFailed { key: String, reason: String },

    #[error("Artifact is read-only: {0}")]
    ReadOnly(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    #[error("Plan contains no stages")]
    Empty,

    #[error("Invalid stage name '{0}': names must be non-empty and contain no path separators")]
    InvalidName(String),

    #[error("Duplicate stage name: {0}")]
    DuplicateStage(String),

    #[error("Stage '{stage}' references '{dependency}', which does not come before it")]
    ForwardReference { stage: String, dependency: String },

    #[error("Stage '{stage}' references unknown stage '{dependency}'")]
    UnknownDependency { stage: String, dependency: String },

    #[error("Stage '{stage}' uses unknown model '{model}'")]
    UnknownModel { stage: String, model: String },

    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    #[error("Invalid run range: {0}")]
    InvalidRange(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 529,
            message: "Overloaded".into(),
        });
        assert!(err.to_string().contains("529"));
        assert!(err.to_string().contains("Overloaded"));
    }

    #[test]
    fn missing_dependency_names_stage_and_artifact() {
        let err = Error::MissingDependency {
            stage: "body".into(),
            artifact: "intro (response)".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("body"));
        assert!(msg.contains("intro (response)"));
    }

    #[test]
    fn plan_error_converts_into_top_level() {
        let err: Error = PlanError::DuplicateStage("intro".into()).into();
        assert!(matches!(err, Error::Plan(PlanError::DuplicateStage(_))));
    }
}
