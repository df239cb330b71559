//! Text-generation provider implementations for paperchain.
//!
//! All providers implement the `paperchain_core::Provider` trait and return
//! the same result shape: final answer text plus token usage. The router
//! selects a provider by the provider tag of a catalog model.

pub mod anthropic;
pub mod openai_compat;
pub mod router;
mod sse;

pub use anthropic::AnthropicProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use router::{ProviderRouter, build_from_config};

use paperchain_core::ProviderError;

/// Map a non-200 HTTP status to a provider error.
pub(crate) fn status_error(provider: &str, status: u16, body: String) -> ProviderError {
    match status {
        429 => ProviderError::RateLimited {
            retry_after_secs: 5,
        },
        401 | 403 => ProviderError::AuthenticationFailed(format!(
            "{provider} rejected the API key (status {status})"
        )),
        404 => ProviderError::ModelNotFound(body),
        _ => {
            tracing::warn!(provider, status, body = %body, "Provider returned error");
            ProviderError::ApiError {
                status_code: status,
                message: body,
            }
        }
    }
}
