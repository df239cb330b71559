//! Provider trait: the abstraction over text-generation backends.
//!
//! A Provider knows how to send a prompt to an LLM and get the generated
//! text back, either as a complete message or as a stream of deltas.
//! Whatever shape the backend answers in, the provider normalizes it to
//! [`ProviderResponse`]: the final text plus token usage.
//!
//! Implementations: Anthropic Messages API, OpenAI-compatible chat completions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::ProviderError;
use crate::message::Message;

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The provider-side model identifier (e.g., "claude-3-7-sonnet-20250219")
    pub model: String,

    /// System instructions first (if any), then the user prompt
    pub messages: Vec<Message>,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Extended reasoning budget; `None` or zero disables reasoning mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<u32>,

    /// Whether to stream the response
    #[serde(default)]
    pub stream: bool,
}

fn default_temperature() -> f32 {
    0.0
}

impl ProviderRequest {
    /// The system instructions, if the first message carries them.
    pub fn system_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == crate::message::Role::System)
            .map(|m| m.content.as_str())
            .filter(|s| !s.is_empty())
    }

    /// Reasoning budget when reasoning mode is active.
    pub fn active_thinking_budget(&self) -> Option<u32> {
        self.thinking_budget.filter(|b| *b > 0)
    }
}

/// A complete (non-streaming) response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated message (final answer text only, never reasoning text)
    pub message: Message,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,

    /// Provider-specific metadata
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Token usage information.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial content delta
    #[serde(default)]
    pub content: Option<String>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,

    /// Usage info (typically only in the final chunk)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// The core Provider trait.
///
/// Every generation backend implements this trait. The generation client
/// calls `complete()` or `stream()` without knowing which provider is
/// being used.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "anthropic", "openai").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ProviderRequest) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Send a request and get a stream of response chunks.
    ///
    /// Default implementation calls `complete()` and wraps the result as a single chunk.
    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>,
        ProviderError,
    > {
        let response = self.complete(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let _ = tx.send(Ok(StreamChunk {
            content: Some(response.message.content),
            done: true,
            usage: response.usage,
        })).await;
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProvider;

    #[async_trait]
    impl Provider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn complete(&self, request: ProviderRequest) -> std::result::Result<ProviderResponse, ProviderError> {
            Ok(ProviderResponse {
                message: Message::assistant("done"),
                usage: Some(Usage::new(10, 2)),
                model: request.model,
                metadata: serde_json::Map::new(),
            })
        }
    }

    fn request(messages: Vec<Message>) -> ProviderRequest {
        ProviderRequest {
            model: "m".into(),
            messages,
            temperature: default_temperature(),
            max_tokens: Some(100),
            thinking_budget: None,
            stream: false,
        }
    }

    #[test]
    fn system_text_skips_empty_instructions() {
        let req = request(vec![Message::system(""), Message::user("hi")]);
        assert!(req.system_text().is_none());

        let req = request(vec![Message::system("be formal"), Message::user("hi")]);
        assert_eq!(req.system_text(), Some("be formal"));
    }

    #[test]
    fn zero_thinking_budget_is_inactive() {
        let mut req = request(vec![Message::user("hi")]);
        req.thinking_budget = Some(0);
        assert!(req.active_thinking_budget().is_none());
        req.thinking_budget = Some(2048);
        assert_eq!(req.active_thinking_budget(), Some(2048));
    }

    #[test]
    fn usage_totals() {
        let usage = Usage::new(120, 30);
        assert_eq!(usage.total_tokens, 150);
    }

    #[tokio::test]
    async fn default_stream_wraps_complete() {
        let provider = FixedProvider;
        let mut rx = provider.stream(request(vec![Message::user("hi")])).await.unwrap();
        let chunk = rx.recv().await.unwrap().unwrap();
        assert!(chunk.done);
        assert_eq!(chunk.content.as_deref(), Some("done"));
        assert_eq!(chunk.usage.unwrap().prompt_tokens, 10);
        assert!(rx.recv().await.is_none());
    }
}
