//! OpenAI-compatible provider implementation.
//!
//! Works with OpenAI and any endpoint exposing `/chat/completions`.
//!
//! Reasoning-family models (`o1`, `o3`, `o4`...) differ from chat models:
//! they take `max_completion_tokens` instead of `max_tokens`, reject a
//! sampling temperature, and receive system instructions folded into the
//! user turn. The adapter hides those differences from callers.

use async_trait::async_trait;
use futures::StreamExt;
use paperchain_core::error::ProviderError;
use paperchain_core::message::{Message, Role};
use paperchain_core::provider::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace};

use crate::sse::{SseLines, data_payload};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// An OpenAI-compatible text-generation provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: build_client(DEFAULT_TIMEOUT),
        }
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Replace the HTTP timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = build_client(timeout);
        self
    }

    /// Whether a model belongs to the reasoning family.
    fn is_reasoning_model(model: &str) -> bool {
        let bare = model.rsplit('/').next().unwrap_or(model);
        ["o1", "o3", "o4"].iter().any(|prefix| {
            bare == *prefix || bare.starts_with(&format!("{prefix}-"))
        })
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message], fold_system: bool) -> Vec<ApiMessage> {
        if fold_system {
            let system: Vec<&str> = messages
                .iter()
                .filter(|m| m.role == Role::System && !m.content.is_empty())
                .map(|m| m.content.as_str())
                .collect();
            if !system.is_empty() {
                let user: Vec<&str> = messages
                    .iter()
                    .filter(|m| m.role == Role::User)
                    .map(|m| m.content.as_str())
                    .collect();
                return vec![ApiMessage {
                    role: "user".into(),
                    content: Some(format!(
                        "<system>\n{}\n</system>\n\n<user>\n{}\n</user>",
                        system.join("\n\n"),
                        user.join("\n\n")
                    )),
                }];
            }
        }

        messages
            .iter()
            .filter(|m| !(m.role == Role::System && m.content.is_empty()))
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "system".into(),
                },
                content: Some(m.content.clone()),
            })
            .collect()
    }

    /// Build the chat-completions request body.
    fn build_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let reasoning = Self::is_reasoning_model(&request.model);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages, reasoning),
            "stream": stream,
        });

        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }

        if reasoning {
            if let Some(max_tokens) = request.max_tokens {
                body["max_completion_tokens"] = serde_json::json!(max_tokens);
            }
        } else {
            body["temperature"] = serde_json::json!(request.temperature);
            if let Some(max_tokens) = request.max_tokens {
                body["max_tokens"] = serde_json::json!(max_tokens);
            }
        }

        body
    }

    async fn send(&self, body: &serde_json::Value, stream: bool) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");
        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder.json(body).send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(e.to_string())
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            return Err(crate::status_error(&self.name, status, error_body));
        }
        Ok(response)
    }

    fn response_to_provider_response(api_response: ApiResponse) -> Result<ProviderResponse, ProviderError> {
        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::MalformedResponse("No choices in response".into()))?;

        let usage = api_response
            .usage
            .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens));

        let mut metadata = serde_json::Map::new();
        if let Some(reason) = choice.finish_reason {
            metadata.insert("finish_reason".into(), serde_json::json!(reason));
        }

        Ok(ProviderResponse {
            message: Message::assistant(choice.message.content.unwrap_or_default()),
            usage,
            model: api_response.model,
            metadata,
        })
    }
}

fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

#[async_trait]
impl paperchain_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let body = Self::build_body(&request, false);
        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let response = self.send(&body, false).await?;
        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(format!("Failed to parse response: {e}")))?;

        Self::response_to_provider_response(api_response)
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>,
        ProviderError,
    > {
        let body = Self::build_body(&request, true);
        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let response = self.send(&body, true).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider_name = self.name.clone();

        // Spawn task to read the SSE byte stream and parse chunks
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut lines = SseLines::default();
            let mut decoder = StreamDecoder::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                for line in lines.push(&bytes) {
                    let Some(item) = decoder.decode_line(&line, &provider_name) else {
                        continue;
                    };
                    let finished = matches!(&item, Ok(chunk) if chunk.done);
                    if tx.send(item).await.is_err() || finished {
                        return;
                    }
                }
            }

            let _ = tx.send(decoder.finish()).await;
        });

        Ok(rx)
    }
}

/// Incremental decoder for chat-completion SSE chunks.
#[derive(Debug, Default)]
struct StreamDecoder {
    usage: Option<Usage>,
    finish_reason: Option<String>,
}

impl StreamDecoder {
    fn decode_line(&mut self, line: &str, provider: &str) -> Option<Result<StreamChunk, ProviderError>> {
        let data = data_payload(line)?;

        // "[DONE]" signals end of stream
        if data == "[DONE]" {
            return Some(Ok(self.done_chunk()));
        }

        match serde_json::from_str::<StreamResponse>(data) {
            Ok(stream_resp) => {
                if let Some(usage) = stream_resp.usage {
                    self.usage = Some(Usage::new(usage.prompt_tokens, usage.completion_tokens));
                }
                let choice = stream_resp.choices.into_iter().next()?;
                if let Some(reason) = choice.finish_reason {
                    self.finish_reason = Some(reason);
                }
                choice.delta.content.filter(|c| !c.is_empty()).map(|content| {
                    Ok(StreamChunk {
                        content: Some(content),
                        done: false,
                        usage: None,
                    })
                })
            }
            Err(e) => {
                trace!(provider = %provider, data = %data, error = %e, "Ignoring unparseable SSE chunk");
                None
            }
        }
    }

    fn done_chunk(&self) -> StreamChunk {
        StreamChunk {
            content: None,
            done: true,
            usage: self.usage.clone(),
        }
    }

    /// Outcome when the byte stream closes without `[DONE]`: complete only
    /// if the model already reported why it stopped.
    fn finish(&self) -> Result<StreamChunk, ProviderError> {
        if self.finish_reason.is_some() {
            Ok(self.done_chunk())
        } else {
            Err(ProviderError::StreamInterrupted(
                "stream ended before completion".into(),
            ))
        }
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}
