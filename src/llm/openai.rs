//! `OpenAI`-compatible generator client.

use super::gemini::request_error;
use super::{
    build_http_client, retry_wait, sse_chunk_stream, stub_chunk_stream, stub_generate,
    ChunkStream, Generator, LlmHttpConfig,
};
use crate::config::LlmConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// `OpenAI` generator client.
///
/// API keys are stored using `SecretString`, which zeroizes memory on drop.
pub struct OpenAiClient {
    /// API key (zeroized on drop).
    api_key: Option<SecretString>,
    /// API endpoint.
    endpoint: String,
    /// Model to use.
    model: String,
    /// Maximum rate-limit retries per request.
    max_retries: u32,
    /// HTTP client.
    client: reqwest::Client,
}

impl OpenAiClient {
    /// Default API endpoint.
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.openai.com/v1";

    /// Default model.
    pub const DEFAULT_MODEL: &'static str = "gpt-4o-mini";

    /// Creates a client from the process environment.
    #[must_use]
    pub fn new() -> Self {
        let api_key = std::env::var("OPENAI_API_KEY").ok().map(SecretString::from);
        Self {
            api_key,
            endpoint: Self::DEFAULT_ENDPOINT.to_string(),
            model: Self::DEFAULT_MODEL.to_string(),
            max_retries: 1,
            client: build_http_client(LlmHttpConfig::from_env()),
        }
    }

    /// Creates a client from configuration.
    #[must_use]
    pub fn from_config(config: &LlmConfig) -> Self {
        let api_key = config
            .openai_api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .map(SecretString::from);
        Self {
            api_key,
            endpoint: Self::DEFAULT_ENDPOINT.to_string(),
            model: config.openai_model.clone(),
            max_retries: config.max_retries,
            client: build_http_client(LlmHttpConfig::from_env()),
        }
    }

    /// Sets the API key.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::from(key.into()));
        self
    }

    /// Clears the API key (forces stub mode).
    #[must_use]
    pub fn without_api_key(mut self) -> Self {
        self.api_key = None;
        self
    }

    /// Sets the API endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets HTTP client timeouts.
    #[must_use]
    pub fn with_http_config(mut self, config: LlmHttpConfig) -> Self {
        self.client = build_http_client(config);
        self
    }

    fn use_real_api(&self) -> bool {
        self.api_key.is_some()
    }

    fn key(&self) -> Result<&SecretString> {
        self.api_key.as_ref().ok_or_else(|| Error::Upstream {
            provider: "openai".to_string(),
            cause: "OPENAI_API_KEY not configured".to_string(),
        })
    }

    async fn status_error(response: reqwest::Response) -> Error {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let wait = retry_wait(&headers, &body);
            Error::RateLimited {
                provider: "openai".to_string(),
                retry_after_secs: wait.as_secs().max(1),
            }
        } else {
            Error::Upstream {
                provider: "openai".to_string(),
                cause: format!("API returned status {status}: {body}"),
            }
        }
    }

    async fn send(&self, request: &ChatCompletionRequest) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .header(
                "Authorization",
                format!("Bearer {}", self.key()?.expose_secret()),
            )
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| request_error("openai", &e))?;

        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }
        Ok(response)
    }

    /// Makes a non-streaming request to the Chat Completions API.
    async fn request(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String> {
        tracing::info!(provider = "openai", model = %self.model, "making generator request");

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens: Some(max_tokens),
            temperature: Some(temperature),
            stream: false,
        };

        let response = self.send(&request).await?;
        let parsed: ChatCompletionResponse = response.json().await.map_err(|e| Error::Upstream {
            provider: "openai".to_string(),
            cause: format!("invalid response body: {e}"),
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| Error::Upstream {
                provider: "openai".to_string(),
                cause: "no choices in response".to_string(),
            })
    }

    async fn stream_request(&self, prompt: &str) -> Result<reqwest::Response> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens: None,
            temperature: None,
            stream: true,
        };
        self.send(&request).await
    }
}

impl Default for OpenAiClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Extracts the content delta from one streamed payload.
fn extract_stream_text(data: &str) -> Option<String> {
    let parsed: ChatCompletionChunk = serde_json::from_str(data).ok()?;
    let content = parsed.choices.into_iter().next()?.delta.content?;
    if content.is_empty() {
        None
    } else {
        Some(content)
    }
}

#[async_trait]
impl Generator for OpenAiClient {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn generate(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String> {
        if !self.use_real_api() {
            return Ok(stub_generate("OpenAI", prompt, max_tokens, temperature));
        }

        let mut attempts = 0;
        loop {
            match self.request(prompt, max_tokens, temperature).await {
                Ok(text) => return Ok(text),
                Err(Error::RateLimited {
                    retry_after_secs, ..
                }) if attempts < self.max_retries => {
                    attempts += 1;
                    tracing::warn!(
                        provider = "openai",
                        wait_secs = retry_after_secs,
                        attempt = attempts,
                        "rate limited, waiting before retry"
                    );
                    tokio::time::sleep(Duration::from_secs(retry_after_secs)).await;
                },
                Err(e) => {
                    tracing::error!(provider = "openai", error = %e, "falling back to stub");
                    return Ok(stub_generate("OpenAI", prompt, max_tokens, temperature));
                },
            }
        }
    }

    async fn generate_chunk(&self, prompt: &str) -> ChunkStream {
        if !self.use_real_api() {
            return stub_chunk_stream("OpenAI", prompt);
        }

        let mut attempts = 0;
        loop {
            match self.stream_request(prompt).await {
                Ok(response) => {
                    return sse_chunk_stream("openai", response, extract_stream_text);
                },
                Err(Error::RateLimited {
                    retry_after_secs, ..
                }) if attempts < self.max_retries => {
                    attempts += 1;
                    tracing::warn!(
                        provider = "openai",
                        wait_secs = retry_after_secs,
                        attempt = attempts,
                        "rate limited on stream, waiting before retry"
                    );
                    tokio::time::sleep(Duration::from_secs(retry_after_secs)).await;
                },
                Err(e) => {
                    tracing::error!(provider = "openai", error = %e, "stream falling back to stub");
                    return stub_chunk_stream("OpenAI", prompt);
                },
            }
        }
    }
}

/// Request to the Chat Completions API.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

/// A message in the chat.
#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

/// Response from the Chat Completions API.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// One streamed payload from the Chat Completions API.
#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}
