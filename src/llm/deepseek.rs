//! DeepSeek-compatible generator client.
//!
//! Speaks the `OpenAI`-style chat completions wire format against the
//! DeepSeek endpoint.

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
use serde_json::Value;
use std::time::Duration;

/// DeepSeek generator client.
pub struct DeepSeekClient {
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

impl DeepSeekClient {
    /// Default API endpoint.
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.deepseek.com/v1";

    /// Default model.
    pub const DEFAULT_MODEL: &'static str = "deepseek-chat";

    /// Creates a client from the process environment.
    #[must_use]
    pub fn new() -> Self {
        let api_key = std::env::var("DEEPSEEK_API_KEY")
            .ok()
            .map(SecretString::from);
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
            .deepseek_api_key
            .clone()
            .or_else(|| std::env::var("DEEPSEEK_API_KEY").ok())
            .map(SecretString::from);
        Self {
            api_key,
            endpoint: Self::DEFAULT_ENDPOINT.to_string(),
            model: config.deepseek_model.clone(),
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
            provider: "deepseek".to_string(),
            cause: "DEEPSEEK_API_KEY not configured".to_string(),
        })
    }

    async fn status_error(response: reqwest::Response) -> Error {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let wait = retry_wait(&headers, &body);
            Error::RateLimited {
                provider: "deepseek".to_string(),
                retry_after_secs: wait.as_secs().max(1),
            }
        } else {
            Error::Upstream {
                provider: "deepseek".to_string(),
                cause: format!("API returned status {status}: {body}"),
            }
        }
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .header(
                "Authorization",
                format!("Bearer {}", self.key()?.expose_secret()),
            )
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| request_error("deepseek", &e))?;

        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }
        Ok(response)
    }

    /// Makes a non-streaming request to the chat completions API.
    async fn request(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String> {
        tracing::info!(provider = "deepseek", model = %self.model, "making generator request");

        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": max_tokens,
            "temperature": temperature,
        });
        let response = self.send(&body).await?;
        let parsed: ChatResponse = response.json().await.map_err(|e| Error::Upstream {
            provider: "deepseek".to_string(),
            cause: format!("invalid response body: {e}"),
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| Error::Upstream {
                provider: "deepseek".to_string(),
                cause: "no choices in response".to_string(),
            })
    }

    async fn stream_request(&self, prompt: &str) -> Result<reqwest::Response> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "stream": true,
        });
        self.send(&body).await
    }
}

impl Default for DeepSeekClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Extracts the content delta from one streamed payload.
fn extract_stream_text(data: &str) -> Option<String> {
    let parsed: ChatChunk = serde_json::from_str(data).ok()?;
    let content = parsed.choices.into_iter().next()?.delta.content?;
    if content.is_empty() {
        None
    } else {
        Some(content)
    }
}

#[async_trait]
impl Generator for DeepSeekClient {
    fn name(&self) -> &'static str {
        "deepseek"
    }

    async fn generate(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String> {
        if !self.use_real_api() {
            return Ok(stub_generate("DeepSeek", prompt, max_tokens, temperature));
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
                        provider = "deepseek",
                        wait_secs = retry_after_secs,
                        attempt = attempts,
                        "rate limited, waiting before retry"
                    );
                    tokio::time::sleep(Duration::from_secs(retry_after_secs)).await;
                },
                Err(e) => {
                    tracing::error!(provider = "deepseek", error = %e, "falling back to stub");
                    return Ok(stub_generate("DeepSeek", prompt, max_tokens, temperature));
                },
            }
        }
    }

    async fn generate_chunk(&self, prompt: &str) -> ChunkStream {
        if !self.use_real_api() {
            return stub_chunk_stream("DeepSeek", prompt);
        }

        let mut attempts = 0;
        loop {
            match self.stream_request(prompt).await {
                Ok(response) => {
                    return sse_chunk_stream("deepseek", response, extract_stream_text);
                },
                Err(Error::RateLimited {
                    retry_after_secs, ..
                }) if attempts < self.max_retries => {
                    attempts += 1;
                    tracing::warn!(
                        provider = "deepseek",
                        wait_secs = retry_after_secs,
                        attempt = attempts,
                        "rate limited on stream, waiting before retry"
                    );
                    tokio::time::sleep(Duration::from_secs(retry_after_secs)).await;
                },
                Err(e) => {
                    tracing::error!(provider = "deepseek", error = %e, "stream falling back to stub");
                    return stub_chunk_stream("DeepSeek", prompt);
                },
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    #[allow(dead_code)]
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
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
