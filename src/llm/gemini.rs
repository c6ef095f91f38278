//! Gemini-compatible generator client.

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

/// Gemini generator client.
///
/// API keys are stored using `SecretString`, which zeroizes memory on drop.
/// Without a key the client runs in stub mode and returns recognizable
/// placeholder text.
pub struct GeminiClient {
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

impl GeminiClient {
    /// Default API endpoint.
    pub const DEFAULT_ENDPOINT: &'static str = "https://generativelanguage.googleapis.com/v1beta";

    /// Default model.
    pub const DEFAULT_MODEL: &'static str = "gemini-2.0-flash";

    /// Creates a client from the process environment.
    #[must_use]
    pub fn new() -> Self {
        let api_key = std::env::var("GOOGLE_API_KEY").ok().map(SecretString::from);
        Self {
            api_key,
            endpoint: Self::DEFAULT_ENDPOINT.to_string(),
            model: Self::DEFAULT_MODEL.to_string(),
            max_retries: 1,
            client: build_http_client(LlmHttpConfig::from_env()),
        }
    }

    /// Creates a client from configuration.
    ///
    /// The configuration value takes precedence over the process
    /// environment; an explicit [`Self::with_api_key`] beats both.
    #[must_use]
    pub fn from_config(config: &LlmConfig) -> Self {
        let api_key = config
            .google_api_key
            .clone()
            .or_else(|| std::env::var("GOOGLE_API_KEY").ok())
            .map(SecretString::from);
        Self {
            api_key,
            endpoint: Self::DEFAULT_ENDPOINT.to_string(),
            model: config.gemini_model.clone(),
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
            provider: "gemini".to_string(),
            cause: "GOOGLE_API_KEY not configured".to_string(),
        })
    }

    /// Turns an HTTP error status into the matching error kind.
    async fn status_error(response: reqwest::Response) -> Error {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let wait = retry_wait(&headers, &body);
            Error::RateLimited {
                provider: "gemini".to_string(),
                retry_after_secs: wait.as_secs().max(1),
            }
        } else {
            Error::Upstream {
                provider: "gemini".to_string(),
                cause: format!("API returned status {status}: {body}"),
            }
        }
    }

    /// Makes a non-streaming request to the API.
    async fn request(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String> {
        tracing::info!(provider = "gemini", model = %self.model, "making generator request");

        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);
        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part::text(prompt.to_string())],
            }],
            generation_config: Some(GenerationConfig {
                max_output_tokens: max_tokens,
                temperature,
            }),
        };

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.key()?.expose_secret())])
            .json(&request)
            .send()
            .await
            .map_err(|e| request_error("gemini", &e))?;

        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }

        let parsed: GenerateContentResponse = response.json().await.map_err(|e| Error::Upstream {
            provider: "gemini".to_string(),
            cause: format!("invalid response body: {e}"),
        })?;

        parsed
            .candidates
            .first()
            .map(|candidate| {
                candidate
                    .content
                    .parts
                    .iter()
                    .filter_map(|part| part.text.clone())
                    .collect::<String>()
            })
            .filter(|text| !text.is_empty())
            .ok_or_else(|| Error::Upstream {
                provider: "gemini".to_string(),
                cause: "no candidates in response".to_string(),
            })
    }

    /// Opens a streaming request to the API.
    async fn stream_request(&self, prompt: &str) -> Result<reqwest::Response> {
        let url = format!("{}/models/{}:streamGenerateContent", self.endpoint, self.model);
        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part::text(prompt.to_string())],
            }],
            generation_config: None,
        };

        let response = self
            .client
            .post(&url)
            .query(&[("alt", "sse"), ("key", self.key()?.expose_secret())])
            .json(&request)
            .send()
            .await
            .map_err(|e| request_error("gemini", &e))?;

        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }
        Ok(response)
    }
}

impl Default for GeminiClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps a transport-level reqwest error to an upstream error with a kind.
pub(super) fn request_error(provider: &str, e: &reqwest::Error) -> Error {
    let error_kind = if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connect"
    } else if e.is_request() {
        "request"
    } else {
        "unknown"
    };
    tracing::error!(
        provider = provider,
        error = %e,
        error_kind = error_kind,
        "generator request failed"
    );
    Error::Upstream {
        provider: provider.to_string(),
        cause: format!("{error_kind} error: {e}"),
    }
}

/// Extracts the text delta from one streamed payload.
fn extract_stream_text(data: &str) -> Option<String> {
    let parsed: GenerateContentResponse = serde_json::from_str(data).ok()?;
    let text: String = parsed
        .candidates
        .first()?
        .content
        .parts
        .iter()
        .filter_map(|part| part.text.clone())
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[async_trait]
impl Generator for GeminiClient {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn generate(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String> {
        if !self.use_real_api() {
            return Ok(stub_generate("Gemini", prompt, max_tokens, temperature));
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
                        provider = "gemini",
                        wait_secs = retry_after_secs,
                        attempt = attempts,
                        "rate limited, waiting before retry"
                    );
                    tokio::time::sleep(Duration::from_secs(retry_after_secs)).await;
                },
                Err(e) => {
                    tracing::error!(provider = "gemini", error = %e, "falling back to stub");
                    return Ok(stub_generate("Gemini", prompt, max_tokens, temperature));
                },
            }
        }
    }

    async fn generate_chunk(&self, prompt: &str) -> ChunkStream {
        if !self.use_real_api() {
            return stub_chunk_stream("Gemini", prompt);
        }

        let mut attempts = 0;
        loop {
            match self.stream_request(prompt).await {
                Ok(response) => {
                    return sse_chunk_stream("gemini", response, extract_stream_text);
                },
                Err(Error::RateLimited {
                    retry_after_secs, ..
                }) if attempts < self.max_retries => {
                    attempts += 1;
                    tracing::warn!(
                        provider = "gemini",
                        wait_secs = retry_after_secs,
                        attempt = attempts,
                        "rate limited on stream, waiting before retry"
                    );
                    tokio::time::sleep(Duration::from_secs(retry_after_secs)).await;
                },
                Err(e) => {
                    tracing::error!(provider = "gemini", error = %e, "stream falling back to stub");
                    return stub_chunk_stream("Gemini", prompt);
                },
            }
        }
    }
}

/// Request body for `generateContent`.
#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

impl Part {
    fn text(text: String) -> Self {
        Self { text: Some(text) }
    }
}

/// Response body for `generateContent` (and each streamed payload).
#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default = "Content::empty")]
    content: Content,
}

impl Content {
    fn empty() -> Self {
        Self { parts: Vec::new() }
    }
}
