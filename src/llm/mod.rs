//! Generator client abstraction.
//!
//! Provides a unified interface over the supported generative-model
//! providers: Gemini-compatible, `OpenAI`-compatible, and
//! DeepSeek-compatible APIs.
//!
//! # Supported Providers
//!
//! | Provider | Client | Credentials |
//! |----------|--------|-------------|
//! | Gemini | [`GeminiClient`] | `GOOGLE_API_KEY` |
//! | `OpenAI` | [`OpenAiClient`] | `OPENAI_API_KEY` |
//! | DeepSeek | [`DeepSeekClient`] | `DEEPSEEK_API_KEY` |
//!
//! Every provider has a degraded stub mode that returns recognizable
//! `[<Provider> Stub]` placeholder text, so the whole pipeline stays
//! exercisable without network access or credentials.
//!
//! # Retry discipline
//!
//! The generator layer is the only component that retries. On a rate-limit
//! signal the client parses any server-suggested delay, waits
//! `min(delay + 1s, 60s)` (5 s when no delay was suggested), and retries at
//! most once by default. Any other failure falls through to the provider's
//! stub mode.
//!
//! # Usage
//!
//! ```rust,ignore
//! use graphrag::llm::GeneratorService;
//!
//! let service = GeneratorService::new(config.llm.clone());
//! let answer = service.generate("What is long-term care 2.0?", None, None).await?;
//!
//! let mut chunks = service.generate_chunk("stream me").await;
//! while let Some(chunk) = chunks.next().await {
//!     print!("{}", chunk?);
//! }
//! ```

// Allow expect() on static regex patterns - these are guaranteed to compile
#![allow(clippy::expect_used)]

mod deepseek;
mod gemini;
mod openai;

pub use deepseek::DeepSeekClient;
pub use gemini::GeminiClient;
pub use openai::OpenAiClient;

use crate::config::LlmConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use regex::Regex;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, LazyLock, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// A cold, lazily-evaluated sequence of response chunks.
///
/// Backpressure is implicit: the producer advances at the consumer's pull
/// rate, and dropping the consumer cancels the producer.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Trait for generator providers.
#[async_trait]
pub trait Generator: Send + Sync {
    /// The provider name.
    fn name(&self) -> &'static str;

    /// Generates a completion for the given prompt.
    ///
    /// Degrades to the provider's stub mode on upstream failure, so an
    /// `Err` only surfaces for unrecoverable local conditions.
    ///
    /// # Errors
    ///
    /// Returns an error if the completion fails and no stub is possible.
    async fn generate(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String>;

    /// Generates a completion as a stream of text chunks.
    ///
    /// Chunk order is the provider's emission order. On upstream failure
    /// the stream degrades to stub chunks.
    async fn generate_chunk(&self, prompt: &str) -> ChunkStream;
}

/// Maximum wait before a rate-limit retry.
const MAX_RETRY_WAIT: Duration = Duration::from_secs(60);

/// Wait applied when the server suggested no delay.
const DEFAULT_RETRY_WAIT: Duration = Duration::from_secs(5);

static RETRY_IN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"retry in ([0-9.]+)s").expect("static regex: retry hint"));

/// Derives the wait before retrying a rate-limited request.
///
/// Prefers the `Retry-After` header, then a `retry in <n>s` hint in the
/// response body. The result is `suggested + 1s` capped at 60 s, or 5 s
/// when nothing was suggested.
#[must_use]
pub(crate) fn retry_wait(headers: &reqwest::header::HeaderMap, body: &str) -> Duration {
    let suggested = headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<f64>().ok())
        .or_else(|| {
            RETRY_IN_PATTERN
                .captures(body)
                .and_then(|caps| caps.get(1))
                .and_then(|m| m.as_str().parse::<f64>().ok())
        });

    match suggested {
        Some(secs) => Duration::from_secs_f64(secs + 1.0).min(MAX_RETRY_WAIT),
        None => DEFAULT_RETRY_WAIT,
    }
}

/// HTTP client configuration for generator providers.
#[derive(Debug, Clone, Copy)]
pub struct LlmHttpConfig {
    /// Request timeout in milliseconds (0 to disable).
    pub timeout_ms: u64,
    /// Connect timeout in milliseconds (0 to disable).
    pub connect_timeout_ms: u64,
}

impl Default for LlmHttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            connect_timeout_ms: 3_000,
        }
    }
}

impl LlmHttpConfig {
    /// Loads HTTP configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(timeout_ms) = std::env::var("GRAPHRAG_LLM_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.timeout_ms = timeout_ms;
        }
        if let Some(connect_timeout_ms) = std::env::var("GRAPHRAG_LLM_CONNECT_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.connect_timeout_ms = connect_timeout_ms;
        }
        config
    }
}

/// Builds an HTTP client for generator requests with configured timeouts.
#[must_use]
pub fn build_http_client(config: LlmHttpConfig) -> reqwest::Client {
    let mut builder = reqwest::Client::builder();
    if config.timeout_ms > 0 {
        builder = builder.timeout(Duration::from_millis(config.timeout_ms));
    }
    if config.connect_timeout_ms > 0 {
        builder = builder.connect_timeout(Duration::from_millis(config.connect_timeout_ms));
    }

    builder.build().unwrap_or_else(|err| {
        tracing::warn!("failed to build generator HTTP client: {err}");
        reqwest::Client::new()
    })
}

/// Produces the stub completion for a provider.
pub(crate) fn stub_generate(
    label: &str,
    prompt: &str,
    max_tokens: u32,
    temperature: f32,
) -> String {
    format!(
        "[{label} Stub] answer for: {prompt}\n\nStubbed completion \
         (max_tokens={max_tokens}, temperature={temperature})."
    )
}

/// Produces the stub chunk stream for a provider.
pub(crate) fn stub_chunk_stream(label: &'static str, prompt: &str) -> ChunkStream {
    let chunks = vec![
        format!("[{label} Stub] answering"),
        format!("about \"{prompt}\""),
        "first answer fragment".to_string(),
        "second answer fragment".to_string(),
        "answer complete".to_string(),
    ];
    let (tx, rx) = mpsc::channel::<Result<String>>(8);
    tokio::spawn(async move {
        for chunk in chunks {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if tx.send(Ok(format!("{chunk} "))).await.is_err() {
                return;
            }
        }
    });
    Box::pin(ReceiverStream::new(rx))
}

/// Adapts a server-sent-events HTTP response into a [`ChunkStream`].
///
/// `extract` maps each `data:` payload to an optional text chunk; a
/// `[DONE]` payload terminates the stream.
pub(crate) fn sse_chunk_stream<F>(
    provider: &'static str,
    response: reqwest::Response,
    extract: F,
) -> ChunkStream
where
    F: Fn(&str) -> Option<String> + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Result<String>>(16);
    tokio::spawn(async move {
        let mut body = response.bytes_stream();
        let mut buffer = String::new();
        while let Some(next) = body.next().await {
            let bytes = match next {
                Ok(bytes) => bytes,
                Err(e) => {
                    let _ = tx
                        .send(Err(Error::Upstream {
                            provider: provider.to_string(),
                            cause: e.to_string(),
                        }))
                        .await;
                    return;
                },
            };
            buffer.push_str(&String::from_utf8_lossy(&bytes));
            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].trim_end_matches('\r').to_string();
                buffer.drain(..=newline);
                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if data == "[DONE]" {
                    return;
                }
                if let Some(text) = extract(data) {
                    if tx.send(Ok(text)).await.is_err() {
                        return;
                    }
                }
            }
        }
    });
    Box::pin(ReceiverStream::new(rx))
}

/// Provider selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// Gemini-compatible API.
    Gemini,
    /// `OpenAI`-compatible API.
    OpenAi,
    /// DeepSeek-compatible API.
    DeepSeek,
}

impl ProviderKind {
    /// String form used in configuration and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::OpenAi => "openai",
            Self::DeepSeek => "deepseek",
        }
    }

    /// Parses a provider name, case-insensitively.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "gemini" => Some(Self::Gemini),
            "openai" => Some(Self::OpenAi),
            "deepseek" => Some(Self::DeepSeek),
            _ => None,
        }
    }
}

/// Unified generator service with per-provider client instances.
///
/// Clients are created lazily on first use and reused afterwards; provider
/// selection can be switched at runtime.
pub struct GeneratorService {
    config: LlmConfig,
    provider: RwLock<ProviderKind>,
    clients: Mutex<HashMap<ProviderKind, Arc<dyn Generator>>>,
}

impl GeneratorService {
    /// Creates the service from configuration.
    ///
    /// Unknown provider names fall back to Gemini with a warning.
    #[must_use]
    pub fn new(config: LlmConfig) -> Self {
        let provider = ProviderKind::parse(&config.provider).unwrap_or_else(|| {
            tracing::warn!(
                provider = %config.provider,
                "unknown generator provider, defaulting to gemini"
            );
            ProviderKind::Gemini
        });
        tracing::info!(provider = provider.as_str(), "generator service initialized");
        Self {
            config,
            provider: RwLock::new(provider),
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the active provider name.
    #[must_use]
    pub fn provider_name(&self) -> &'static str {
        self.current_provider().as_str()
    }

    /// Registers a pre-built client for a provider.
    ///
    /// Useful for wiring in instrumented or pre-configured clients; the
    /// lazily-created default for that provider is skipped.
    #[must_use]
    pub fn with_client(self, kind: ProviderKind, client: Arc<dyn Generator>) -> Self {
        if let Ok(mut clients) = self.clients.lock() {
            clients.insert(kind, client);
        }
        self
    }

    /// Switches the active provider. Unknown names keep the current one.
    pub fn set_provider(&self, name: &str) {
        match ProviderKind::parse(name) {
            Some(kind) => {
                if let Ok(mut guard) = self.provider.write() {
                    *guard = kind;
                    tracing::info!(provider = kind.as_str(), "generator provider switched");
                }
            },
            None => {
                tracing::warn!(provider = %name, "unknown generator provider, keeping current");
            },
        }
    }

    fn current_provider(&self) -> ProviderKind {
        self.provider
            .read()
            .map(|guard| *guard)
            .unwrap_or(ProviderKind::Gemini)
    }

    /// Returns (creating on first use) the client for the active provider.
    fn client(&self) -> Arc<dyn Generator> {
        let kind = self.current_provider();
        let mut clients = match self.clients.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        clients
            .entry(kind)
            .or_insert_with(|| {
                tracing::debug!(provider = kind.as_str(), "creating generator client");
                match kind {
                    ProviderKind::Gemini => Arc::new(GeminiClient::from_config(&self.config)),
                    ProviderKind::OpenAi => Arc::new(OpenAiClient::from_config(&self.config)),
                    ProviderKind::DeepSeek => Arc::new(DeepSeekClient::from_config(&self.config)),
                }
            })
            .clone()
    }

    /// Generates a completion, applying configured token/temperature
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the active provider fails without a stub path.
    pub async fn generate(
        &self,
        prompt: &str,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Result<String> {
        let max_tokens = max_tokens.unwrap_or(self.config.max_tokens);
        let temperature = temperature.unwrap_or(self.config.temperature);
        self.client().generate(prompt, max_tokens, temperature).await
    }

    /// Generates a completion as a chunk stream.
    pub async fn generate_chunk(&self, prompt: &str) -> ChunkStream {
        self.client().generate_chunk(prompt).await
    }
}
