//! Configuration management.
//!
//! Configuration resolves in three layers: built-in defaults, then process
//! environment, then an optional TOML file. Credentials therefore follow
//! the precedence *explicit argument > configuration file > process
//! environment*: a key in `graphrag.toml` beats the same key exported in
//! the shell, and a key passed to a client builder beats both.

use crate::llm::{DeepSeekClient, GeminiClient, OpenAiClient};
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "graphrag.toml";

/// Main configuration for the service.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Allowed CORS origins (`*` for any).
    pub cors_origins: Vec<String>,
    /// Shared secret expected on admin endpoints.
    pub api_key: Option<String>,
    /// Header carrying the shared secret.
    pub api_key_header: String,
    /// Generator provider configuration.
    pub llm: LlmConfig,
    /// Graph store configuration.
    pub graph: GraphConfig,
    /// Dimensionality advertised by the vector index.
    pub vector_dimension: usize,
    /// Default `top_k` for queries.
    pub top_k_default: usize,
    /// Prometheus exporter port.
    pub metrics_port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_origins: vec!["*".to_string()],
            api_key: Some("test-api-key".to_string()),
            api_key_header: "x-api-key".to_string(),
            llm: LlmConfig::default(),
            graph: GraphConfig::default(),
            vector_dimension: 768,
            top_k_default: 3,
            metrics_port: 8001,
        }
    }
}

/// Generator provider configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Provider name: `gemini`, `openai`, or `deepseek`.
    pub provider: String,
    /// Default maximum output tokens.
    pub max_tokens: u32,
    /// Default sampling temperature.
    pub temperature: f32,
    /// Maximum rate-limit retries per request.
    pub max_retries: u32,
    /// Gemini credential.
    pub google_api_key: Option<String>,
    /// Gemini model name.
    pub gemini_model: String,
    /// `OpenAI` credential.
    pub openai_api_key: Option<String>,
    /// `OpenAI` model name.
    pub openai_model: String,
    /// DeepSeek credential.
    pub deepseek_api_key: Option<String>,
    /// DeepSeek model name.
    pub deepseek_model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            max_tokens: 2000,
            temperature: 0.7,
            max_retries: 1,
            google_api_key: None,
            gemini_model: GeminiClient::DEFAULT_MODEL.to_string(),
            openai_api_key: None,
            openai_model: OpenAiClient::DEFAULT_MODEL.to_string(),
            deepseek_api_key: None,
            deepseek_model: DeepSeekClient::DEFAULT_MODEL.to_string(),
        }
    }
}

/// Graph store configuration.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Path of the `SQLite` graph database.
    pub db_path: PathBuf,
    /// Maximum entities considered during graph enhancement.
    pub query_max_entities: usize,
    /// Maximum neighbors pulled in per seed entity.
    pub query_max_neighbors: usize,
    /// TTL of composite query results, in seconds.
    pub cache_ttl_secs: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/graph.db"),
            query_max_entities: 5,
            query_max_neighbors: 3,
            cache_ttl_secs: 3600,
        }
    }
}

impl AppConfig {
    /// Loads configuration: defaults, then environment, then the optional
    /// config file (`graphrag.toml` or `$GRAPHRAG_CONFIG`).
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let mut config = Self::default().with_env_overrides();

        let file = std::env::var("GRAPHRAG_CONFIG")
            .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from);
        if file.exists() {
            config = config.with_file(&file)?;
        }

        Ok(config)
    }

    /// Applies settings from a TOML file on top of the current values.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn with_file(mut self, path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::op("read_config_file", e))?;
        let file: ConfigFile =
            toml::from_str(&raw).map_err(|e| Error::op("parse_config_file", e))?;
        tracing::info!(path = %path.display(), "loaded configuration file");

        if let Some(host) = file.host {
            self.host = host;
        }
        if let Some(port) = file.port {
            self.port = port;
        }
        if let Some(origins) = file.cors_origins {
            self.cors_origins = origins;
        }
        if let Some(api_key) = file.api_key {
            self.api_key = Some(api_key);
        }
        if let Some(header) = file.api_key_header {
            self.api_key_header = header;
        }
        if let Some(dimension) = file.vector_dimension {
            self.vector_dimension = dimension;
        }
        if let Some(top_k) = file.top_k_default {
            self.top_k_default = top_k;
        }
        if let Some(port) = file.metrics_port {
            self.metrics_port = port;
        }

        if let Some(llm) = file.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(max_tokens) = llm.max_tokens {
                self.llm.max_tokens = max_tokens;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
            if let Some(key) = llm.google_api_key {
                self.llm.google_api_key = Some(key);
            }
            if let Some(model) = llm.gemini_model {
                self.llm.gemini_model = model;
            }
            if let Some(key) = llm.openai_api_key {
                self.llm.openai_api_key = Some(key);
            }
            if let Some(model) = llm.openai_model {
                self.llm.openai_model = model;
            }
            if let Some(key) = llm.deepseek_api_key {
                self.llm.deepseek_api_key = Some(key);
            }
            if let Some(model) = llm.deepseek_model {
                self.llm.deepseek_model = model;
            }
        }

        if let Some(graph) = file.graph {
            if let Some(db_path) = graph.db_path {
                self.graph.db_path = PathBuf::from(db_path);
            }
            if let Some(max_entities) = graph.query_max_entities {
                self.graph.query_max_entities = max_entities;
            }
            if let Some(max_neighbors) = graph.query_max_neighbors {
                self.graph.query_max_neighbors = max_neighbors;
            }
            if let Some(ttl) = graph.cache_ttl_secs {
                self.graph.cache_ttl_secs = ttl;
            }
        }

        Ok(self)
    }

    /// Applies environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(host) = std::env::var("GRAPHRAG_HOST") {
            self.host = host;
        }
        if let Some(port) = env_parse("GRAPHRAG_PORT") {
            self.port = port;
        }
        if let Ok(api_key) = std::env::var("GRAPHRAG_API_KEY") {
            self.api_key = Some(api_key);
        }
        if let Ok(header) = std::env::var("GRAPHRAG_API_KEY_HEADER") {
            self.api_key_header = header;
        }
        if let Some(port) = env_parse("GRAPHRAG_METRICS_PORT") {
            self.metrics_port = port;
        }
        if let Some(top_k) = env_parse("GRAPHRAG_TOP_K_DEFAULT") {
            self.top_k_default = top_k;
        }

        if let Ok(provider) = std::env::var("GRAPHRAG_LLM_PROVIDER") {
            self.llm.provider = provider;
        }
        if let Some(max_tokens) = env_parse("GRAPHRAG_LLM_MAX_TOKENS") {
            self.llm.max_tokens = max_tokens;
        }
        if let Some(temperature) = env_parse("GRAPHRAG_LLM_TEMPERATURE") {
            self.llm.temperature = temperature;
        }
        if let Ok(key) = std::env::var("GOOGLE_API_KEY") {
            self.llm.google_api_key = Some(key);
        }
        if let Ok(model) = std::env::var("GRAPHRAG_GEMINI_MODEL") {
            self.llm.gemini_model = model;
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.llm.openai_api_key = Some(key);
        }
        if let Ok(key) = std::env::var("DEEPSEEK_API_KEY") {
            self.llm.deepseek_api_key = Some(key);
        }

        if let Ok(db_path) = std::env::var("GRAPHRAG_GRAPH_DB_PATH") {
            self.graph.db_path = PathBuf::from(db_path);
        }
        if let Some(max_entities) = env_parse("GRAPHRAG_GRAPH_MAX_ENTITIES") {
            self.graph.query_max_entities = max_entities;
        }
        if let Some(max_neighbors) = env_parse("GRAPHRAG_GRAPH_MAX_NEIGHBORS") {
            self.graph.query_max_neighbors = max_neighbors;
        }
        if let Some(ttl) = env_parse("GRAPHRAG_GRAPH_CACHE_TTL") {
            self.graph.cache_ttl_secs = ttl;
        }

        self
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// On-disk configuration file shape. Every field is optional.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    host: Option<String>,
    port: Option<u16>,
    cors_origins: Option<Vec<String>>,
    api_key: Option<String>,
    api_key_header: Option<String>,
    vector_dimension: Option<usize>,
    top_k_default: Option<usize>,
    metrics_port: Option<u16>,
    llm: Option<ConfigFileLlm>,
    graph: Option<ConfigFileGraph>,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFileLlm {
    provider: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    max_retries: Option<u32>,
    google_api_key: Option<String>,
    gemini_model: Option<String>,
    openai_api_key: Option<String>,
    openai_model: Option<String>,
    deepseek_api_key: Option<String>,
    deepseek_model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFileGraph {
    db_path: Option<String>,
    query_max_entities: Option<usize>,
    query_max_neighbors: Option<usize>,
    cache_ttl_secs: Option<u64>,
}
