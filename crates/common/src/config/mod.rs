//! Configuration management for LexForge services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values
//!
//! Behavioural switches (agentic planning, access enforcement) live here as
//! plain values and are handed to components at call time.

use crate::models::RetrievalMode;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Hard ceiling for sub-queries in one agentic plan
pub const MAX_SUBQUERIES_HARD_LIMIT: usize = 20;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Fragment index configuration
    pub search: SearchConfig,

    /// Generation capability configuration
    pub llm: LlmConfig,

    /// Embedding service configuration
    pub embedding: EmbeddingConfig,

    /// Retrieval defaults (overridable per request)
    pub retrieval: RetrievalConfig,

    /// Access control configuration
    pub access: AccessConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Whole-request timeout in seconds, streaming included
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    pub shutdown_timeout_secs: u64,
}

/// Which fragment index implementation to run against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchBackend {
    /// Remote search service over HTTP
    Http,
    /// In-process index, optionally seeded from a JSON file
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SearchConfig {
    pub backend: SearchBackend,

    /// Search service base URL
    pub endpoint: String,

    /// Index name
    pub index: String,

    /// API key for the search service
    pub api_key: Option<String>,

    /// REST API version
    pub api_version: String,

    /// Semantic ranker configuration name
    pub semantic_configuration: String,

    /// Vector fields queried for vector and hybrid modes
    pub vector_fields: Vec<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// JSON array of fragments loaded by the memory backend
    pub seed_file: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LlmConfig {
    /// OpenAI-compatible API base URL
    pub endpoint: String,

    /// API key
    pub api_key: Option<String>,

    /// Model used for answer generation
    pub chat_model: String,

    /// Model used for query planning
    pub planner_model: String,

    /// Default sampling temperature
    pub temperature: f32,

    /// Maximum tokens in a generated answer
    pub max_response_tokens: u32,

    /// Maximum tokens in a planner reply
    pub max_planner_tokens: u32,

    /// Token budget for conversation history sent to the model
    pub history_token_budget: usize,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, mock
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    pub model: String,

    /// Embedding dimension
    pub dimension: usize,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Default retrieval mode
    pub mode: RetrievalMode,

    /// Semantic ranking on by default
    pub semantic_ranking: bool,

    /// Default result cap per query
    pub top: usize,

    /// Agentic multi-query planning on by default
    pub agentic: bool,

    /// Default sub-query budget for agentic plans
    pub max_subqueries: usize,

    /// Upper bound on reasoning calls per plan
    pub max_planning_rounds: usize,

    /// Deadline for one batch of concurrent sub-queries, in seconds
    pub batch_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Restrict fragments to the caller's group claims
    pub enforce_access_control: bool,

    /// Roles allowed to see the thought-process trace
    pub privileged_roles: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    pub log_level: String,

    /// Enable JSON logging
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    pub metrics_port: u16,

    /// Service name for tracing
    pub service_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_secs: 120,
            shutdown_timeout_secs: 30,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            backend: SearchBackend::Memory,
            endpoint: "http://localhost:7700".to_string(),
            index: "legal-fragments".to_string(),
            api_key: None,
            api_version: "2024-07-01".to_string(),
            semantic_configuration: "default".to_string(),
            vector_fields: vec!["embedding".to_string()],
            timeout_secs: 15,
            seed_file: None,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            api_key: None,
            chat_model: "gpt-4o-mini".to_string(),
            planner_model: "gpt-4o-mini".to_string(),
            temperature: 0.3,
            max_response_tokens: 1024,
            max_planner_tokens: 512,
            history_token_budget: 4000,
            timeout_secs: 120,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            api_key: None,
            api_base: None,
            model: crate::DEFAULT_EMBEDDING_MODEL.to_string(),
            dimension: crate::DEFAULT_EMBEDDING_DIMENSION,
            timeout_secs: 30,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            mode: RetrievalMode::Hybrid,
            semantic_ranking: true,
            top: 5,
            agentic: false,
            max_subqueries: 5,
            max_planning_rounds: 3,
            batch_timeout_secs: 20,
        }
    }
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            enforce_access_control: true,
            privileged_roles: vec!["admin".to_string(), "thought-process".to_string()],
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logging: true,
            metrics_port: 9090,
            service_name: "lexforge".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__RETRIEVAL__TOP=8
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("search.vector_fields")
                    .with_list_parse_key("access.privileged_roles")
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}

impl RetrievalConfig {
    /// Per-batch deadline for concurrent sub-queries
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }
}
