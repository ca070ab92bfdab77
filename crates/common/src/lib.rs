//! LexForge Common Library
//! 
//! Shared code for the LexForge answering pipeline including:
//! - Fragment, citation key, and conversation data model
//! - Error types and handling
//! - Configuration management
//! - Caller identity extraction
//! - Embedding and generation-capability clients
//! - Metrics and observability

pub mod auth;
pub mod config;
pub mod embeddings;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod models;

// Re-export commonly used types
pub use auth::CallerIdentity;
pub use config::AppConfig;
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use llm::ChatModel;
pub use models::{ChatMessage, CitationKey, Fragment, RetrievalMode, Role};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1536;
