//! Error types for LexForge services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for each pipeline failure mode
//! - HTTP status code mapping
//! - Structured error responses
//! - Error codes for client handling
//!
//! Only a subset of these conditions terminates a request. Absorbed
//! conditions (hydration failures, citation mismatches, single sub-query
//! failures) are recorded in the answer trace instead of being returned.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Request errors (1xxx)
    ValidationError,
    InvalidQuery,

    // Authentication errors (2xxx)
    Unauthorized,

    // Retrieval errors (3xxx)
    RetrievalUnavailable,
    HydrationFailed,

    // Orchestration errors (4xxx)
    PlanningFailed,

    // Generation errors (5xxx)
    GenerationFailed,
    CitationMismatch,

    // External service errors (8xxx)
    UpstreamError,
    EmbeddingError,
    Timeout,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,
            ErrorCode::InvalidQuery => 1002,

            ErrorCode::Unauthorized => 2001,

            ErrorCode::RetrievalUnavailable => 3001,
            ErrorCode::HydrationFailed => 3002,

            ErrorCode::PlanningFailed => 4001,

            ErrorCode::GenerationFailed => 5001,
            ErrorCode::CitationMismatch => 5002,

            ErrorCode::UpstreamError => 8001,
            ErrorCode::EmbeddingError => 8002,
            ErrorCode::Timeout => 8003,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Request errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>
    },

    #[error("Invalid query: {message}")]
    InvalidQuery { message: String },

    // Authentication errors
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    // Retrieval errors
    #[error("Retrieval unavailable: {message}")]
    RetrievalUnavailable { message: String },

    #[error("Hydration failed for fragment {id}: {message}")]
    HydrationFailed { id: String, message: String },

    // Orchestration errors
    #[error("Planning failed: {message}")]
    PlanningFailed { message: String },

    // Generation errors
    #[error("Generation failed: {message}")]
    GenerationFailed { message: String },

    #[error("Citation mismatch: {marker}")]
    CitationMismatch { marker: String },

    // External service errors
    #[error("Embedding service error: {message}")]
    EmbeddingError { message: String },

    #[error("Request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::InvalidQuery { .. } => ErrorCode::InvalidQuery,
            AppError::Unauthorized { .. } => ErrorCode::Unauthorized,
            AppError::RetrievalUnavailable { .. } => ErrorCode::RetrievalUnavailable,
            AppError::HydrationFailed { .. } => ErrorCode::HydrationFailed,
            AppError::PlanningFailed { .. } => ErrorCode::PlanningFailed,
            AppError::GenerationFailed { .. } => ErrorCode::GenerationFailed,
            AppError::CitationMismatch { .. } => ErrorCode::CitationMismatch,
            AppError::EmbeddingError { .. } => ErrorCode::EmbeddingError,
            AppError::Timeout { .. } => ErrorCode::Timeout,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. } |
            AppError::InvalidQuery { .. } => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            AppError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,

            // 500 Internal Server Error
            AppError::HydrationFailed { .. } |
            AppError::CitationMismatch { .. } |
            AppError::Internal { .. } |
            AppError::Configuration { .. } |
            AppError::Serialization(_) |
            AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::PlanningFailed { .. } |
            AppError::GenerationFailed { .. } |
            AppError::EmbeddingError { .. } |
            AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AppError::RetrievalUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,

            // 504 Gateway Timeout
            AppError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Whether this condition ends the request.
    ///
    /// `HydrationFailed` and `CitationMismatch` are absorbed by the pipeline
    /// and only ever appear as trace warnings.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            AppError::HydrationFailed { .. } | AppError::CitationMismatch { .. }
        )
    }

    /// Whether a caller may reasonably retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::RetrievalUnavailable { .. }
                | AppError::PlanningFailed { .. }
                | AppError::GenerationFailed { .. }
                | AppError::HttpClient(_)
                | AppError::Timeout { .. }
        )
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ErrorResponse {
    /// Build the wire representation of an error
    pub fn from_error(err: &AppError) -> Self {
        let field = match err {
            AppError::Validation { field, .. } => field.clone(),
            _ => None,
        };

        Self {
            error: ErrorDetails {
                code: err.code(),
                message: err.to_string(),
                retryable: err.is_retryable(),
                field,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %self,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %self,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        (status, Json(ErrorResponse::from_error(&self))).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string()
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}
