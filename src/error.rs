//! Error types for the knowledge-triple quality engine
//!
//! Structured errors via thiserror. Each variant maps onto one class of the
//! failure taxonomy the HTTP layer reports to callers.

use axum::http::StatusCode;
use thiserror::Error;

/// Main error type for quality engine operations
#[derive(Error, Debug)]
pub enum QualityError {
    /// Triple, job or other entity is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed or out-of-range input, rejected before any mutation
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Database unreachable (read paths substitute demo data)
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Insight provider unreachable or returned garbage
    #[error("External service error: {0}")]
    ExternalService(String),

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(String),

    /// Schema migration failed
    #[error("Migration error: {0}")]
    Migration(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for quality engine operations
pub type Result<T> = std::result::Result<T, QualityError>;

impl QualityError {
    /// HTTP status reported for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            QualityError::NotFound(_) => StatusCode::NOT_FOUND,
            QualityError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            QualityError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            QualityError::ExternalService(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the read path should fall back to demo data
    pub fn is_unavailable(&self) -> bool {
        matches!(self, QualityError::StoreUnavailable(_))
    }
}

impl From<libsql::Error> for QualityError {
    fn from(err: libsql::Error) -> Self {
        let msg = err.to_string();
        let lower = msg.to_lowercase();
        if lower.contains("unable to open") || lower.contains("connection") {
            QualityError::StoreUnavailable(msg)
        } else {
            QualityError::Database(msg)
        }
    }
}

impl From<anyhow::Error> for QualityError {
    fn from(err: anyhow::Error) -> Self {
        QualityError::Database(err.to_string())
    }
}

impl From<toml::de::Error> for QualityError {
    fn from(err: toml::de::Error) -> Self {
        QualityError::Config(err.to_string())
    }
}
