//! Error type system for the storage core
//!
//! This module provides:
//! - A single crate-wide error enum
//! - Transient (connection-level) error classification used by the retry wrapper

/// Message fragments that mark a failure as connection-level.
///
/// Matched case-sensitively against the rendered error message, the same way
/// client libraries surface socket errno names.
const TRANSIENT_INDICATORS: &[&str] = &[
    "Connection",
    "ECONNREFUSED",
    "ENOTFOUND",
    "ECONNRESET",
    "EPIPE",
    "connection refused",
    "connection reset",
    "broken pipe",
];

/// Main error type for the storage core
#[derive(Debug, thiserror::Error)]
pub enum VodError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("{backend} connection error: {message}")]
    ConnectionError { backend: String, message: String },

    #[error("{backend} gave up reconnecting; restart required")]
    ConnectionExhausted { backend: String },

    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Backend error: {0}")]
    BackendError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Server-side storage is not available for backend '{0}'")]
    StorageUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Task error: {0}")]
    TaskError(String),
}

impl VodError {
    /// Build a connection error tagged with the backend label
    pub fn connection(backend: impl Into<String>, message: impl Into<String>) -> Self {
        VodError::ConnectionError {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Get the error type name for logs
    pub fn error_type(&self) -> &'static str {
        match self {
            VodError::ConfigError(_) => "ConfigError",
            VodError::ConnectionError { .. } => "ConnectionError",
            VodError::ConnectionExhausted { .. } => "ConnectionExhausted",
            VodError::RedisError(_) => "RedisError",
            VodError::HttpError(_) => "HttpError",
            VodError::BackendError(_) => "BackendError",
            VodError::SerializationError(_) => "SerializationError",
            VodError::DeserializationError(_) => "DeserializationError",
            VodError::ValidationError(_) => "ValidationError",
            VodError::Unsupported(_) => "Unsupported",
            VodError::StorageUnavailable(_) => "StorageUnavailable",
            VodError::AuthenticationError(_) => "AuthenticationError",
            VodError::TaskError(_) => "TaskError",
        }
    }

    /// Check whether this error is a transient connection-level fault
    ///
    /// Only these errors are retried; everything else (malformed commands,
    /// auth failures, validation) propagates on the first attempt.
    pub fn is_transient(&self) -> bool {
        let typed = match self {
            VodError::ConnectionExhausted { .. } => return false,
            VodError::ConnectionError { .. } => true,
            VodError::RedisError(e) => {
                e.is_connection_refusal()
                    || e.is_connection_dropped()
                    || e.is_io_error()
                    || e.is_timeout()
            }
            VodError::HttpError(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        };

        typed || matches_transient_indicator(&self.to_string())
    }
}

/// Check a rendered error message against the transient indicator set
pub fn matches_transient_indicator(message: &str) -> bool {
    TRANSIENT_INDICATORS
        .iter()
        .any(|indicator| message.contains(indicator))
}

/// Result type alias for operations that can fail with VodError
pub type Result<T> = std::result::Result<T, VodError>;
