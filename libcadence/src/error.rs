//! Error types for Cadence

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CadenceError>;

#[derive(Error, Debug)]
pub enum CadenceError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Analytics error: {0}")]
    Analytics(#[from] AnalyticsError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A background task or the process around it failed
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl CadenceError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CadenceError::InvalidInput(_) | CadenceError::NotFound(_) => 3,
            CadenceError::Config(_) | CadenceError::Database(_) => 2,
            CadenceError::Publish(_) | CadenceError::Analytics(_) | CadenceError::Runtime(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },
}

/// How a failed publish attempt should be treated by the retry machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClassification {
    /// Network failure or provider 5xx; retried with backoff.
    Transient,
    /// Provider throttled us; retried no sooner than its hint.
    RateLimited,
    /// Rejected content, missing account, bad request; never retried.
    Permanent,
    /// The platform has no publishing route; never retried.
    NotImplemented,
}

impl ErrorClassification {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorClassification::Transient | ErrorClassification::RateLimited
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClassification::Transient => "transient",
            ErrorClassification::RateLimited => "rate_limited",
            ErrorClassification::Permanent => "permanent",
            ErrorClassification::NotImplemented => "not_implemented",
        }
    }
}

impl std::fmt::Display for ErrorClassification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized publish failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{classification}: {message}")]
pub struct PublishError {
    pub classification: ErrorClassification,
    pub message: String,
    /// Provider-supplied minimum wait before the next attempt
    pub retry_after: Option<Duration>,
}

impl PublishError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            classification: ErrorClassification::Transient,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            classification: ErrorClassification::Permanent,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            classification: ErrorClassification::RateLimited,
            message: message.into(),
            retry_after,
        }
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self {
            classification: ErrorClassification::NotImplemented,
            message: message.into(),
            retry_after: None,
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum AnalyticsError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Analytics provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Failed to decode analytics response: {0}")]
    Decode(String),

    #[error("Analytics not configured: {0}")]
    NotConfigured(String),
}
