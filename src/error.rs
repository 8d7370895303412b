//! Error types for pgadvise.

use thiserror::Error;

/// The main error type for advisor operations.
///
/// Only failures that stop a call outright live here. Partial results
/// (hypothetical validation, extension provisioning, missing statistics)
/// are reported as outcome values on the returned report instead.
#[derive(Debug, Error)]
pub enum AdvisorError {
    /// An operation needed the database but no session is open.
    #[error("No active session. Call connect(dsn) first")]
    NoActiveSession,

    /// Failed to open a session.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A statement against the open session failed.
    #[error("Database error: {0}")]
    Database(String),

    /// EXPLAIN output did not have the expected shape.
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    /// Named arguments could not be bound to an operation.
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A report or message could not be encoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AdvisorError {
    /// Wrap a driver error raised by a statement.
    pub fn database(err: impl std::fmt::Display) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<sqlx::Error> for AdvisorError {
    fn from(err: sqlx::Error) -> Self {
        Self::database(err)
    }
}

/// Result type alias for advisor operations.
pub type AdvisorResult<T> = Result<T, AdvisorError>;
