//! Rule Library Error Types

use thiserror::Error;

/// Result type for rule operations
pub type Result<T> = std::result::Result<T, RuleError>;

/// Rule library errors
#[derive(Debug, Error)]
pub enum RuleError {
    /// Rule not found
    #[error("Rule not found: {0}")]
    NotFound(i64),

    /// Condition parsing error
    #[error("Condition parse error: {0}")]
    ParseError(String),

    /// Condition validation error
    #[error("Condition validation error: {0}")]
    ValidationError(String),

    /// Condition evaluation error
    #[error("Condition evaluation error: {0}")]
    EvaluationError(String),

    /// Database error
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<sqlx::Error> for RuleError {
    fn from(err: sqlx::Error) -> Self {
        RuleError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for RuleError {
    fn from(err: serde_json::Error) -> Self {
        RuleError::SerializationError(err.to_string())
    }
}

impl From<anyhow::Error> for RuleError {
    fn from(err: anyhow::Error) -> Self {
        RuleError::EvaluationError(err.to_string())
    }
}
