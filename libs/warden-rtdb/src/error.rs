//! Error types for warden-rtdb

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Row not found: {0}")]
    RowNotFound(i64),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_database_error_display() {
        let err = StoreError::Database("disk full".to_string());
        assert_eq!(err.to_string(), "Database error: disk full");
    }

    #[test]
    fn test_row_not_found_display() {
        let err = StoreError::RowNotFound(42);
        assert_eq!(err.to_string(), "Row not found: 42");
    }

    #[test]
    fn test_from_anyhow() {
        let err: StoreError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, StoreError::Other(_)));
        assert!(err.to_string().contains("boom"));
    }
}
