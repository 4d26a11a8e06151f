//! Error types for monsrv

use thiserror::Error;

/// Result type for monsrv
pub type Result<T> = std::result::Result<T, MonsrvError>;

/// Errors that can occur in monsrv
#[derive(Error, Debug)]
pub enum MonsrvError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Rule error: {0}")]
    RuleError(String),

    #[error("Bus error: {0}")]
    BusError(String),

    #[error("Notification error: {0}")]
    NotifyError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<warden_rtdb::StoreError> for MonsrvError {
    fn from(err: warden_rtdb::StoreError) -> Self {
        MonsrvError::StoreError(err.to_string())
    }
}

impl From<warden_rules::RuleError> for MonsrvError {
    fn from(err: warden_rules::RuleError) -> Self {
        MonsrvError::RuleError(err.to_string())
    }
}

impl From<figment::Error> for MonsrvError {
    fn from(err: figment::Error) -> Self {
        MonsrvError::ConfigError(err.to_string())
    }
}

impl From<anyhow::Error> for MonsrvError {
    fn from(err: anyhow::Error) -> Self {
        MonsrvError::InternalError(err.to_string())
    }
}
