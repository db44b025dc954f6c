//! Error types used throughout rxflow

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for rxflow
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum RxflowError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for rxflow operations
pub type Result<T> = std::result::Result<T, RxflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_serializes_tagged() {
        let err = RxflowError::Storage("disk full".into());
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, r#"{"type":"Storage","message":"disk full"}"#);
        assert_eq!(err.to_string(), "Storage error: disk full");
    }
}
