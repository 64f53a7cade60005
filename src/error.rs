//! Error types for the Themis classification engine
//!
//! This module provides comprehensive error handling using thiserror for
//! structured error definitions and anyhow for error propagation.

use thiserror::Error;

/// Main error type for Themis operations
#[derive(Error, Debug)]
pub enum ThemisError {
    /// Reasoning Oracle could not be reached within the retry budget
    #[error("Reasoning Oracle unavailable after {attempts} attempts: {message}")]
    OracleUnavailable {
        /// Number of attempts made before giving up
        attempts: u32,
        /// Last underlying failure
        message: String,
    },

    /// Malformed input rejected before any Oracle call
    #[error("Validation error: {0}")]
    Validation(String),

    /// Scenario does not exist in the active snapshot
    #[error("Scenario not found: {0}")]
    ScenarioNotFound(String),

    /// Classification record does not exist
    #[error("Classification not found: {0}")]
    ClassificationNotFound(String),

    /// A concurrent commit won the race for this version slot
    #[error("Version conflict: {0}")]
    VersionConflict(String),

    /// Rollback target version does not exist
    #[error("Rollback target not found: version {0}")]
    RollbackTargetNotFound(u64),

    /// An internal invariant was violated. Fatal: the operation halts and
    /// the condition is logged for manual inspection, never auto-repaired.
    #[error("Inconsistent state: {0}")]
    InconsistentState(String),

    /// Storage backend operation failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Oracle response could not be parsed into a classification
    #[error("Oracle response error: {0}")]
    OracleResponse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl ThemisError {
    /// Transient errors are retried internally with backoff; everything
    /// else surfaces immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ThemisError::OracleUnavailable { .. } | ThemisError::Http(_)
        )
    }
}

/// Result type alias for Themis operations
pub type Result<T> = std::result::Result<T, ThemisError>;

/// Convert anyhow::Error to ThemisError
impl From<anyhow::Error> for ThemisError {
    fn from(err: anyhow::Error) -> Self {
        ThemisError::Other(err.to_string())
    }
}
