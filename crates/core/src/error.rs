//! Core error model.

use thiserror::Error;

/// Result type used across the job model.
pub type CoreResult<T> = Result<T, CoreError>;

/// Model-level error.
///
/// Keep this focused on deterministic failures of the job model itself
/// (validation, malformed identifiers). Storage and runtime concerns belong
/// elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A value failed validation (e.g. an empty topic).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}

/// Configuration error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The configuration could not be parsed.
    #[error("unable to parse configuration: {0}")]
    Parse(String),

    /// The configuration was parsed but is not usable.
    #[error("invalid queue configuration {name:?}: {reason}")]
    InvalidQueue { name: String, reason: String },

    /// A configuration source could not be read.
    #[error("unable to read configuration {path}: {reason}")]
    Io { path: String, reason: String },
}

impl ConfigError {
    pub fn invalid_queue(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidQueue {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
