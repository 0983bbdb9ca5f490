//! Error types shared by all ulogview crates

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types organized by layer
#[derive(Debug, Error)]
pub enum Error {
    // ========================================================================
    // Common/Infrastructure Errors
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid regular expression: {0}")]
    Regex(#[from] regex::Error),

    #[error("Channel closed unexpectedly")]
    ChannelClosed,

    // =======================================================================
    // Configuration Errors
    // ========================================================================
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // =======================================================================
    // Log Source Errors
    // ========================================================================
    #[error("Unable to create log data source: {message}")]
    SourceCreation { message: String },

    #[error("Log data source error: {message}")]
    Source { message: String },

    // =======================================================================
    // Contract Violations
    // ========================================================================
    #[error("Invalid state: {message}")]
    InvalidState { message: String },
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn source_creation(message: impl Into<String>) -> Self {
        Self::SourceCreation {
            message: message.into(),
        }
    }

    pub fn data_source(message: impl Into<String>) -> Self {
        Self::Source {
            message: message.into(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Check if this is a recoverable error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Json(_) | Error::SourceCreation { .. } | Error::Source { .. }
        )
    }

    /// Check if this error signals a broken caller contract
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::InvalidState { .. } | Error::ChannelClosed)
    }
}
