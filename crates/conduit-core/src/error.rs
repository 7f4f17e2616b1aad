//! Error types for conduit

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using ConduitError
pub type Result<T> = std::result::Result<T, ConduitError>;

/// Main error type for conduit operations
#[derive(Debug, Error)]
pub enum ConduitError {
    /// Configuration-related errors
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found at {0}")]
    NotFound(PathBuf),

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {message}")]
    InvalidValue { field: String, message: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// IO error
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    /// Shorthand for an invalid field value
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}
