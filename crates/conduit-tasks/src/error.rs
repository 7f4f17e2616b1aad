//! Error types for memoized dispatch

use std::fmt;

use conduit_channels::{ChannelError, ExecutionResult};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::key::CacheKey;
use crate::value::TypeTag;

/// Canonicalization failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HashError {
    /// No canonicalizer is registered and the type has no structural form
    #[error("No deterministic representation for type '{type_tag}'")]
    UnsupportedType { type_tag: TypeTag },

    /// A registered canonicalizer rejected the value
    #[error("Canonicalizer for '{type_tag}' failed: {message}")]
    Canonicalizer { type_tag: TypeTag, message: String },
}

/// Staging failures
#[derive(Debug, Error)]
pub enum StagingError {
    /// Scheme has no staging transport
    #[error("Staging in with unknown file scheme {0} is not supported")]
    UnsupportedScheme(String),

    /// The channel failed to move the file
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Category of a task failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The command ran and exited non-zero
    NonZeroExit,
    /// The command exceeded its walltime
    Timeout,
    /// The channel could not run the command
    Channel,
    /// The command template could not be rendered
    InvalidCommand,
    /// An argument could not be canonicalized
    Unhashable,
    /// The owning execution went away without recording an outcome
    Abandoned,
}

impl FailureKind {
    /// Get the kind as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NonZeroExit => "non-zero exit",
            Self::Timeout => "timeout",
            Self::Channel => "channel error",
            Self::InvalidCommand => "invalid command",
            Self::Unhashable => "unhashable argument",
            Self::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task failure; cloneable so a cached failure can be replayed to every waiter
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct TaskFailure {
    /// Failure category
    pub kind: FailureKind,
    /// Human-readable detail
    pub message: String,
    /// Exit code, when the command ran
    pub exit_code: Option<i32>,
    /// Captured standard error, when available
    pub stderr: Option<String>,
}

impl TaskFailure {
    /// Create a failure with no exit information
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            exit_code: None,
            stderr: None,
        }
    }

    /// Failure for a command that exited non-zero
    pub fn from_exit(result: &ExecutionResult) -> Self {
        Self {
            kind: FailureKind::NonZeroExit,
            message: format!("command exited with code {}", result.exit_code),
            exit_code: Some(result.exit_code),
            stderr: result.stderr.clone(),
        }
    }

    /// Failure for a channel error
    pub fn from_channel(err: &ChannelError) -> Self {
        let fallback = ExecutionResult::from_error(err);
        let kind = if err.is_timeout() {
            FailureKind::Timeout
        } else {
            FailureKind::Channel
        };
        Self {
            kind,
            message: err.to_string(),
            exit_code: Some(fallback.exit_code),
            stderr: None,
        }
    }

    /// Failure recorded when an owner is dropped before completing its slot
    pub fn abandoned(key: &CacheKey) -> Self {
        Self::new(
            FailureKind::Abandoned,
            format!("execution for {} ended without an outcome", key.short()),
        )
    }
}

impl From<HashError> for TaskFailure {
    fn from(err: HashError) -> Self {
        Self::new(FailureKind::Unhashable, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_from_exit() {
        let failure = TaskFailure::from_exit(&ExecutionResult::new(2, "", "boom"));
        assert_eq!(failure.kind, FailureKind::NonZeroExit);
        assert_eq!(failure.exit_code, Some(2));
        assert_eq!(failure.stderr.as_deref(), Some("boom"));
        assert_eq!(failure.to_string(), "non-zero exit: command exited with code 2");
    }

    #[test]
    fn test_from_timeout() {
        let failure = TaskFailure::from_channel(&ChannelError::Timeout {
            command: "sleep 9".to_string(),
            walltime: Duration::from_secs(1),
        });
        assert_eq!(failure.kind, FailureKind::Timeout);
        assert_eq!(failure.exit_code, Some(conduit_channels::TIMEOUT_EXIT_CODE));
    }

    #[test]
    fn test_from_hash_error() {
        let failure: TaskFailure = HashError::UnsupportedType {
            type_tag: TypeTag::new("socket"),
        }
        .into();
        assert_eq!(failure.kind, FailureKind::Unhashable);
        assert!(failure.message.contains("socket"));
    }
}
