//! Channel error types

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Result type alias for channel operations
pub type Result<T> = std::result::Result<T, ChannelError>;

/// Failures reported by channel backends
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The command did not finish within its walltime
    #[error("Command timed out after {}s: {command}", walltime.as_secs_f64())]
    Timeout { command: String, walltime: Duration },

    /// Target path already exists
    #[error("Path already exists: {0}")]
    AlreadyExists(PathBuf),

    /// Target path exists but is not a directory
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Target path does not exist
    #[error("No such file or directory: {0}")]
    NotFound(PathBuf),

    /// Access to a path was refused
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// The command could not be started
    #[error("Failed to spawn '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: io::Error,
    },

    /// The channel was closed, either before the call or while it was running
    #[error("Channel is closed")]
    Closed,

    /// No script directory has been assigned to the channel
    #[error("Channel script directory has not been set")]
    ScriptDirUnset,

    /// No backend is registered for the requested kind
    #[error("Unknown channel kind: {0}")]
    UnknownKind(String),

    /// Any other filesystem or transport error
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ChannelError {
    /// Classify an IO error raised while touching `path`
    pub fn from_io(err: io::Error, path: &Path) -> Self {
        let path = path.to_path_buf();
        match err.kind() {
            io::ErrorKind::AlreadyExists => Self::AlreadyExists(path),
            io::ErrorKind::NotFound => Self::NotFound(path),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path),
            _ => Self::Io { path, source: err },
        }
    }

    /// Whether this is a walltime expiry
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io_classifies_kinds() {
        let path = Path::new("/x");
        assert!(matches!(
            ChannelError::from_io(io::Error::from(io::ErrorKind::AlreadyExists), path),
            ChannelError::AlreadyExists(_)
        ));
        assert!(matches!(
            ChannelError::from_io(io::Error::from(io::ErrorKind::NotFound), path),
            ChannelError::NotFound(_)
        ));
        assert!(matches!(
            ChannelError::from_io(io::Error::from(io::ErrorKind::PermissionDenied), path),
            ChannelError::PermissionDenied(_)
        ));
        assert!(matches!(
            ChannelError::from_io(io::Error::from(io::ErrorKind::Other), path),
            ChannelError::Io { .. }
        ));
    }

    #[test]
    fn test_timeout_message() {
        let err = ChannelError::Timeout {
            command: "sleep 10".to_string(),
            walltime: Duration::from_secs(2),
        };
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "Command timed out after 2s: sleep 10");
    }
}
