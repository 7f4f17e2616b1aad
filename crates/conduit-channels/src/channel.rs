//! The channel contract
//!
//! ```text
//!                         +------------------
//!   cmd, walltime  ------>|  execute_wait
//!   ExecutionResult <-----|---+
//!   cmd, walltime  ------>|  execute_no_wait
//!   handle         <------|---+
//!   src, dest_dir  ------>|  push_file
//!   dest_path      <------|---+
//!   script_dir     <----->|  script_dir / set_script_dir
//!                         +------------------
//! ```
//!
//! A channel is owned by whoever created it. Implementations are not required
//! to support concurrent callers unless they say so; [`LocalChannel`] does.
//!
//! [`LocalChannel`]: crate::LocalChannel

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use conduit_core::config::DEFAULT_DIR_MODE;
use serde::{Deserialize, Serialize};

use crate::error::{ChannelError, Result};

/// Environment variables pushed to the target for one command
pub type EnvOverlay = HashMap<String, String>;

/// Exit code reported for commands that exceeded their walltime
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Exit code reported for commands that could not be started
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 127;

/// Outcome of a synchronous command
///
/// When `exit_code` is non-zero the output streams may be absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Process exit code (`-1` when killed by a signal)
    pub exit_code: i32,
    /// Captured standard output
    pub stdout: Option<String>,
    /// Captured standard error
    pub stderr: Option<String>,
}

impl ExecutionResult {
    /// Create a result with captured output
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: Some(stdout.into()),
            stderr: Some(stderr.into()),
        }
    }

    /// Create a failed result with no captured output
    pub fn failed(exit_code: i32) -> Self {
        Self {
            exit_code,
            stdout: None,
            stderr: None,
        }
    }

    /// Whether the command exited successfully
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Fold a channel error into a failed result.
    ///
    /// Timeouts map to [`TIMEOUT_EXIT_CODE`], spawn failures to
    /// [`SPAWN_FAILURE_EXIT_CODE`] and everything else to `-1`. The error text
    /// is kept in `stderr`.
    pub fn from_error(err: &ChannelError) -> Self {
        let exit_code = match err {
            ChannelError::Timeout { .. } => TIMEOUT_EXIT_CODE,
            ChannelError::SpawnFailed { .. } => SPAWN_FAILURE_EXIT_CODE,
            _ => -1,
        };
        Self {
            exit_code,
            stdout: None,
            stderr: Some(err.to_string()),
        }
    }
}

/// Handle to a command started with [`Channel::execute_no_wait`]
#[async_trait]
pub trait ExecutionHandle: Send {
    /// Backend-specific identifier (a pid for local processes)
    fn id(&self) -> String;

    /// Wait for the command to finish
    async fn wait(self: Box<Self>) -> Result<ExecutionResult>;

    /// Request termination without waiting for it
    fn kill(&mut self);
}

/// Execution and transport surface over one compute target
#[async_trait]
pub trait Channel: Send + Sync {
    /// Backend identifier (e.g. "local")
    fn kind(&self) -> &'static str;

    /// Run `cmd` to completion, killing it after `walltime`.
    ///
    /// `envs` is merged over the target's default environment. A command that
    /// outlives its walltime yields [`ChannelError::Timeout`], never a success.
    async fn execute_wait(
        &self,
        cmd: &str,
        walltime: Duration,
        envs: &EnvOverlay,
    ) -> Result<ExecutionResult>;

    /// Start `cmd` without waiting for it
    async fn execute_no_wait(
        &self,
        cmd: &str,
        walltime: Duration,
        envs: &EnvOverlay,
    ) -> Result<Box<dyn ExecutionHandle>>;

    /// Copy the local file `source` into `dest_dir` on the target, creating the
    /// directory if needed. Re-pushing the same pair overwrites.
    async fn push_file(&self, source: &Path, dest_dir: &Path) -> Result<PathBuf>;

    /// Create `path` and any missing parents with permission bits `mode`
    async fn makedirs(&self, path: &Path, mode: u32, exist_ok: bool) -> Result<()>;

    /// Whether `path` exists on the target and is a directory
    async fn isdir(&self, path: &Path) -> Result<bool>;

    /// Resolve `path` against the target's filesystem; the path need not exist
    fn abspath(&self, path: &Path) -> PathBuf;

    /// Release the channel. Outstanding operations are aborted.
    ///
    /// Returns whether teardown succeeded. The channel must not be used again.
    async fn close(&self) -> bool;

    /// Directory on the target for internal scripts and logs
    fn script_dir(&self) -> Option<&Path>;

    /// Assign the script directory.
    ///
    /// Called once by the owner after construction and before the channel is
    /// shared; the directory is created lazily by [`Channel::ensure_script_dir`].
    fn set_script_dir(&mut self, dir: PathBuf);

    /// Permission bits used for directories the channel creates on its own
    fn dir_mode(&self) -> u32 {
        DEFAULT_DIR_MODE
    }

    /// Create the script directory if needed and return it
    async fn ensure_script_dir(&self) -> Result<PathBuf> {
        let dir = self
            .script_dir()
            .ok_or(ChannelError::ScriptDirUnset)?
            .to_path_buf();
        self.makedirs(&dir, self.dir_mode(), true).await?;
        Ok(dir)
    }

    /// Like [`Channel::execute_wait`], but folds every error into a failed
    /// [`ExecutionResult`] via [`ExecutionResult::from_error`].
    async fn execute_wait_result(
        &self,
        cmd: &str,
        walltime: Duration,
        envs: &EnvOverlay,
    ) -> ExecutionResult {
        match self.execute_wait(cmd, walltime, envs).await {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(command = cmd, error = %err, "command failed on channel");
                ExecutionResult::from_error(&err)
            }
        }
    }
}
