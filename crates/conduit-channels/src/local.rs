//! Local channel - runs commands as child processes of this host
//!
//! Policies:
//! - Environment: the parent environment is inherited, then the channel's
//!   base overlay and finally the per-call `envs` replace same-named variables.
//! - Timeout: each command runs in its own process group; on walltime expiry
//!   the whole group receives `SIGKILL` and the call returns
//!   [`ChannelError::Timeout`].
//!   The walltime also covers reading the output pipes, so children left
//!   running in the background count against it.
//! - Close: every in-flight command (waited or not) is killed and further calls
//!   fail with [`ChannelError::Closed`]. Dropping the channel does not abort
//!   commands started with `execute_no_wait`.
//!
//! `LocalChannel` is safe to share between concurrent callers.

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use conduit_core::config::{ChannelConfig, DEFAULT_DIR_MODE};

use crate::channel::{Channel, EnvOverlay, ExecutionHandle, ExecutionResult};
use crate::error::{ChannelError, Result};

/// Channel backed by local child processes
#[derive(Debug)]
pub struct LocalChannel {
    /// Directory commands run in and relative paths resolve against
    userhome: PathBuf,
    /// Overlay applied before the per-call environment
    base_env: EnvOverlay,
    script_dir: Option<PathBuf>,
    dir_mode: u32,
    closed: watch::Sender<bool>,
}

impl LocalChannel {
    /// Create a channel rooted at `userhome`
    pub fn new(userhome: impl Into<PathBuf>) -> Self {
        let userhome = userhome.into();
        let userhome = if userhome.is_absolute() {
            userhome
        } else {
            std::env::current_dir()
                .map(|cwd| normalize(&cwd.join(&userhome)))
                .unwrap_or(userhome)
        };
        let (closed, _) = watch::channel(false);
        Self {
            userhome,
            base_env: EnvOverlay::new(),
            script_dir: None,
            dir_mode: DEFAULT_DIR_MODE,
            closed,
        }
    }

    /// Create a channel from configuration, rooted at the current directory
    pub fn from_config(config: &ChannelConfig) -> Self {
        let mut channel = Self::new(".")
            .with_env(config.env.clone())
            .with_dir_mode(config.dir_mode);
        if let Some(dir) = &config.script_dir {
            channel.set_script_dir(dir.clone());
        }
        channel
    }

    /// Set the base environment overlay
    pub fn with_env(mut self, env: EnvOverlay) -> Self {
        self.base_env = env;
        self
    }

    /// Set the permission bits for directories the channel creates itself
    pub fn with_dir_mode(mut self, mode: u32) -> Self {
        self.dir_mode = mode;
        self
    }

    /// Directory commands run in
    pub fn userhome(&self) -> &Path {
        &self.userhome
    }

    /// Whether [`Channel::close`] has been called
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(ChannelError::Closed)
        } else {
            Ok(())
        }
    }

    fn spawn(&self, cmd: &str, envs: &EnvOverlay) -> Result<Child> {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(cmd)
            .current_dir(&self.userhome)
            .envs(&self.base_env)
            .envs(envs)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        command.spawn().map_err(|source| ChannelError::SpawnFailed {
            command: cmd.to_string(),
            source,
        })
    }
}

impl Default for LocalChannel {
    fn default() -> Self {
        Self::new(".")
    }
}

#[async_trait]
impl Channel for LocalChannel {
    fn kind(&self) -> &'static str {
        "local"
    }

    async fn execute_wait(
        &self,
        cmd: &str,
        walltime: Duration,
        envs: &EnvOverlay,
    ) -> Result<ExecutionResult> {
        self.ensure_open()?;
        debug!(command = cmd, walltime_secs = walltime.as_secs_f64(), "executing");
        let child = self.spawn(cmd, envs)?;
        supervise(child, cmd.to_string(), walltime, self.closed.subscribe(), None).await
    }

    async fn execute_no_wait(
        &self,
        cmd: &str,
        walltime: Duration,
        envs: &EnvOverlay,
    ) -> Result<Box<dyn ExecutionHandle>> {
        self.ensure_open()?;
        let child = self.spawn(cmd, envs)?;
        let pid = child.id();
        let (kill_tx, kill_rx) = oneshot::channel();
        let closed = self.closed.subscribe();
        let command = cmd.to_string();
        debug!(command = cmd, pid = ?pid, "started without waiting");

        let task = tokio::spawn(supervise(child, command, walltime, closed, Some(kill_rx)));

        Ok(Box::new(LocalProcess {
            pid,
            task,
            kill: Some(kill_tx),
        }))
    }

    async fn push_file(&self, source: &Path, dest_dir: &Path) -> Result<PathBuf> {
        self.ensure_open()?;
        let source = self.abspath(source);
        let dest_dir = self.abspath(dest_dir);
        let file_name = source
            .file_name()
            .ok_or_else(|| ChannelError::NotFound(source.clone()))?;

        self.makedirs(&dest_dir, self.dir_mode, true).await?;
        let dest = dest_dir.join(file_name);

        if same_file(&source, &dest).await {
            debug!(path = %dest.display(), "push_file source is destination, nothing to copy");
            return Ok(dest);
        }

        tokio::fs::copy(&source, &dest)
            .await
            .map_err(|e| ChannelError::from_io(e, &source))?;
        debug!(source = %source.display(), dest = %dest.display(), "pushed file");
        Ok(dest)
    }

    async fn makedirs(&self, path: &Path, mode: u32, exist_ok: bool) -> Result<()> {
        self.ensure_open()?;
        let path = self.abspath(path);

        if let Some(parent) = path.parent() {
            let mut builder = tokio::fs::DirBuilder::new();
            builder.recursive(true);
            #[cfg(unix)]
            builder.mode(mode);
            builder
                .create(parent)
                .await
                .map_err(|e| ChannelError::from_io(e, parent))?;
        }

        let mut builder = tokio::fs::DirBuilder::new();
        #[cfg(unix)]
        builder.mode(mode);
        match builder.create(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), mode = %format!("{:o}", mode), "created directory");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if !tokio::fs::metadata(&path)
                    .await
                    .map(|m| m.is_dir())
                    .unwrap_or(false)
                {
                    Err(ChannelError::NotADirectory(path))
                } else if exist_ok {
                    Ok(())
                } else {
                    Err(ChannelError::AlreadyExists(path))
                }
            }
            Err(e) => Err(ChannelError::from_io(e, &path)),
        }
    }

    async fn isdir(&self, path: &Path) -> Result<bool> {
        self.ensure_open()?;
        let path = self.abspath(path);
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                Err(ChannelError::PermissionDenied(path))
            }
            Err(_) => Ok(false),
        }
    }

    fn abspath(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            normalize(path)
        } else {
            normalize(&self.userhome.join(path))
        }
    }

    async fn close(&self) -> bool {
        let was_closed = self.closed.send_replace(true);
        if was_closed {
            warn!("local channel closed twice");
            return false;
        }
        info!(userhome = %self.userhome.display(), "closed local channel");
        true
    }

    fn script_dir(&self) -> Option<&Path> {
        self.script_dir.as_deref()
    }

    fn set_script_dir(&mut self, dir: PathBuf) {
        let dir = self.abspath(&dir);
        debug!(script_dir = %dir.display(), "script dir assigned");
        self.script_dir = Some(dir);
    }

    fn dir_mode(&self) -> u32 {
        self.dir_mode
    }
}

/// Handle for a local command started without waiting
pub struct LocalProcess {
    pid: Option<u32>,
    task: JoinHandle<Result<ExecutionResult>>,
    kill: Option<oneshot::Sender<()>>,
}

#[async_trait]
impl ExecutionHandle for LocalProcess {
    fn id(&self) -> String {
        self.pid.map(|p| p.to_string()).unwrap_or_default()
    }

    async fn wait(self: Box<Self>) -> Result<ExecutionResult> {
        let LocalProcess { task, kill, .. } = *self;
        // Keep the kill sender alive so the supervisor does not read it as a kill.
        let _kill = kill;
        match task.await {
            Ok(result) => result,
            Err(e) => Err(ChannelError::Io {
                path: PathBuf::new(),
                source: std::io::Error::other(e.to_string()),
            }),
        }
    }

    fn kill(&mut self) {
        if let Some(tx) = self.kill.take() {
            let _ = tx.send(());
        }
    }
}

/// Drive a child to completion, enforcing the walltime and abort signals.
///
/// The walltime covers draining both pipes, so a backgrounded process that
/// keeps them open cannot outlive it.
async fn supervise(
    mut child: Child,
    command: String,
    walltime: Duration,
    mut closed: watch::Receiver<bool>,
    kill: Option<oneshot::Receiver<()>>,
) -> Result<ExecutionResult> {
    let start = Instant::now();
    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();

    let killed = async move {
        match kill {
            Some(rx) => {
                if rx.await.is_err() {
                    // Handle dropped without asking for a kill.
                    std::future::pending::<()>().await;
                }
            }
            None => std::future::pending::<()>().await,
        }
    };

    let outcome = tokio::select! {
        done = async {
            tokio::join!(
                child.wait(),
                read_pipe(stdout.as_mut()),
                read_pipe(stderr.as_mut()),
            )
        } => Ok(done),
        _ = tokio::time::sleep(walltime) => Err(ChannelError::Timeout {
            command: command.clone(),
            walltime,
        }),
        // A dropped channel is not a close; only `close()` aborts.
        Ok(_) = closed.wait_for(|c| *c) => Err(ChannelError::Closed),
        _ = killed => Err(ChannelError::Closed),
    };

    let (status, stdout, stderr) = match outcome {
        Ok(done) => done,
        Err(err) => {
            warn!(command = %command, error = %err, "killing command");
            kill_group(&mut child);
            let _ = child.wait().await;
            return Err(err);
        }
    };
    let status = status.map_err(|source| ChannelError::Io {
        path: PathBuf::new(),
        source,
    })?;

    let exit_code = status.code().unwrap_or(-1);
    debug!(
        command = %command,
        exit_code,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "command finished"
    );

    Ok(ExecutionResult {
        exit_code,
        stdout,
        stderr,
    })
}

async fn read_pipe<R: AsyncRead + Unpin>(stream: Option<&mut R>) -> Option<String> {
    let mut buf = Vec::new();
    stream?.read_to_end(&mut buf).await.ok()?;
    Some(String::from_utf8_lossy(&buf).into_owned())
}

fn kill_group(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: killpg only sends a signal; the group id is the child's pid
        // because it was spawned with process_group(0).
        unsafe {
            libc::killpg(pid as libc::pid_t, libc::SIGKILL);
        }
    }
    let _ = child.start_kill();
}

async fn same_file(a: &Path, b: &Path) -> bool {
    match (tokio::fs::canonicalize(a).await, tokio::fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Lexically resolve `.` and `..` without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
