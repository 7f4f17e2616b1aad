//! Task identities, invocations and records

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use conduit_channels::{EnvOverlay, ExecutionResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{FailureKind, TaskFailure};
use crate::key::CacheKey;
use crate::memo::Outcome;
use crate::value::Value;

/// Stable identity of a task's code, independent of any one invocation
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskId {
    /// Task name
    pub name: String,
    /// SHA-256 of the command template
    pub fingerprint: String,
}

impl TaskId {
    /// Identity for a shell task with the given command template
    pub fn new(name: impl Into<String>, command: &str) -> Self {
        Self {
            name: name.into(),
            fingerprint: format!("{:x}", Sha256::digest(command.as_bytes())),
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.fingerprint.get(..8).unwrap_or(&self.fingerprint);
        write!(f, "{}@{}", self.name, short)
    }
}

/// One call of a shell task
///
/// The command is a template: `{0}` refers to a positional argument, `{name}`
/// to a keyword argument, and `{{` / `}}` are literal braces.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub task: TaskId,
    pub command: String,
    pub args: Vec<Value>,
    pub kwargs: Vec<(String, Value)>,
    /// Whether the result may be served from the memo cache
    pub memoize: bool,
    /// Overrides the dispatcher's default walltime
    pub walltime: Option<Duration>,
    /// Applied on top of the dispatcher's environment
    pub env: EnvOverlay,
}

impl Invocation {
    /// Create an invocation of the named command template
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        let command = command.into();
        Self {
            task: TaskId::new(name, &command),
            command,
            args: Vec::new(),
            kwargs: Vec::new(),
            memoize: true,
            walltime: None,
            env: EnvOverlay::new(),
        }
    }

    /// Add a positional argument
    pub fn with_arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Set a keyword argument, replacing any earlier value for the same name
    pub fn with_kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.kwargs.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.kwargs.push((name, value)),
        }
        self
    }

    pub fn with_memoize(mut self, memoize: bool) -> Self {
        self.memoize = memoize;
        self
    }

    pub fn with_walltime(mut self, walltime: Duration) -> Self {
        self.walltime = Some(walltime);
        self
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    fn kwarg(&self, name: &str) -> Option<&Value> {
        self.kwargs.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Substitute arguments into the command template
    pub fn render(&self) -> Result<String, TaskFailure> {
        let invalid = |message: String| TaskFailure::new(FailureKind::InvalidCommand, message);

        let mut out = String::with_capacity(self.command.len());
        let mut chars = self.command.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    out.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    out.push('}');
                }
                '{' => {
                    let mut field = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(c) => field.push(c),
                            None => {
                                return Err(invalid(format!(
                                    "unclosed placeholder in '{}'",
                                    self.command
                                )))
                            }
                        }
                    }

                    let value = match field.parse::<usize>() {
                        Ok(index) => self.args.get(index).ok_or_else(|| {
                            invalid(format!(
                                "placeholder {{{}}} has no positional argument ({} given)",
                                index,
                                self.args.len()
                            ))
                        })?,
                        Err(_) => self.kwarg(&field).ok_or_else(|| {
                            invalid(format!("placeholder {{{}}} has no keyword argument", field))
                        })?,
                    };
                    out.push_str(&value.render());
                }
                c => out.push(c),
            }
        }

        Ok(out)
    }
}

/// Lifecycle state of a submitted task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Submitted, not yet running
    Pending,
    /// Running on a channel
    Launched,
    /// Outcome served from the memo cache
    Memoized,
    /// Ran to completion successfully
    ExecDone,
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Launched => "launched",
            Self::Memoized => "memoized",
            Self::ExecDone => "exec_done",
            Self::Failed => "failed",
        }
    }

    /// Whether the task will not change state again
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Memoized | Self::ExecDone | Self::Failed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bookkeeping for one submitted invocation
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub id: u64,
    pub task: TaskId,
    pub status: TaskState,
    /// Cache key, when one could be derived
    pub hashsum: Option<CacheKey>,
    pub memoize: bool,
    pub time_submitted: DateTime<Utc>,
    pub time_returned: Option<DateTime<Utc>>,
    pub outcome: Option<Outcome<ExecutionResult>>,
}

impl TaskRecord {
    /// Create a pending record
    pub fn new(id: u64, task: TaskId, memoize: bool) -> Self {
        Self {
            id,
            task,
            status: TaskState::Pending,
            hashsum: None,
            memoize,
            time_submitted: Utc::now(),
            time_returned: None,
            outcome: None,
        }
    }

    /// Record the final outcome.
    ///
    /// `memoized` marks an outcome that was served from the cache; a cached
    /// failure is still reported as `Failed`.
    pub fn finish(&mut self, outcome: Outcome<ExecutionResult>, memoized: bool) {
        self.status = match (&outcome, memoized) {
            (Err(_), _) => TaskState::Failed,
            (Ok(_), true) => TaskState::Memoized,
            (Ok(_), false) => TaskState::ExecDone,
        };
        self.outcome = Some(outcome);
        self.time_returned = Some(Utc::now());
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Some(Ok(_)))
    }

    /// The execution result, if the task succeeded
    pub fn result(&self) -> Option<&ExecutionResult> {
        self.outcome.as_ref().and_then(|o| o.as_ref().ok())
    }

    /// The failure, if the task failed
    pub fn error(&self) -> Option<&TaskFailure> {
        self.outcome.as_ref().and_then(|o| o.as_ref().err())
    }

    /// Time between submission and return
    pub fn duration(&self) -> Option<Duration> {
        self.time_returned
            .and_then(|returned| (returned - self.time_submitted).to_std().ok())
    }
}
