//! Run command - dispatch a batch of task invocations
//!
//! A batch file lists invocations as `[[task]]` tables:
//!
//! ```toml
//! [[task]]
//! name = "fail_on_presence"
//! command = "if [ -f {outputs} ] ; then exit 1 ; else touch {outputs}; fi"
//! kwargs = { outputs = { file = "test.memoization.tmp" } }
//! repeat = 2
//! ```
//!
//! A table with a single `file` key becomes a file argument.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use console::style;
use serde::Deserialize;

use conduit_core::load_config_or_default;
use conduit_tasks::{
    DispatchOptions, Dispatcher, File, Invocation, TaskEvent, TaskRecord, TaskReporter,
    TaskReporterRegistry, Value,
};

use super::open_channel;
use crate::cli::{output, Cli, OutputFormat};
use crate::exit_codes;

/// Dispatch a batch of task invocations with memoization
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Batch file (TOML)
    pub batch: PathBuf,

    /// Maximum concurrent commands
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Disable memoization for every invocation
    #[arg(long)]
    pub no_memo: bool,
}

/// Batch file contents
#[derive(Debug, Deserialize)]
pub struct BatchFile {
    #[serde(default)]
    pub task: Vec<BatchEntry>,
}

/// One `[[task]]` entry
#[derive(Debug, Deserialize)]
pub struct BatchEntry {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<toml::Value>,
    #[serde(default)]
    pub kwargs: toml::Table,
    #[serde(default = "default_memoize")]
    pub memoize: bool,
    /// Walltime in seconds
    pub walltime: Option<u64>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Submit the same invocation this many times
    #[serde(default = "default_repeat")]
    pub repeat: usize,
}

fn default_memoize() -> bool {
    true
}

fn default_repeat() -> usize {
    1
}

impl BatchEntry {
    /// Expand into invocations, one per repeat
    pub fn invocations(&self) -> Vec<Invocation> {
        let mut invocation =
            Invocation::new(&self.name, &self.command).with_memoize(self.memoize);
        for arg in &self.args {
            invocation = invocation.with_arg(to_value(arg));
        }
        for (name, value) in &self.kwargs {
            invocation = invocation.with_kwarg(name, to_value(value));
        }
        if let Some(secs) = self.walltime {
            invocation = invocation.with_walltime(Duration::from_secs(secs));
        }
        for (name, value) in &self.env {
            invocation = invocation.with_env(name, value);
        }
        vec![invocation; self.repeat.max(1)]
    }
}

/// Load a batch file
pub fn load_batch(path: &Path) -> anyhow::Result<BatchFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read batch file {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Invalid batch file {}", path.display()))
}

fn to_value(value: &toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::Str(s.clone()),
        toml::Value::Integer(i) => Value::Int(*i),
        toml::Value::Float(f) => Value::Float(*f),
        toml::Value::Boolean(b) => Value::Bool(*b),
        toml::Value::Datetime(d) => Value::Str(d.to_string()),
        toml::Value::Array(items) => Value::List(items.iter().map(to_value).collect()),
        toml::Value::Table(table) => match (table.len(), table.get("file")) {
            (1, Some(toml::Value::String(url))) => File::parse(url.as_str()).into(),
            _ => Value::Map(
                table
                    .iter()
                    .map(|(k, v)| (Value::Str(k.clone()), to_value(v)))
                    .collect(),
            ),
        },
    }
}

impl RunCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let runtime = tokio::runtime::Runtime::new()?;
        let failed = runtime.block_on(self.execute_async(cli))?;
        if failed > 0 {
            std::process::exit(exit_codes::TASK_FAILED);
        }
        Ok(())
    }

    async fn execute_async(&self, cli: &Cli) -> anyhow::Result<usize> {
        let cwd = std::env::current_dir()?;
        let (config, _) = load_config_or_default(&cwd);
        let batch = load_batch(&self.batch)?;

        let invocations: Vec<Invocation> =
            batch.task.iter().flat_map(BatchEntry::invocations).collect();
        if invocations.is_empty() {
            if !cli.quiet {
                output::success("No tasks to run.");
            }
            return Ok(0);
        }

        let mut options = DispatchOptions::from_config(&config);
        if let Some(concurrency) = self.concurrency {
            options.concurrency = concurrency.max(1);
        }
        if self.no_memo {
            options.memoize = false;
        }

        // Tracing always receives events; the console only in interactive text mode
        let mut reporters = TaskReporterRegistry::new();
        if !cli.quiet && cli.format == OutputFormat::Text {
            output::info(&format!(
                "{} invocation{} on '{}' channel",
                invocations.len(),
                if invocations.len() == 1 { "" } else { "s" },
                config.channel.kind
            ));
            reporters.register(Arc::new(ConsoleReporter::new(cli.verbose)));
        }
        let reporter: Arc<dyn TaskReporter> = Arc::new(reporters);

        let channel = open_channel(&config)?;
        let dispatcher = Arc::new(Dispatcher::new(channel.clone(), options, reporter));
        let records = dispatcher.submit_all(invocations).await;
        channel.close().await;

        let failed: Vec<&TaskRecord> = records.iter().filter(|r| !r.is_success()).collect();

        if cli.format == OutputFormat::Json {
            println!("{}", serde_json::to_string_pretty(&records)?);
        } else if !failed.is_empty() && !cli.quiet {
            println!();
            println!(
                "  {} {}/{} tasks failed:",
                style("✗").red().bold(),
                failed.len(),
                records.len()
            );
            for r in &failed {
                if let Some(err) = r.error() {
                    println!("    {} #{} {}: {}", style("✗").red(), r.id, r.task, err);
                }
            }
        }

        Ok(failed.len())
    }
}

/// Console reporter with per-task lines
struct ConsoleReporter {
    verbose: bool,
}

impl ConsoleReporter {
    fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl TaskReporter for ConsoleReporter {
    fn report(&self, event: &TaskEvent) {
        match event {
            TaskEvent::Submitted { id, task, key } => {
                if self.verbose {
                    let key = key
                        .map(|k| output::key_style().apply_to(k.short()).to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!("  {} #{} {} {}", style("·").dim(), id, task, key);
                }
            }
            TaskEvent::Started { id, task, command } => {
                println!(
                    "  {} #{} {} {}",
                    style("▸").dim(),
                    id,
                    style(task).bold(),
                    if self.verbose {
                        style(format!("({})", command)).dim().to_string()
                    } else {
                        String::new()
                    }
                );
            }
            TaskEvent::Memoized { id, task, key } => {
                println!(
                    "  {} #{} {} {}",
                    style("○").cyan(),
                    id,
                    style(task).cyan(),
                    style(format!("(waiting on {})", key.short())).dim()
                );
            }
            TaskEvent::Completed {
                id,
                task,
                duration,
                cached,
            } => {
                println!(
                    "  {} #{} {} {}{}",
                    style("✓").green(),
                    id,
                    style(task).green(),
                    if *cached {
                        format!("{} ", style("(cached)").cyan())
                    } else {
                        String::new()
                    },
                    style(format!("{:.1}s", duration.as_secs_f64())).dim()
                );
            }
            TaskEvent::Failed {
                id,
                task,
                duration,
                error,
            } => {
                println!(
                    "  {} #{} {} {} {}",
                    style("✗").red(),
                    id,
                    style(task).red(),
                    style(format!("{:.1}s", duration.as_secs_f64())).dim(),
                    style(error).red().dim()
                );
            }
            TaskEvent::AllCompleted {
                total,
                succeeded,
                failed,
                cached,
                duration,
            } => {
                println!();
                println!(
                    "  {} {}/{} succeeded, {} failed, {} cached ({:.1}s)",
                    if *failed == 0 {
                        style("✓").green().bold()
                    } else {
                        style("✗").red().bold()
                    },
                    succeeded,
                    total,
                    failed,
                    cached,
                    duration.as_secs_f64()
                );
            }
        }
    }
}
