//! CLI definition and command handling

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};

use commands::{
    ChannelCommand, CompletionsCommand, ConfigCommand, ExecCommand, KeyCommand, RunCommand,
};

/// Conduit - run commands through execution channels with memoized dispatch
#[derive(Debug, Parser)]
#[command(name = "conduit")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Working directory
    #[arg(short = 'C', long, global = true)]
    pub directory: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output
    Json,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run one command on the configured channel
    Exec(ExecCommand),

    /// Dispatch a batch of task invocations with memoization
    Run(RunCommand),

    /// Print the cache key of a task invocation
    Key(KeyCommand),

    /// Direct channel operations
    Channel(ChannelCommand),

    /// Inspect configuration
    Config(ConfigCommand),

    /// Generate shell completions
    Completions(CompletionsCommand),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> anyhow::Result<()> {
        // Change to specified directory if provided
        if let Some(dir) = &self.directory {
            std::env::set_current_dir(dir)?;
        }

        match self.command {
            Commands::Exec(ref cmd) => cmd.execute(&self),
            Commands::Run(ref cmd) => cmd.execute(&self),
            Commands::Key(ref cmd) => cmd.execute(&self),
            Commands::Channel(ref cmd) => cmd.execute(&self),
            Commands::Config(ref cmd) => cmd.execute(&self),
            Commands::Completions(ref cmd) => cmd.execute(&self),
        }
    }
}
