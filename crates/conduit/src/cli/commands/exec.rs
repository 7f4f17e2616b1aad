//! Exec command - run one command on the configured channel

use std::time::Duration;

use clap::Args;
use console::style;
use tracing::info;

use conduit_channels::EnvOverlay;
use conduit_core::load_config_or_default;

use super::{open_channel, parse_key_value};
use crate::cli::{Cli, OutputFormat};

/// Run one command on the configured channel
#[derive(Debug, Args)]
pub struct ExecCommand {
    /// Walltime in seconds (default: channel.walltime from config)
    #[arg(long)]
    pub walltime: Option<u64>,

    /// Environment variable for the command (can be repeated)
    #[arg(long, value_parser = parse_key_value)]
    pub env: Vec<(String, String)>,

    /// Start through the non-blocking interface and print the process id first
    #[arg(long)]
    pub no_wait: bool,

    /// Command to run; joined with spaces and passed to the shell
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

impl ExecCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let runtime = tokio::runtime::Runtime::new()?;
        let exit_code = runtime.block_on(self.execute_async(cli))?;
        if exit_code != 0 {
            std::process::exit(exit_code);
        }
        Ok(())
    }

    async fn execute_async(&self, cli: &Cli) -> anyhow::Result<i32> {
        let cwd = std::env::current_dir()?;
        let (config, _) = load_config_or_default(&cwd);
        let channel = open_channel(&config)?;

        let command = self.command.join(" ");
        let walltime = Duration::from_secs(self.walltime.unwrap_or(config.channel.walltime));
        let envs: EnvOverlay = self.env.iter().cloned().collect();
        info!(command = %command, walltime_secs = walltime.as_secs(), "executing command");

        if self.no_wait {
            let handle = channel.execute_no_wait(&command, walltime, &envs).await?;
            let id = handle.id();
            if cli.format == OutputFormat::Json {
                println!("{}", serde_json::json!({ "id": id, "command": command }));
            } else if !cli.quiet {
                println!("{} started {}", style("→").blue(), style(&id).bold());
            }
            let result = handle.wait().await?;
            channel.close().await;
            return Ok(result.exit_code);
        }

        let result = channel.execute_wait_result(&command, walltime, &envs).await;
        channel.close().await;

        if cli.format == OutputFormat::Json {
            println!("{}", serde_json::to_string_pretty(&result)?);
            return Ok(result.exit_code);
        }

        if let Some(stdout) = &result.stdout {
            print!("{}", stdout);
        }
        if let Some(stderr) = &result.stderr {
            eprint!("{}", stderr);
        }
        if !cli.quiet && !result.success() {
            eprintln!(
                "{} exited with code {}",
                style("✗").red().bold(),
                style(result.exit_code).red()
            );
        }

        Ok(result.exit_code)
    }
}
