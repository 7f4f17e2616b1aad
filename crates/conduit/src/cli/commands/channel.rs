//! Channel command - direct channel operations

use std::path::PathBuf;

use clap::{Args, Subcommand};
use tracing::info;

use conduit_core::load_config_or_default;
use conduit_tasks::{stage_in, File};

use super::{open_channel, parse_mode};
use crate::cli::{output, Cli, OutputFormat};
use crate::exit_codes;

/// Direct channel operations
#[derive(Debug, Args)]
pub struct ChannelCommand {
    #[command(subcommand)]
    pub action: ChannelAction,
}

/// Channel subcommands
#[derive(Debug, Subcommand)]
pub enum ChannelAction {
    /// Create a directory and its parents on the target
    Mkdir {
        path: PathBuf,
        /// Permission bits in octal (default: channel.dir_mode from config)
        #[arg(long, value_parser = parse_mode)]
        mode: Option<u32>,
        /// Fail if the directory already exists
        #[arg(long)]
        strict: bool,
    },
    /// Exit 0 if the path is a directory on the target
    Isdir { path: PathBuf },
    /// Resolve a path against the target's filesystem
    Abspath { path: PathBuf },
    /// Copy a local file into a directory on the target
    Push { source: PathBuf, dest_dir: PathBuf },
    /// Stage a file argument (`file://` URL or plain path) into a working directory
    Stage { url: String, working_dir: PathBuf },
}

impl ChannelCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let runtime = tokio::runtime::Runtime::new()?;
        let ok = runtime.block_on(self.execute_async(cli))?;
        if !ok {
            std::process::exit(exit_codes::ERROR);
        }
        Ok(())
    }

    async fn execute_async(&self, cli: &Cli) -> anyhow::Result<bool> {
        let cwd = std::env::current_dir()?;
        let (config, _) = load_config_or_default(&cwd);
        let channel = open_channel(&config)?;
        info!(kind = channel.kind(), action = ?self.action, "channel operation");

        let json = cli.format == OutputFormat::Json;
        let ok = match &self.action {
            ChannelAction::Mkdir { path, mode, strict } => {
                let mode = mode.unwrap_or(config.channel.dir_mode);
                channel.makedirs(path, mode, !strict).await?;
                let created = channel.abspath(path);
                if json {
                    println!(
                        "{}",
                        serde_json::json!({ "path": created, "mode": format!("{:o}", mode) })
                    );
                } else if !cli.quiet {
                    output::success(&format!(
                        "{} ({:o})",
                        output::path_style().apply_to(created.display()),
                        mode
                    ));
                }
                true
            }
            ChannelAction::Isdir { path } => {
                let is_dir = channel.isdir(path).await?;
                if json {
                    println!("{}", serde_json::json!({ "path": path, "isdir": is_dir }));
                } else if !cli.quiet {
                    println!("{}", is_dir);
                }
                is_dir
            }
            ChannelAction::Abspath { path } => {
                let resolved = channel.abspath(path);
                if json {
                    println!("{}", serde_json::json!({ "path": resolved }));
                } else {
                    println!("{}", resolved.display());
                }
                true
            }
            ChannelAction::Push { source, dest_dir } => {
                let dest = channel.push_file(source, dest_dir).await?;
                if json {
                    println!("{}", serde_json::json!({ "source": source, "dest": dest }));
                } else if !cli.quiet {
                    output::success(&format!(
                        "{} -> {}",
                        source.display(),
                        output::path_style().apply_to(dest.display())
                    ));
                }
                true
            }
            ChannelAction::Stage { url, working_dir } => {
                let file = File::parse(url.as_str());
                let staged = stage_in(channel.as_ref(), &file, working_dir).await?;
                let local = staged.filepath();
                if json {
                    println!("{}", serde_json::json!({ "url": staged.url(), "staged": local }));
                } else if !cli.quiet {
                    output::success(&format!(
                        "{} -> {}",
                        staged.url(),
                        output::path_style().apply_to(local.display())
                    ));
                }
                true
            }
        };

        channel.close().await;
        Ok(ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct Harness {
        #[command(subcommand)]
        action: ChannelAction,
    }

    #[test]
    fn test_parse_mkdir_mode() {
        let harness = Harness::parse_from(["c", "mkdir", "out/logs", "--mode", "700", "--strict"]);
        match harness.action {
            ChannelAction::Mkdir { path, mode, strict } => {
                assert_eq!(path, PathBuf::from("out/logs"));
                assert_eq!(mode, Some(0o700));
                assert!(strict);
            }
            other => panic!("unexpected action: {:?}", other),
        }
    }

    #[test]
    fn test_parse_push() {
        let harness = Harness::parse_from(["c", "push", "a.txt", "work"]);
        assert!(matches!(harness.action, ChannelAction::Push { .. }));
    }

    #[test]
    fn test_parse_stage() {
        let harness = Harness::parse_from(["c", "stage", "file:///tmp/in.csv", "work"]);
        match harness.action {
            ChannelAction::Stage { url, working_dir } => {
                assert_eq!(url, "file:///tmp/in.csv");
                assert_eq!(working_dir, PathBuf::from("work"));
            }
            other => panic!("unexpected action: {:?}", other),
        }
    }
}
