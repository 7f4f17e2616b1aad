//! Config command - inspect configuration

use clap::{Args, Subcommand};
use console::style;

use conduit_core::config::default_config_toml;
use conduit_core::{load_config_from_dir, load_config_or_default, ConfigError, ConduitError};

use crate::cli::{output, Cli, OutputFormat};
use crate::exit_codes;

/// Inspect configuration
#[derive(Debug, Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Validate the configuration file
    Validate,
    /// Print a default configuration file
    Default,
}

impl ConfigCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let cwd = std::env::current_dir()?;

        match self.action {
            ConfigAction::Show => {
                let (config, path) = load_config_or_default(&cwd);
                if cli.format == OutputFormat::Json {
                    println!("{}", serde_json::to_string_pretty(&config)?);
                    return Ok(());
                }
                if !cli.quiet {
                    let source = path
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "defaults".to_string());
                    println!("{}", output::header("Configuration"));
                    println!(
                        "{}",
                        output::key_value("source", &output::path_style().apply_to(source).to_string())
                    );
                    println!();
                }
                print!("{}", toml::to_string_pretty(&config)?);
            }
            ConfigAction::Validate => match load_config_from_dir(&cwd) {
                Ok((_, path)) => {
                    if cli.format == OutputFormat::Json {
                        println!(
                            "{}",
                            serde_json::json!({ "valid": true, "path": path })
                        );
                    } else if !cli.quiet {
                        output::success(&format!("{} is valid", path.display()));
                    }
                }
                Err(ConduitError::Config(ConfigError::NotFound(dir))) => {
                    output::error(&format!("No configuration found in {}", dir.display()));
                    std::process::exit(exit_codes::CONFIG_ERROR);
                }
                Err(e) => {
                    if cli.format == OutputFormat::Json {
                        println!(
                            "{}",
                            serde_json::json!({ "valid": false, "error": e.to_string() })
                        );
                    } else {
                        output::error(&format!("{} {}", style("Invalid configuration:").bold(), e));
                    }
                    std::process::exit(exit_codes::CONFIG_ERROR);
                }
            },
            ConfigAction::Default => {
                print!("{}", default_config_toml());
            }
        }

        Ok(())
    }
}
