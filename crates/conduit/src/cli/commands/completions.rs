//! Shell completions

use std::io::Write;
use std::path::PathBuf;

use clap::{Args, CommandFactory};
use clap_complete::{generate, Shell};
use tracing::debug;

use crate::cli::{output, Cli};

/// Generate shell completions
#[derive(Debug, Args)]
pub struct CompletionsCommand {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,

    /// Write to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl CompletionsCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        debug!(shell = %self.shell, "generating completions");
        let mut buf = Vec::new();
        generate(self.shell, &mut Cli::command(), "conduit", &mut buf);

        match &self.output {
            Some(path) => {
                std::fs::write(path, &buf)?;
                if !cli.quiet {
                    output::success(&format!(
                        "Completions written to {}",
                        output::path_style().apply_to(path.display())
                    ));
                }
            }
            None => std::io::stdout().write_all(&buf)?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generates_bash_completions() {
        let mut buf = Vec::new();
        generate(Shell::Bash, &mut Cli::command(), "conduit", &mut buf);
        let script = String::from_utf8(buf).unwrap();
        assert!(script.contains("conduit"));
        assert!(script.contains("exec"));
    }
}
