//! Key command - print the cache key of an invocation

use clap::Args;
use tracing::info;

use conduit_tasks::{Invocation, Value};

use super::parse_key_value;
use crate::cli::{output, Cli, OutputFormat};

/// Print the cache key of a task invocation
#[derive(Debug, Args)]
pub struct KeyCommand {
    /// Task name
    pub name: String,

    /// Command template the task runs
    pub command: String,

    /// Positional argument, parsed as JSON when possible (can be repeated)
    #[arg(long = "arg")]
    pub args: Vec<String>,

    /// Keyword argument as NAME=VALUE (can be repeated)
    #[arg(long = "kwarg", value_parser = parse_key_value)]
    pub kwargs: Vec<(String, String)>,
}

impl KeyCommand {
    /// Build the invocation described by the arguments
    pub fn invocation(&self) -> Invocation {
        let mut invocation = Invocation::new(&self.name, &self.command);
        for arg in &self.args {
            invocation = invocation.with_arg(Value::parse_cli(arg));
        }
        for (name, value) in &self.kwargs {
            invocation = invocation.with_kwarg(name, Value::parse_cli(value));
        }
        invocation
    }

    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let invocation = self.invocation();
        let registry = conduit_tasks::HashRegistry::global();
        let key = conduit_tasks::CacheKey::derive(
            &registry,
            &invocation.task,
            &invocation.args,
            &invocation.kwargs,
        )?;
        info!(task = %invocation.task, key = %key, "derived key");

        if cli.format == OutputFormat::Json {
            let result = serde_json::json!({
                "task": invocation.task.name,
                "fingerprint": invocation.task.fingerprint,
                "key": key,
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else if cli.quiet {
            println!("{}", key);
        } else {
            println!("{}", output::header(&invocation.task.to_string()));
            println!("{}", output::key_value("fingerprint", &invocation.task.fingerprint));
            println!(
                "{}",
                output::key_value("key", &output::key_style().apply_to(key).to_string())
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct Harness {
        #[command(flatten)]
        key: KeyCommand,
    }

    #[test]
    fn test_kwarg_order_does_not_change_key() {
        let registry = conduit_tasks::HashRegistry::new();
        let derive = |argv: &[&str]| {
            let inv = Harness::parse_from(argv).key.invocation();
            conduit_tasks::CacheKey::derive(&registry, &inv.task, &inv.args, &inv.kwargs).unwrap()
        };

        let a = derive(&["k", "t", "echo", "--kwarg", "a=1", "--kwarg", "b=2"]);
        let b = derive(&["k", "t", "echo", "--kwarg", "b=2", "--kwarg", "a=1"]);
        let c = derive(&["k", "t", "echo", "--kwarg", "a=1", "--kwarg", "b=3"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_args_are_parsed_as_json() {
        let inv = Harness::parse_from(["k", "t", "echo {0}", "--arg", "[1, 2]"])
            .key
            .invocation();
        assert!(matches!(inv.args[0], Value::List(ref items) if items.len() == 2));
    }
}
