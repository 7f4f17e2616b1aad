//! CLI commands

mod channel;
mod completions;
mod config;
mod exec;
mod key;
mod run;

pub use channel::ChannelCommand;
pub use completions::CompletionsCommand;
pub use config::ConfigCommand;
pub use exec::ExecCommand;
pub use key::KeyCommand;
pub use run::RunCommand;

use std::sync::Arc;

use anyhow::Context;
use conduit_channels::{Channel, ChannelRegistry};
use conduit_core::Config;

/// Open the channel described by the configuration
pub(crate) fn open_channel(config: &Config) -> anyhow::Result<Arc<dyn Channel>> {
    let channel = ChannelRegistry::new()
        .open(&config.channel)
        .with_context(|| format!("Failed to open '{}' channel", config.channel.kind))?;
    Ok(Arc::from(channel))
}

/// Parse a `KEY=VALUE` argument
pub(crate) fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

/// Parse octal permission bits such as `755` or `0o700`
pub(crate) fn parse_mode(raw: &str) -> Result<u32, String> {
    let digits = raw.trim_start_matches("0o");
    match u32::from_str_radix(digits, 8) {
        Ok(mode) if mode <= 0o7777 => Ok(mode),
        _ => Err(format!("invalid octal mode '{}'", raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("A=1=2"),
            Ok(("A".to_string(), "1=2".to_string()))
        );
        assert_eq!(parse_key_value("A="), Ok(("A".to_string(), String::new())));
        assert!(parse_key_value("=1").is_err());
        assert!(parse_key_value("A").is_err());
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("755"), Ok(0o755));
        assert_eq!(parse_mode("0o700"), Ok(0o700));
        assert!(parse_mode("888").is_err());
        assert!(parse_mode("17777").is_err());
    }

    #[test]
    fn test_open_default_channel() {
        let channel = open_channel(&Config::default()).unwrap();
        assert_eq!(channel.kind(), "local");
    }
}
