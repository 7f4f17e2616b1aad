//! Configuration validation

use tracing::debug;

use crate::error::{ConfigError, Result};

use super::types::Config;

/// Channel backends known to the CLI
pub const KNOWN_CHANNEL_KINDS: &[&str] = &["local"];

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    debug!("validating configuration");
    validate_channel(config)?;
    validate_dispatch(config)?;
    debug!("configuration validation passed");
    Ok(())
}

fn validate_channel(config: &Config) -> Result<()> {
    if !KNOWN_CHANNEL_KINDS.contains(&config.channel.kind.as_str()) {
        return Err(ConfigError::invalid(
            "channel.kind",
            format!("must be one of: {}", KNOWN_CHANNEL_KINDS.join(", ")),
        )
        .into());
    }

    if config.channel.walltime == 0 {
        return Err(ConfigError::invalid("channel.walltime", "must be greater than zero").into());
    }

    if config.channel.dir_mode > 0o7777 {
        return Err(ConfigError::invalid(
            "channel.dir_mode",
            format!("{:#o} is not a valid permission mode", config.channel.dir_mode),
        )
        .into());
    }

    if let Some(name) = config.channel.env.keys().find(|k| k.is_empty() || k.contains('=')) {
        return Err(ConfigError::invalid(
            "channel.env",
            format!("invalid variable name '{}'", name),
        )
        .into());
    }

    Ok(())
}

fn validate_dispatch(config: &Config) -> Result<()> {
    if config.dispatch.concurrency == 0 {
        return Err(
            ConfigError::invalid("dispatch.concurrency", "must be greater than zero").into(),
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        let config = Config::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_unknown_kind() {
        let mut config = Config::default();
        config.channel.kind = "carrier-pigeon".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_bad_mode() {
        let mut config = Config::default();
        config.channel.dir_mode = 0o17777;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_bad_env_name() {
        let mut config = Config::default();
        config.channel.env.insert("A=B".to_string(), "x".to_string());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_concurrency() {
        let mut config = Config::default();
        config.dispatch.concurrency = 0;
        assert!(validate_config(&config).is_err());
    }
}
