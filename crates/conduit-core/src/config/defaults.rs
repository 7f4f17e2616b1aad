//! Default configuration values

/// Default configuration file name (TOML)
pub const DEFAULT_CONFIG_TOML: &str = "conduit.toml";

/// Default configuration file name (YAML)
pub const DEFAULT_CONFIG_YAML: &str = "conduit.yaml";

/// Default channel backend
pub const DEFAULT_CHANNEL_KIND: &str = "local";

/// Default walltime for synchronous commands, in seconds
pub const DEFAULT_WALLTIME_SECS: u64 = 300;

/// Default permission bits for created directories: owner rwx, group/other rx
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// Get list of config file names to search for
pub fn config_file_names() -> Vec<&'static str> {
    vec![
        DEFAULT_CONFIG_TOML,
        DEFAULT_CONFIG_YAML,
        ".conduit.toml",
        ".conduit.yaml",
    ]
}

/// Generate default configuration TOML.
///
/// Uses the hand-written template so `dir_mode` stays in octal.
pub fn default_config_toml() -> String {
    DEFAULT_CONFIG_TEMPLATE.to_string()
}

/// Default configuration template
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# conduit configuration

[channel]
kind = "local"
walltime = 300
dir_mode = 0o755

[channel.env]

[memo]
enabled = true

[dispatch]
concurrency = 4
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_template_parses() {
        let config: Config = toml::from_str(DEFAULT_CONFIG_TEMPLATE).unwrap();
        assert_eq!(config.channel.dir_mode, DEFAULT_DIR_MODE);
        assert_eq!(config.dispatch.concurrency, 4);
    }

    #[test]
    fn test_default_config_toml_round_trips() {
        let rendered = default_config_toml();
        let config: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(config.channel.walltime, DEFAULT_WALLTIME_SECS);
    }

    #[test]
    fn test_default_config_toml_writes_octal_mode() {
        let rendered = default_config_toml();
        assert!(rendered.contains("dir_mode = 0o755"));
        assert!(!rendered.contains("493"));
    }
}
