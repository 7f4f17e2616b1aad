//! Conduit Core - shared foundation for the conduit dispatch layer
//!
//! This crate provides the error types and configuration system used by the
//! channel backends, the memoization engine and the CLI.

pub mod config;
pub mod error;

pub use config::{
    load_config, load_config_from_dir, load_config_or_default, ChannelConfig, Config,
    DispatchConfig, MemoConfig,
};
pub use error::{ConduitError, ConfigError, Result};
