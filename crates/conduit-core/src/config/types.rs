//! Configuration types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use super::defaults::{DEFAULT_CHANNEL_KIND, DEFAULT_DIR_MODE, DEFAULT_WALLTIME_SECS};

/// Main configuration for conduit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Execution channel configuration
    pub channel: ChannelConfig,

    /// Memoization configuration
    pub memo: MemoConfig,

    /// Dispatcher configuration
    pub dispatch: DispatchConfig,
}

/// Execution channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Backend kind (currently only "local")
    pub kind: String,

    /// Directory on the target for internal scripts and logs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_dir: Option<PathBuf>,

    /// Default walltime in seconds for synchronous commands
    pub walltime: u64,

    /// Environment overlay applied to every command
    pub env: HashMap<String, String>,

    /// Permission bits for directories the channel creates
    pub dir_mode: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            kind: DEFAULT_CHANNEL_KIND.to_string(),
            script_dir: None,
            walltime: DEFAULT_WALLTIME_SECS,
            env: HashMap::new(),
            dir_mode: DEFAULT_DIR_MODE,
        }
    }
}

/// Memoization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoConfig {
    /// Whether cacheable invocations are memoized at all
    pub enabled: bool,
}

impl Default for MemoConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Maximum number of invocations executing at once
    pub concurrency: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency: num_cpus(),
        }
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
