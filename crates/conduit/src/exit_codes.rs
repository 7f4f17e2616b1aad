//! Exit codes for the CLI

/// General error
pub const ERROR: i32 = 1;

/// Configuration error
pub const CONFIG_ERROR: i32 = 2;

/// One or more dispatched tasks failed
pub const TASK_FAILED: i32 = 4;
