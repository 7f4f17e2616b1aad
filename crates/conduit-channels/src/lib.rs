//! Conduit Channels - uniform execution and file transport over compute targets
//!
//! A [`Channel`] runs commands and stages files against one compute resource.
//! Backends are selected at construction time through the [`ChannelRegistry`];
//! everything above this crate only sees the trait.

pub mod channel;
pub mod error;
pub mod local;
pub mod registry;

pub use channel::{
    Channel, EnvOverlay, ExecutionHandle, ExecutionResult, SPAWN_FAILURE_EXIT_CODE,
    TIMEOUT_EXIT_CODE,
};
pub use error::{ChannelError, Result};
pub use local::LocalChannel;
pub use registry::ChannelRegistry;
