//! Channel backend registry

use std::collections::HashMap;

use conduit_core::config::ChannelConfig;
use tracing::debug;

use crate::channel::Channel;
use crate::error::{ChannelError, Result};
use crate::local::LocalChannel;

/// Constructor for one channel backend
pub type ChannelFactory = Box<dyn Fn(&ChannelConfig) -> Result<Box<dyn Channel>> + Send + Sync>;

/// Registry of channel backends, keyed by `channel.kind`
pub struct ChannelRegistry {
    factories: HashMap<String, ChannelFactory>,
}

impl ChannelRegistry {
    /// Create a registry with the built-in backends
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register("local", |config| {
            Ok(Box::new(LocalChannel::from_config(config)) as Box<dyn Channel>)
        });
        registry
    }

    /// Create an empty registry
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a backend; a later registration for the same kind replaces the earlier one
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&ChannelConfig) -> Result<Box<dyn Channel>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Box::new(factory));
    }

    /// Construct a channel for `config.kind`
    pub fn open(&self, config: &ChannelConfig) -> Result<Box<dyn Channel>> {
        let factory = self
            .factories
            .get(&config.kind)
            .ok_or_else(|| ChannelError::UnknownKind(config.kind.clone()))?;
        debug!(kind = %config.kind, "opening channel");
        factory(config)
    }

    /// Registered backend kinds, sorted
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
