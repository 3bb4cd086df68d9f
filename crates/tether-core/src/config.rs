//! Session configuration.

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Configuration applied when a session root is created.
///
/// Children inherit `read_only` unless they override it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name attached to log events for this session.
    pub label: Option<String>,
    /// Default read-only policy for the root and its children.
    pub read_only: bool,
    /// Initial capacity of the deferred release queue.
    pub queue_capacity: usize,
    /// Drain the deferred queue whenever a child is constructed.
    pub drain_on_create: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            label: None,
            read_only: false,
            queue_capacity: 8,
            drain_on_create: true,
        }
    }
}

impl SessionConfig {
    /// Create a default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Set the session label.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the default read-only policy.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Set the initial deferred queue capacity.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Enable/disable the drain performed on child construction.
    pub fn drain_on_create(mut self, enabled: bool) -> Self {
        self.drain_on_create = enabled;
        self
    }
}
