//! Per-key propagation settings.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Propagation settings of a single context key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyPolicy {
    /// Visible to nested calls within the process.
    #[serde(default)]
    pub down_propagation: bool,
    /// Merged back into the enclosing call when the node closes.
    #[serde(default)]
    pub up_propagation: bool,
    /// Eligible for tag export and for the wire codec.
    #[serde(default)]
    pub taggable: bool,
}

impl KeyPolicy {
    /// A key that neither propagates nor is exported.
    pub const LOCAL: Self = Self {
        down_propagation: false,
        up_propagation: false,
        taggable: false,
    };

    /// Creates a policy with all flags off.
    #[must_use]
    pub const fn new() -> Self {
        Self::LOCAL
    }

    /// Enables down-propagation.
    #[must_use]
    pub const fn down(mut self) -> Self {
        self.down_propagation = true;
        self
    }

    /// Enables up-propagation.
    #[must_use]
    pub const fn up(mut self) -> Self {
        self.up_propagation = true;
        self
    }

    /// Marks the key as taggable.
    #[must_use]
    pub const fn taggable(mut self) -> Self {
        self.taggable = true;
        self
    }
}

/// The propagation table supplied by the configuration subsystem.
///
/// Keys without an entry neither propagate nor are taggable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationPolicy {
    /// Settings keyed by context key.
    #[serde(default)]
    pub keys: HashMap<String, KeyPolicy>,
}

impl PropagationPolicy {
    /// Creates an empty policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the settings of a key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>, policy: KeyPolicy) -> Self {
        self.keys.insert(key.into(), policy);
        self
    }

    /// Returns the settings for a key.
    #[must_use]
    pub fn get(&self, key: &str) -> KeyPolicy {
        self.keys.get(key).copied().unwrap_or(KeyPolicy::LOCAL)
    }

    /// Returns true if the key propagates down.
    #[must_use]
    pub fn is_down_propagated(&self, key: &str) -> bool {
        self.get(key).down_propagation
    }

    /// Returns true if the key propagates up.
    #[must_use]
    pub fn is_up_propagated(&self, key: &str) -> bool {
        self.get(key).up_propagation
    }

    /// Returns true if the key is taggable.
    #[must_use]
    pub fn is_taggable(&self, key: &str) -> bool {
        self.get(key).taggable
    }
}
