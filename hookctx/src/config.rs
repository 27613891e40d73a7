//! Configuration supplied by the agent's configuration subsystem.
//!
//! Everything here is plain data. [`AgentConfig`] can be built in code or
//! parsed from JSON; every section and field has a default.

use crate::codec::DEFAULT_HEADER_NAME;
use crate::context::{ClosedAccessMode, PropagationPolicy};
use crate::errors::HookError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Per-key propagation settings.
    #[serde(default)]
    pub propagation: PropagationPolicy,
    /// Wire codec settings.
    #[serde(default)]
    pub codec: CodecConfig,
    /// Scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AgentConfig {
    /// Parses a JSON document.
    ///
    /// # Errors
    ///
    /// Returns `HookError::Config` if the document is invalid.
    pub fn from_json_str(json: &str) -> Result<Self, HookError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `HookError::Io` if the file cannot be read and
    /// `HookError::Config` if it is invalid.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, HookError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }
}

/// Wire codec settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecConfig {
    /// Name of the transport header carrying propagated data.
    #[serde(default = "default_header_name")]
    pub header_name: String,
}

fn default_header_name() -> String {
    DEFAULT_HEADER_NAME.to_string()
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            header_name: default_header_name(),
        }
    }
}

/// Scheduler settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Reaction to reads and writes on closed nodes.
    #[serde(default)]
    pub closed_access: ClosedAccessMode,
}

/// Logging settings used by [`crate::observability::init_logging`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `hookctx=debug`.
    /// Overridden by `RUST_LOG` when set.
    #[serde(default = "default_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable text.
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}
