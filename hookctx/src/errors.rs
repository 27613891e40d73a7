//! Error types for the hook context core.
//!
//! Every error kind is contained at the component that detects it. Only the
//! configuration-time errors (cycles, unknown rules, bad config files) and
//! lifecycle misuse by the instrumentation engine are returned as `Result`;
//! decode warnings and action failures are logged and reported to the event
//! sink instead.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// The main error type for hook context operations.
#[derive(Debug, Error)]
pub enum HookError {
    /// Action dependencies of a rule form a cycle.
    #[error("{0}")]
    CyclicDependency(#[from] CyclicDependencyError),

    /// A hook invocation was driven out of order.
    #[error("{0}")]
    InvalidTransition(#[from] InvalidTransitionError),

    /// No rule is registered under the requested id.
    #[error("Unknown rule: {0}")]
    UnknownRule(String),

    /// The configuration could not be parsed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for HookError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Metadata about a configuration error for better diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "RULE-001-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Converts to a JSON object, suitable for event payloads.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Raised by the dependency resolver when no valid action order exists.
///
/// `cycle` lists the action names in the order they were found on the
/// traversal stack, starting at the first occurrence of the repeated action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cyclic dependency between actions: {}", render_cycle(.cycle))]
pub struct CyclicDependencyError {
    /// The action names forming the cycle.
    pub cycle: Vec<String>,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl CyclicDependencyError {
    /// Creates a new cyclic dependency error.
    #[must_use]
    pub fn new(cycle: Vec<String>) -> Self {
        let info = ContractErrorInfo::new(
            "RULE-001-CYCLE",
            format!("Actions depend on each other in a cycle: {}", render_cycle(&cycle)),
        )
        .with_fix_hint(
            "Remove one of the data dependencies in the cycle, or declare the read as \
             reads-before-written.",
        );

        Self {
            cycle,
            error_info: info,
        }
    }

    /// Records where the cycle was found, e.g. the rule id and phase.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.error_info = self.error_info.with_context_entry(key, value);
        self
    }
}

fn render_cycle(cycle: &[String]) -> String {
    match cycle.first() {
        Some(first) => format!("{} -> {}", cycle.join(" -> "), first),
        None => String::new(),
    }
}

/// Raised when `get_data`/`set_data` is called on a node that was already closed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Context node {node_id} accessed after close ({operation} '{key}')")]
pub struct ClosedNodeAccessError {
    /// Id of the closed node.
    pub node_id: u64,
    /// The attempted operation.
    pub operation: &'static str,
    /// The key involved.
    pub key: String,
}

impl ClosedNodeAccessError {
    /// Creates a new closed node access error.
    #[must_use]
    pub fn new(node_id: u64, operation: &'static str, key: impl Into<String>) -> Self {
        Self {
            node_id,
            operation,
            key: key.into(),
        }
    }
}

/// Raised when a hook invocation is driven through an illegal state change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cannot {operation} hook invocation in state {state}")]
pub struct InvalidTransitionError {
    /// The attempted operation.
    pub operation: &'static str,
    /// The state the invocation was in.
    pub state: String,
}

impl InvalidTransitionError {
    /// Creates a new invalid transition error.
    #[must_use]
    pub fn new(operation: &'static str, state: impl fmt::Display) -> Self {
        Self {
            operation,
            state: state.to_string(),
        }
    }
}

/// A runtime failure of a single action.
///
/// Never returned to the instrumented application; the scheduler logs it,
/// reports it to the event sink and disables the action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Action '{action}' of rule '{rule}' failed: {reason}")]
pub struct ActionExecutionError {
    /// The rule the action belongs to.
    pub rule: String,
    /// The action name.
    pub action: String,
    /// The failure description.
    pub reason: String,
    /// Whether the action panicked rather than returning an error.
    pub panicked: bool,
}

impl ActionExecutionError {
    /// Creates an error for an action that returned `Err`.
    #[must_use]
    pub fn failed(rule: impl Into<String>, action: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            action: action.into(),
            reason: reason.into(),
            panicked: false,
        }
    }

    /// Creates an error for an action that panicked.
    #[must_use]
    pub fn panicked(rule: impl Into<String>, action: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            action: action.into(),
            reason: reason.into(),
            panicked: true,
        }
    }

    /// Converts to an event payload.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "rule": &self.rule,
            "action": &self.action,
            "reason": &self.reason,
            "panicked": self.panicked,
        })
    }
}

/// A non-fatal problem with one pair of an inbound propagation header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecDecodeWarning {
    /// The offending header segment, as received.
    pub segment: String,
    /// What went wrong.
    pub reason: String,
}

impl CodecDecodeWarning {
    /// Creates a new decode warning.
    #[must_use]
    pub fn new(segment: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            segment: segment.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for CodecDecodeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dropped propagation pair '{}': {}", self.segment, self.reason)
    }
}
