//! Declarations of what an action call reads and writes.

use crate::context::ContextValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A boolean precondition on one context key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "when", content = "key", rename_all = "snake_case")]
pub enum GuardCondition {
    /// Run only if the key holds `true`.
    OnlyIfTrue(String),
    /// Run only if the key holds `false`.
    OnlyIfFalse(String),
    /// Run only if the key has a value.
    OnlyIfPresent(String),
    /// Run only if the key has no value.
    OnlyIfAbsent(String),
}

impl GuardCondition {
    /// Returns the key the condition inspects.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::OnlyIfTrue(key)
            | Self::OnlyIfFalse(key)
            | Self::OnlyIfPresent(key)
            | Self::OnlyIfAbsent(key) => key,
        }
    }

    /// Evaluates the condition against the key's current value.
    ///
    /// The boolean conditions only accept boolean values; anything else,
    /// including absence, fails them.
    #[must_use]
    pub fn is_satisfied(&self, value: Option<&ContextValue>) -> bool {
        match self {
            Self::OnlyIfTrue(_) => value.and_then(ContextValue::as_bool) == Some(true),
            Self::OnlyIfFalse(_) => value.and_then(ContextValue::as_bool) == Some(false),
            Self::OnlyIfPresent(_) => value.is_some(),
            Self::OnlyIfAbsent(_) => value.is_none(),
        }
    }
}

impl fmt::Display for GuardCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnlyIfTrue(key) => write!(f, "only-if-true({key})"),
            Self::OnlyIfFalse(key) => write!(f, "only-if-false({key})"),
            Self::OnlyIfPresent(key) => write!(f, "only-if-present({key})"),
            Self::OnlyIfAbsent(key) => write!(f, "only-if-absent({key})"),
        }
    }
}

/// Declaration of one action call within a rule.
///
/// Keys inspected by guard conditions count as reads for ordering purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionCallDescriptor {
    /// Name of the call, used for deterministic ordering and diagnostics.
    pub name: String,
    /// Keys read by the action.
    #[serde(default)]
    pub reads: BTreeSet<String>,
    /// Keys written by the action.
    #[serde(default)]
    pub writes: BTreeSet<String>,
    /// Keys the action must read before anything in the scope writes them.
    #[serde(default)]
    pub reads_before_written: BTreeSet<String>,
    /// Preconditions that must hold for the action to run.
    #[serde(default)]
    pub guards: Vec<GuardCondition>,
}

impl ActionCallDescriptor {
    /// Creates a descriptor without any keys.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reads: BTreeSet::new(),
            writes: BTreeSet::new(),
            reads_before_written: BTreeSet::new(),
            guards: Vec::new(),
        }
    }

    /// Adds read keys.
    #[must_use]
    pub fn with_reads(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.reads.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Adds written keys.
    #[must_use]
    pub fn with_writes(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.writes.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Adds keys that must be read before they are written.
    #[must_use]
    pub fn with_reads_before_written(
        mut self,
        keys: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.reads_before_written
            .extend(keys.into_iter().map(Into::into));
        self
    }

    /// Adds a guard condition.
    #[must_use]
    pub fn with_guard(mut self, guard: GuardCondition) -> Self {
        self.guards.push(guard);
        self
    }

    /// Keys that order this action after their writers: plain reads plus
    /// guard keys, minus the reads-before-written keys.
    #[must_use]
    pub fn ordering_reads(&self) -> BTreeSet<&str> {
        self.reads
            .iter()
            .map(String::as_str)
            .chain(self.guards.iter().map(GuardCondition::key))
            .filter(|key| !self.reads_before_written.contains(*key))
            .collect()
    }
}

impl AsRef<Self> for ActionCallDescriptor {
    fn as_ref(&self) -> &Self {
        self
    }
}
