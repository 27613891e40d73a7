//! Execution of rules around intercepted method calls.
//!
//! The instrumentation engine registers rules once and then, for every
//! intercepted call, opens a [`HookInvocation`] and drives it through
//! `activate`, `run_entry`, `run_exit` and `close`. Each invocation owns a
//! fresh [`ContextNode`] nested under the caller's current node.

mod action;
mod invocation;
mod rule;

#[cfg(test)]
mod integration_tests;

pub use action::{Action, ActionCall, ActionContext, FnAction, MethodFrame};
pub use invocation::{ActionReport, HookInvocation, HookState};
pub use rule::{HookPhase, Rule};

use crate::config::AgentConfig;
use crate::context::{ClosedAccessMode, ContextNode, PropagationPolicy};
use crate::errors::HookError;
use crate::events::{self, EventSink};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rule::CompiledRule;
use std::sync::Arc;

/// Outcome of [`Scheduler::register_rule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The rule was new or changed and its plans were resolved.
    Compiled,
    /// An identical rule was already registered; its plans are reused.
    Unchanged,
}

/// Registry of compiled rules and factory for hook invocations.
pub struct Scheduler {
    policy: Arc<PropagationPolicy>,
    closed_access: ClosedAccessMode,
    rules: DashMap<String, Arc<CompiledRule>>,
    events: Arc<dyn EventSink>,
}

impl Scheduler {
    /// Creates a scheduler reporting to the process-wide event sink.
    #[must_use]
    pub fn new(policy: Arc<PropagationPolicy>) -> Self {
        Self {
            policy,
            closed_access: ClosedAccessMode::default(),
            rules: DashMap::new(),
            events: events::get_event_sink(),
        }
    }

    /// Creates a scheduler from configuration.
    #[must_use]
    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(Arc::new(config.propagation.clone()))
            .with_closed_access(config.scheduler.closed_access)
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Sets the reaction to closed-node access for nodes opened from now on.
    #[must_use]
    pub fn with_closed_access(mut self, mode: ClosedAccessMode) -> Self {
        self.closed_access = mode;
        self
    }

    /// Returns the propagation policy.
    #[must_use]
    pub fn policy(&self) -> &Arc<PropagationPolicy> {
        &self.policy
    }

    /// Registers or replaces a rule.
    ///
    /// Plans are only re-resolved if the rule's actions differ from the
    /// registered ones. Invocations already open keep the plans they started
    /// with.
    ///
    /// # Errors
    ///
    /// Returns `HookError::CyclicDependency` if either phase cannot be
    /// ordered. The previously registered version, if any, stays in place.
    pub fn register_rule(&self, rule: Rule) -> Result<Registration, HookError> {
        let id = rule.id.clone();
        // The shard stays locked from the comparison to the insert.
        let compiled = match self.rules.entry(id.clone()) {
            Entry::Occupied(existing) if existing.get().source().same_actions(&rule) => {
                tracing::debug!(rule = %id, "Rule unchanged, keeping compiled plans");
                return Ok(Registration::Unchanged);
            }
            slot => {
                let compiled = Arc::new(CompiledRule::compile(rule).map_err(|err| {
                    tracing::warn!(rule = %id, error = %err, "Rule rejected");
                    err
                })?);
                slot.insert(Arc::clone(&compiled));
                compiled
            }
        };

        let entry = compiled.plan(HookPhase::Entry);
        let exit = compiled.plan(HookPhase::Exit);
        tracing::info!(
            rule = %id,
            entry_actions = entry.len(),
            exit_actions = exit.len(),
            entry_fingerprint = %entry.fingerprint(),
            exit_fingerprint = %exit.fingerprint(),
            "Rule compiled"
        );
        self.events.emit(
            "rule.compiled",
            Some(serde_json::json!({
                "rule": &id,
                "entry": entry.names(),
                "exit": exit.names(),
                "entry_fingerprint": entry.fingerprint(),
                "exit_fingerprint": exit.fingerprint(),
            })),
        );
        Ok(Registration::Compiled)
    }

    /// Removes a rule. Returns false if it was not registered.
    pub fn unregister_rule(&self, rule_id: &str) -> bool {
        let removed = self.rules.remove(rule_id).is_some();
        if removed {
            tracing::debug!(rule = rule_id, "Rule unregistered");
        }
        removed
    }

    /// Returns true if a rule is registered under `rule_id`.
    #[must_use]
    pub fn has_rule(&self, rule_id: &str) -> bool {
        self.rules.contains_key(rule_id)
    }

    /// Returns the resolved action names of one phase of a rule.
    #[must_use]
    pub fn plan_names(&self, rule_id: &str, phase: HookPhase) -> Option<Vec<String>> {
        self.rules.get(rule_id).map(|rule| {
            rule.plan(phase)
                .names()
                .into_iter()
                .map(str::to_string)
                .collect()
        })
    }

    /// Returns the actions of a rule disabled after failing.
    #[must_use]
    pub fn disabled_actions(&self, rule_id: &str) -> Vec<(HookPhase, String)> {
        self.rules
            .get(rule_id)
            .map(|rule| rule.disabled_actions())
            .unwrap_or_default()
    }

    /// Opens an invocation of a rule.
    ///
    /// The new node is a child of `parent`, or of the node current for the
    /// calling execution unit when `parent` is `None`, or a root.
    ///
    /// # Errors
    ///
    /// Returns `HookError::UnknownRule` if no rule has that id.
    pub fn open(&self, parent: Option<&ContextNode>, rule_id: &str) -> Result<HookInvocation, HookError> {
        let rule = self
            .rules
            .get(rule_id)
            .map(|rule| Arc::clone(rule.value()))
            .ok_or_else(|| HookError::UnknownRule(rule_id.to_string()))?;

        let parent = parent.cloned().or_else(ContextNode::current);
        let node = ContextNode::with_options(parent, Arc::clone(&self.policy), self.closed_access);
        Ok(HookInvocation::new(rule, node, Arc::clone(&self.events)))
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("rules", &self.rules.len())
            .field("closed_access", &self.closed_access)
            .finish_non_exhaustive()
    }
}
