//! One run of a rule against one intercepted method call.

use super::rule::CompiledRule;
use super::{ActionCall, ActionContext, HookPhase, MethodFrame};
use crate::context::ContextNode;
use crate::errors::{ActionExecutionError, InvalidTransitionError};
use crate::events::EventSink;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use uuid::Uuid;

/// Lifecycle state of a hook invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookState {
    /// Opened, node not yet current.
    Created,
    /// Node is current; actions may run.
    Active,
    /// Node closed; nothing more may run.
    Closed,
}

impl fmt::Display for HookState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Active => write!(f, "active"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Outcome counts for one phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionReport {
    /// Actions that ran to completion.
    pub executed: usize,
    /// Actions skipped by a guard condition.
    pub skipped: usize,
    /// Actions skipped because an earlier failure disabled them.
    pub disabled: usize,
    /// Actions that failed during this run.
    pub failed: usize,
}

/// Drives one rule through `Created -> Active -> Closed` for a single
/// method invocation.
///
/// Dropping an invocation that was not closed closes it.
pub struct HookInvocation {
    id: Uuid,
    rule: Arc<CompiledRule>,
    node: ContextNode,
    state: HookState,
    events: Arc<dyn EventSink>,
}

impl HookInvocation {
    pub(crate) fn new(rule: Arc<CompiledRule>, node: ContextNode, events: Arc<dyn EventSink>) -> Self {
        Self {
            id: Uuid::new_v4(),
            rule,
            node,
            state: HookState::Created,
            events,
        }
    }

    /// Returns the invocation id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the rule id.
    #[must_use]
    pub fn rule_id(&self) -> &str {
        self.rule.id()
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> HookState {
        self.state
    }

    /// Returns the invocation's context node.
    #[must_use]
    pub fn node(&self) -> &ContextNode {
        &self.node
    }

    /// Makes the node current for the calling execution unit.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransitionError` unless the invocation is `Created`.
    pub fn activate(&mut self) -> Result<(), InvalidTransitionError> {
        if self.state != HookState::Created {
            return Err(InvalidTransitionError::new("activate", self.state));
        }
        self.node.activate()?;
        self.state = HookState::Active;
        Ok(())
    }

    /// Runs the entry actions.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransitionError` unless the invocation is `Active`.
    pub fn run_entry(&self, frame: &MethodFrame) -> Result<ActionReport, InvalidTransitionError> {
        self.run_phase(HookPhase::Entry, frame)
    }

    /// Runs the exit actions.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransitionError` unless the invocation is `Active`.
    pub fn run_exit(&self, frame: &MethodFrame) -> Result<ActionReport, InvalidTransitionError> {
        self.run_phase(HookPhase::Exit, frame)
    }

    /// Closes the node, merging up-propagating data into its parent.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransitionError` if the invocation is already closed.
    pub fn close(&mut self) -> Result<(), InvalidTransitionError> {
        if self.state == HookState::Closed {
            return Err(InvalidTransitionError::new("close", self.state));
        }
        self.state = HookState::Closed;
        self.node.close()
    }

    fn run_phase(
        &self,
        phase: HookPhase,
        frame: &MethodFrame,
    ) -> Result<ActionReport, InvalidTransitionError> {
        if self.state != HookState::Active {
            return Err(InvalidTransitionError::new(phase.operation(), self.state));
        }

        let ctx = ActionContext::new(&self.node, frame, self.rule.id(), phase);
        let mut report = ActionReport::default();

        for (step, call) in self.rule.plan(phase).iter().enumerate() {
            if self.rule.is_disabled(phase, step) {
                report.disabled += 1;
                continue;
            }

            let failed_guard = call
                .descriptor
                .guards
                .iter()
                .find(|guard| !guard.is_satisfied(self.node.get_data(guard.key()).as_ref()));
            if let Some(guard) = failed_guard {
                tracing::trace!(
                    rule = self.rule.id(),
                    action = call.name(),
                    %guard,
                    "Guard not satisfied, skipping action"
                );
                report.skipped += 1;
                continue;
            }

            match self.invoke(call, &ctx) {
                Ok(()) => report.executed += 1,
                Err(err) => {
                    report.failed += 1;
                    self.handle_failure(phase, step, &err);
                }
            }
        }

        Ok(report)
    }

    fn invoke(&self, call: &ActionCall, ctx: &ActionContext<'_>) -> Result<(), ActionExecutionError> {
        match catch_unwind(AssertUnwindSafe(|| call.action.execute(ctx))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(ActionExecutionError::failed(
                self.rule.id(),
                call.name(),
                format!("{err:#}"),
            )),
            Err(payload) => Err(ActionExecutionError::panicked(
                self.rule.id(),
                call.name(),
                panic_message(payload.as_ref()),
            )),
        }
    }

    fn handle_failure(&self, phase: HookPhase, step: usize, err: &ActionExecutionError) {
        tracing::error!(
            invocation_id = %self.id,
            rule = %err.rule,
            action = %err.action,
            %phase,
            panicked = err.panicked,
            error = %err,
            "Action failed"
        );
        self.events.emit("action.failed", Some(err.to_json()));

        if self.rule.disable(phase, step) {
            tracing::warn!(rule = %err.rule, action = %err.action, %phase, "Action disabled");
            self.events.emit(
                "action.disabled",
                Some(serde_json::json!({
                    "rule": &err.rule,
                    "action": &err.action,
                    "phase": phase,
                })),
            );
        }
    }
}

impl Drop for HookInvocation {
    fn drop(&mut self) {
        if self.state != HookState::Closed {
            tracing::debug!(invocation_id = %self.id, rule = self.rule.id(), "Closing dropped invocation");
            self.state = HookState::Closed;
            let _ = self.node.close();
        }
    }
}

impl fmt::Debug for HookInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookInvocation")
            .field("id", &self.id)
            .field("rule", &self.rule.id())
            .field("state", &self.state)
            .field("node", &self.node)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
