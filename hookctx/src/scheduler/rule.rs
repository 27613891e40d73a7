//! Rules and their compiled action plans.

use super::ActionCall;
use crate::errors::CyclicDependencyError;
use crate::resolver::OrderedActionPlan;
use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The point of a method invocation at which actions run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPhase {
    /// Before the method body.
    Entry,
    /// After the method body returned or raised.
    Exit,
}

impl HookPhase {
    pub(crate) const fn operation(self) -> &'static str {
        match self {
            Self::Entry => "run_entry",
            Self::Exit => "run_exit",
        }
    }
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entry => write!(f, "entry"),
            Self::Exit => write!(f, "exit"),
        }
    }
}

/// A set of actions attached to an instrumented method.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Unique rule id.
    pub id: String,
    /// Actions run on method entry.
    pub entry: Vec<ActionCall>,
    /// Actions run on method exit.
    pub exit: Vec<ActionCall>,
}

impl Rule {
    /// Creates a rule without actions.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entry: Vec::new(),
            exit: Vec::new(),
        }
    }

    /// Adds an entry action.
    #[must_use]
    pub fn with_entry(mut self, call: ActionCall) -> Self {
        self.entry.push(call);
        self
    }

    /// Adds an exit action.
    #[must_use]
    pub fn with_exit(mut self, call: ActionCall) -> Self {
        self.exit.push(call);
        self
    }

    fn calls(&self, phase: HookPhase) -> &[ActionCall] {
        match phase {
            HookPhase::Entry => &self.entry,
            HookPhase::Exit => &self.exit,
        }
    }

    /// Returns true if `other` declares the same actions with the same
    /// bodies, in the same order.
    #[must_use]
    pub fn same_actions(&self, other: &Self) -> bool {
        [HookPhase::Entry, HookPhase::Exit].into_iter().all(|phase| {
            let (ours, theirs) = (self.calls(phase), other.calls(phase));
            ours.len() == theirs.len() && ours.iter().zip(theirs).all(|(a, b)| a.same_as(b))
        })
    }
}

/// A rule with resolved plans for both phases.
///
/// Compiled rules are immutable apart from the set of disabled actions,
/// which only ever grows. Recompiling produces a new instance.
#[derive(Debug)]
pub(crate) struct CompiledRule {
    source: Rule,
    entry: OrderedActionPlan<ActionCall>,
    exit: OrderedActionPlan<ActionCall>,
    disabled: DashSet<(HookPhase, usize)>,
}

impl CompiledRule {
    pub(crate) fn compile(source: Rule) -> Result<Self, CyclicDependencyError> {
        let entry = OrderedActionPlan::resolve(source.entry.clone())
            .map_err(|err| err.with_context("rule", &source.id).with_context("phase", "entry"))?;
        let exit = OrderedActionPlan::resolve(source.exit.clone())
            .map_err(|err| err.with_context("rule", &source.id).with_context("phase", "exit"))?;
        Ok(Self {
            source,
            entry,
            exit,
            disabled: DashSet::new(),
        })
    }

    pub(crate) fn id(&self) -> &str {
        &self.source.id
    }

    pub(crate) fn source(&self) -> &Rule {
        &self.source
    }

    pub(crate) fn plan(&self, phase: HookPhase) -> &OrderedActionPlan<ActionCall> {
        match phase {
            HookPhase::Entry => &self.entry,
            HookPhase::Exit => &self.exit,
        }
    }

    pub(crate) fn is_disabled(&self, phase: HookPhase, step: usize) -> bool {
        self.disabled.contains(&(phase, step))
    }

    /// Returns true if the step was enabled until now.
    pub(crate) fn disable(&self, phase: HookPhase, step: usize) -> bool {
        self.disabled.insert((phase, step))
    }

    /// Disabled actions by phase and name, in execution order.
    pub(crate) fn disabled_actions(&self) -> Vec<(HookPhase, String)> {
        let mut steps: Vec<(HookPhase, usize)> = self.disabled.iter().map(|s| *s).collect();
        steps.sort_unstable();
        steps
            .into_iter()
            .filter_map(|(phase, step)| {
                self.plan(phase)
                    .iter()
                    .nth(step)
                    .map(|call| (phase, call.name().to_string()))
            })
            .collect()
    }
}
