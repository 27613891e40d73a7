//! Execution units and the per-unit "current node" slot.
//!
//! An execution unit is a thread by default. Code that hands work off to a
//! task which may migrate between threads (see [`super::HandOff`]) runs that
//! task under its own unit, so the task keeps one identity no matter which
//! worker polls it.

use super::ContextNode;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_UNIT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_UNIT: ExecutionUnit = ExecutionUnit::fresh();
    static UNIT_OVERRIDE: Cell<Option<ExecutionUnit>> = const { Cell::new(None) };
    static CURRENT_NODE: RefCell<Option<ContextNode>> = const { RefCell::new(None) };
}

/// Identity of the thread or task that owns a node's mutable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExecutionUnit(u64);

impl ExecutionUnit {
    /// Allocates a new, never-before-seen unit.
    #[must_use]
    pub fn fresh() -> Self {
        Self(NEXT_UNIT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the unit the calling code runs under.
    #[must_use]
    pub fn current() -> Self {
        UNIT_OVERRIDE
            .with(Cell::get)
            .unwrap_or_else(|| THREAD_UNIT.with(|unit| *unit))
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ExecutionUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit-{}", self.0)
    }
}

/// Runs the calling thread under another unit until dropped.
#[derive(Debug)]
pub(crate) struct UnitOverride {
    previous: Option<ExecutionUnit>,
}

impl UnitOverride {
    pub(crate) fn set(unit: ExecutionUnit) -> Self {
        let previous = UNIT_OVERRIDE.with(|slot| slot.replace(Some(unit)));
        Self { previous }
    }
}

impl Drop for UnitOverride {
    fn drop(&mut self) {
        UNIT_OVERRIDE.with(|slot| slot.set(self.previous));
    }
}

/// Returns the node current on this thread.
pub(crate) fn current_node() -> Option<ContextNode> {
    CURRENT_NODE.with(|slot| slot.borrow().clone())
}

/// Installs `node` as current and returns the node it replaced.
pub(crate) fn replace_current_node(node: Option<ContextNode>) -> Option<ContextNode> {
    CURRENT_NODE.with(|slot| slot.replace(node))
}
