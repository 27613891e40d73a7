//! Carrying a context node into asynchronous work.

use super::unit::{self, ExecutionUnit, UnitOverride};
use super::ContextNode;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

impl ContextNode {
    /// Wraps a future so it runs with this node current.
    ///
    /// The wrapped future is its own execution unit: it keeps a task-local
    /// current-node slot across polls, regardless of which thread polls it.
    /// Nodes opened inside the future therefore nest under this node, while
    /// closing this node from inside the future skips up-propagation.
    pub fn hand_off<F: Future>(&self, future: F) -> HandOff<F> {
        HandOff {
            unit: ExecutionUnit::fresh(),
            current: Some(self.clone()),
            inner: Box::pin(future),
        }
    }
}

/// Future returned by [`ContextNode::hand_off`].
pub struct HandOff<F> {
    unit: ExecutionUnit,
    current: Option<ContextNode>,
    inner: Pin<Box<F>>,
}

impl<F> HandOff<F> {
    /// Returns the execution unit the wrapped future runs under.
    pub const fn unit(&self) -> ExecutionUnit {
        self.unit
    }
}

impl<F: Future> Future for HandOff<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let _unit = UnitOverride::set(this.unit);
        let outer = unit::replace_current_node(this.current.take());
        let result = this.inner.as_mut().poll(cx);
        this.current = unit::replace_current_node(outer);
        result
    }
}

impl<F> std::fmt::Debug for HandOff<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandOff")
            .field("unit", &self.unit)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}
