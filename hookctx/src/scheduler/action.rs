//! Action bodies and the inputs they receive.

use super::HookPhase;
use crate::context::{ContextNode, ContextValue};
use crate::resolver::ActionCallDescriptor;
use std::fmt;
use std::sync::Arc;

/// A piece of work run by a rule at method entry or exit.
///
/// Returning `Err` or panicking disables the action for the rest of the
/// rule's lifetime; neither ever reaches the instrumented application.
pub trait Action: Send + Sync {
    /// Runs the action against the invocation's context.
    fn execute(&self, ctx: &ActionContext<'_>) -> anyhow::Result<()>;
}

/// A closure-based action.
pub struct FnAction<F>
where
    F: Fn(&ActionContext<'_>) -> anyhow::Result<()> + Send + Sync,
{
    func: F,
}

impl<F> FnAction<F>
where
    F: Fn(&ActionContext<'_>) -> anyhow::Result<()> + Send + Sync,
{
    /// Wraps a closure.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> Action for FnAction<F>
where
    F: Fn(&ActionContext<'_>) -> anyhow::Result<()> + Send + Sync,
{
    fn execute(&self, ctx: &ActionContext<'_>) -> anyhow::Result<()> {
        (self.func)(ctx)
    }
}

impl<F> fmt::Debug for FnAction<F>
where
    F: Fn(&ActionContext<'_>) -> anyhow::Result<()> + Send + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnAction").finish_non_exhaustive()
    }
}

/// An action paired with its declaration.
#[derive(Clone)]
pub struct ActionCall {
    /// What the action reads and writes.
    pub descriptor: ActionCallDescriptor,
    /// The action body.
    pub action: Arc<dyn Action>,
}

impl ActionCall {
    /// Creates an action call.
    pub fn new(descriptor: ActionCallDescriptor, action: impl Action + 'static) -> Self {
        Self {
            descriptor,
            action: Arc::new(action),
        }
    }

    /// Creates an action call from a closure.
    pub fn from_fn<F>(descriptor: ActionCallDescriptor, func: F) -> Self
    where
        F: Fn(&ActionContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::new(descriptor, FnAction::new(func))
    }

    /// Returns the call name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Returns true if both calls declare the same keys and share the same
    /// action body.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        self.descriptor == other.descriptor && Arc::ptr_eq(&self.action, &other.action)
    }
}

impl AsRef<ActionCallDescriptor> for ActionCall {
    fn as_ref(&self) -> &ActionCallDescriptor {
        &self.descriptor
    }
}

impl fmt::Debug for ActionCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionCall")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// The intercepted method's runtime values.
///
/// All fields are opaque to the scheduler; only actions interpret them.
#[derive(Debug, Clone, Default)]
pub struct MethodFrame {
    /// The receiver, absent for static methods.
    pub this: Option<ContextValue>,
    /// The arguments in declaration order.
    pub args: Vec<ContextValue>,
    /// The return value, set on exit.
    pub return_value: Option<ContextValue>,
    /// The error the method raised, set on exit.
    pub thrown: Option<ContextValue>,
}

impl MethodFrame {
    /// Creates an empty frame.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the receiver.
    #[must_use]
    pub fn with_this(mut self, this: impl Into<ContextValue>) -> Self {
        self.this = Some(this.into());
        self
    }

    /// Appends an argument.
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<ContextValue>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Sets the return value.
    #[must_use]
    pub fn with_return_value(mut self, value: impl Into<ContextValue>) -> Self {
        self.return_value = Some(value.into());
        self
    }

    /// Sets the raised error.
    #[must_use]
    pub fn with_thrown(mut self, thrown: impl Into<ContextValue>) -> Self {
        self.thrown = Some(thrown.into());
        self
    }

    /// Returns the argument at `index`.
    #[must_use]
    pub fn arg(&self, index: usize) -> Option<&ContextValue> {
        self.args.get(index)
    }
}

/// What an action sees while it runs.
#[derive(Debug)]
pub struct ActionContext<'a> {
    node: &'a ContextNode,
    frame: &'a MethodFrame,
    rule_id: &'a str,
    phase: HookPhase,
}

impl<'a> ActionContext<'a> {
    pub(crate) fn new(
        node: &'a ContextNode,
        frame: &'a MethodFrame,
        rule_id: &'a str,
        phase: HookPhase,
    ) -> Self {
        Self {
            node,
            frame,
            rule_id,
            phase,
        }
    }

    /// Reads a value from the invocation's node.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<ContextValue> {
        self.node.get_data(key)
    }

    /// Writes a value into the invocation's node.
    pub fn set(&self, key: impl Into<String>, value: impl Into<ContextValue>) {
        self.node.set_data(key, value);
    }

    /// Deletes a key in the invocation's scope.
    pub fn remove(&self, key: impl Into<String>) {
        self.node.remove_data(key);
    }

    /// Returns the invocation's node.
    #[must_use]
    pub fn node(&self) -> &ContextNode {
        self.node
    }

    /// Returns the intercepted method's values.
    #[must_use]
    pub fn frame(&self) -> &MethodFrame {
        self.frame
    }

    /// Returns the id of the rule being run.
    #[must_use]
    pub fn rule_id(&self) -> &str {
        self.rule_id
    }

    /// Returns whether this is the entry or exit phase.
    #[must_use]
    pub fn phase(&self) -> HookPhase {
        self.phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PropagationPolicy;

    #[test]
    fn test_fn_action_reads_frame_and_writes_node() {
        let node = ContextNode::root(Arc::new(PropagationPolicy::new()));
        let frame = MethodFrame::new().with_arg("GET").with_arg(8080);
        let ctx = ActionContext::new(&node, &frame, "http", HookPhase::Entry);

        let call = ActionCall::from_fn(ActionCallDescriptor::new("method"), |ctx| {
            let method = ctx.frame().arg(0).and_then(ContextValue::as_str).unwrap_or("?");
            ctx.set("http.method", method.to_string());
            Ok(())
        });
        call.action.execute(&ctx).unwrap();

        assert_eq!(node.get_data("http.method"), Some("GET".into()));
        assert_eq!(ctx.rule_id(), "http");
        assert_eq!(ctx.phase(), HookPhase::Entry);
    }

    #[test]
    fn test_remove_hides_value() {
        let node = ContextNode::root(Arc::new(PropagationPolicy::new()));
        node.set_data("k", 1);
        let frame = MethodFrame::default();
        let ctx = ActionContext::new(&node, &frame, "r", HookPhase::Exit);

        ctx.remove("k");
        assert_eq!(ctx.get("k"), None);
    }

    #[test]
    fn test_same_as_requires_shared_body() {
        let a = ActionCall::from_fn(ActionCallDescriptor::new("a"), |_| Ok(()));
        let b = ActionCall::from_fn(ActionCallDescriptor::new("a"), |_| Ok(()));

        assert!(a.same_as(&a.clone()));
        assert!(!a.same_as(&b));
    }

    #[test]
    fn test_frame_builders() {
        let frame = MethodFrame::new()
            .with_this("receiver")
            .with_return_value(true)
            .with_thrown("timeout");

        assert_eq!(frame.this, Some("receiver".into()));
        assert_eq!(frame.return_value, Some(ContextValue::Bool(true)));
        assert_eq!(frame.thrown, Some("timeout".into()));
        assert!(frame.arg(0).is_none());
    }
}
