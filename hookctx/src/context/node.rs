//! The nested per-call context node.

use super::unit::{self, ExecutionUnit};
use super::{ContextValue, PropagationPolicy};
use crate::errors::{ClosedNodeAccessError, InvalidTransitionError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// A flattened key/value view.
pub type DataMap = HashMap<String, ContextValue>;

/// Lifecycle phase of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodePhase {
    /// Constructed, not yet current for any unit.
    Created,
    /// Current for its opening unit.
    Active,
    /// Closed; all data released.
    Closed,
}

impl fmt::Display for NodePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Active => write!(f, "active"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// What to do when a closed node is read or written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosedAccessMode {
    /// Panic with a [`ClosedNodeAccessError`].
    Panic,
    /// Log the first offence per node and ignore the access.
    LogOnce,
}

impl Default for ClosedAccessMode {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Panic
        } else {
            Self::LogOnce
        }
    }
}

struct NodeState {
    phase: NodePhase,
    parent: Option<ContextNode>,
    down: Arc<DataMap>,
    // `None` marks a key deleted in this scope.
    overwrites: HashMap<String, Option<ContextValue>>,
    // A down-propagating overwrite has not been folded into `down` yet.
    pending_down: bool,
    opening_unit: Option<ExecutionUnit>,
    previous: Option<ContextNode>,
}

struct NodeInner {
    id: u64,
    policy: Arc<PropagationPolicy>,
    closed_access: ClosedAccessMode,
    creating_unit: ExecutionUnit,
    closed_access_logged: AtomicBool,
    state: Mutex<NodeState>,
}

/// One scope of execution, conceptually one instrumented method activation.
///
/// Reads resolve against the node's own overwrites first and then against
/// the flattened view inherited from the parent, so no read ever walks the
/// parent chain. The inherited view is shared with the parent until this
/// node has to change it.
///
/// `ContextNode` is a cheap handle; clones refer to the same node.
#[derive(Clone)]
pub struct ContextNode {
    inner: Arc<NodeInner>,
}

impl ContextNode {
    /// Creates a node without a parent.
    #[must_use]
    pub fn root(policy: Arc<PropagationPolicy>) -> Self {
        Self::with_options(None, policy, ClosedAccessMode::default())
    }

    /// Creates a node whose view starts from `parent`'s effective
    /// down-propagated data. Policy and closed-access mode are inherited.
    #[must_use]
    pub fn child_of(parent: &Self) -> Self {
        Self::with_options(
            Some(parent.clone()),
            Arc::clone(&parent.inner.policy),
            parent.inner.closed_access,
        )
    }

    /// Creates a child of the node current for the calling unit, or a root
    /// node if there is none.
    #[must_use]
    pub fn open(policy: Arc<PropagationPolicy>, closed_access: ClosedAccessMode) -> Self {
        Self::with_options(Self::current(), policy, closed_access)
    }

    /// Creates a node with explicit settings.
    #[must_use]
    pub fn with_options(
        parent: Option<Self>,
        policy: Arc<PropagationPolicy>,
        closed_access: ClosedAccessMode,
    ) -> Self {
        let down = parent
            .as_ref()
            .map_or_else(|| Arc::new(DataMap::new()), Self::effective_down_view);

        Self {
            inner: Arc::new(NodeInner {
                id: NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed),
                policy,
                closed_access,
                creating_unit: ExecutionUnit::current(),
                closed_access_logged: AtomicBool::new(false),
                state: Mutex::new(NodeState {
                    phase: NodePhase::Created,
                    parent,
                    down,
                    overwrites: HashMap::new(),
                    pending_down: false,
                    opening_unit: None,
                    previous: None,
                }),
            }),
        }
    }

    /// Returns the node current for the calling unit.
    ///
    /// Nodes closed on a foreign unit are skipped in favour of the nearest
    /// live node they were activated over, and the slot is updated to it.
    #[must_use]
    pub fn current() -> Option<Self> {
        let slot = unit::current_node()?;
        let previous = {
            let state = slot.inner.state.lock();
            if state.phase != NodePhase::Closed {
                drop(state);
                return Some(slot);
            }
            state.previous.clone()
        };

        let live = nearest_live(previous);
        tracing::debug!(
            node_id = slot.inner.id,
            restored = ?live.as_ref().map(Self::id),
            "Current node was closed elsewhere, restoring its predecessor"
        );
        unit::replace_current_node(live.clone());
        live
    }

    /// Returns the node id, unique within the process.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Returns the lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> NodePhase {
        self.inner.state.lock().phase
    }

    /// Returns the parent node, `None` for roots and closed nodes.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.inner.state.lock().parent.clone()
    }

    /// Returns the propagation policy.
    #[must_use]
    pub fn policy(&self) -> &Arc<PropagationPolicy> {
        &self.inner.policy
    }

    /// Returns the unit that activated this node, if it was activated.
    #[must_use]
    pub fn opening_unit(&self) -> Option<ExecutionUnit> {
        self.inner.state.lock().opening_unit
    }

    /// Returns true if both handles refer to the same node.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Reads a key.
    ///
    /// # Errors
    ///
    /// Returns `ClosedNodeAccessError` if the node is closed.
    pub fn try_get_data(&self, key: &str) -> Result<Option<ContextValue>, ClosedNodeAccessError> {
        let state = self.inner.state.lock();
        if state.phase == NodePhase::Closed {
            return Err(ClosedNodeAccessError::new(self.inner.id, "get", key));
        }
        match state.overwrites.get(key) {
            Some(overwritten) => Ok(overwritten.clone()),
            None => Ok(state.down.get(key).cloned()),
        }
    }

    /// Reads a key; closed nodes are handled per [`ClosedAccessMode`].
    #[must_use]
    pub fn get_data(&self, key: &str) -> Option<ContextValue> {
        self.try_get_data(key)
            .unwrap_or_else(|err| {
                self.closed_access(&err);
                None
            })
    }

    /// Writes a key into this node's overwrites.
    ///
    /// # Errors
    ///
    /// Returns `ClosedNodeAccessError` if the node is closed.
    pub fn try_set_data(
        &self,
        key: impl Into<String>,
        value: impl Into<ContextValue>,
    ) -> Result<(), ClosedNodeAccessError> {
        self.put_overwrite(key.into(), Some(value.into()), "set")
    }

    /// Writes a key; closed nodes are handled per [`ClosedAccessMode`].
    pub fn set_data(&self, key: impl Into<String>, value: impl Into<ContextValue>) {
        if let Err(err) = self.try_set_data(key, value) {
            self.closed_access(&err);
        }
    }

    /// Marks a key as deleted in this scope.
    ///
    /// # Errors
    ///
    /// Returns `ClosedNodeAccessError` if the node is closed.
    pub fn try_remove_data(&self, key: impl Into<String>) -> Result<(), ClosedNodeAccessError> {
        self.put_overwrite(key.into(), None, "remove")
    }

    /// Marks a key as deleted; closed nodes are handled per [`ClosedAccessMode`].
    pub fn remove_data(&self, key: impl Into<String>) {
        if let Err(err) = self.try_remove_data(key) {
            self.closed_access(&err);
        }
    }

    /// Returns the effective view: inherited data with this node's overwrites applied.
    ///
    /// Empty for closed nodes.
    #[must_use]
    pub fn entries(&self) -> DataMap {
        let state = self.inner.state.lock();
        let mut view = (*state.down).clone();
        apply_overwrites(&mut view, state.overwrites.iter());
        view
    }

    /// Returns the scalar entries of the effective view whose keys are taggable.
    #[must_use]
    pub fn taggable_entries(&self) -> DataMap {
        self.entries()
            .into_iter()
            .filter(|(key, value)| value.is_scalar() && self.inner.policy.is_taggable(key))
            .collect()
    }

    /// Makes this node current for the calling unit.
    ///
    /// Down-propagating overwrites made before activation are folded into a
    /// private copy of the inherited view; the shared parent view is never
    /// modified.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransitionError` unless the node is freshly created.
    pub fn activate(&self) -> Result<(), InvalidTransitionError> {
        {
            let mut state = self.inner.state.lock();
            if state.phase != NodePhase::Created {
                return Err(InvalidTransitionError::new("activate", state.phase));
            }
            if state.pending_down {
                fold_down_overwrites(&mut state, &self.inner.policy);
            }
            state.phase = NodePhase::Active;
            state.opening_unit = Some(ExecutionUnit::current());
        }

        let previous = Self::current();
        unit::replace_current_node(Some(self.clone()));
        self.inner.state.lock().previous = previous;
        Ok(())
    }

    /// Closes the node.
    ///
    /// On the opening unit this restores the previously current node and
    /// merges up-propagating overwrites into the parent, provided the parent
    /// belongs to the same unit. Otherwise up-propagation is skipped, since
    /// the parent may be closed or active elsewhere, and the opening unit
    /// skips this node the next time it asks for its current node.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransitionError` if the node is already closed.
    pub fn close(&self) -> Result<(), InvalidTransitionError> {
        let closing_unit = ExecutionUnit::current();
        let (was_active, owner, parent, previous, overwrites) = {
            let mut state = self.inner.state.lock();
            if state.phase == NodePhase::Closed {
                return Err(InvalidTransitionError::new("close", state.phase));
            }
            let was_active = state.phase == NodePhase::Active;
            let owner = state.opening_unit.unwrap_or(self.inner.creating_unit);
            state.phase = NodePhase::Closed;
            state.down = Arc::default();
            // Kept on a foreign close so the owner's slot can fall back to it.
            let previous = if closing_unit == owner {
                state.previous.take()
            } else {
                None
            };
            (
                was_active,
                owner,
                state.parent.take(),
                previous,
                mem::take(&mut state.overwrites),
            )
        };

        if closing_unit != owner {
            tracing::debug!(
                node_id = self.inner.id,
                %owner,
                %closing_unit,
                "Node closed on a foreign execution unit, skipping up-propagation"
            );
            return Ok(());
        }

        if was_active {
            let displaced = unit::replace_current_node(previous);
            if !displaced.is_some_and(|node| node.ptr_eq(self)) {
                tracing::debug!(node_id = self.inner.id, "Node closed out of order");
            }
        }

        let Some(parent) = parent else {
            return Ok(());
        };
        let parent_owner = parent.owning_unit();
        if parent_owner != closing_unit {
            tracing::debug!(
                node_id = self.inner.id,
                parent_id = parent.inner.id,
                %parent_owner,
                %closing_unit,
                "Parent owned by a foreign execution unit, skipping up-propagation"
            );
            return Ok(());
        }

        let policy = &self.inner.policy;
        let up: Vec<(String, Option<ContextValue>)> = overwrites
            .into_iter()
            .filter(|(key, _)| policy.is_up_propagated(key))
            .collect();
        if !up.is_empty() {
            parent.merge_from_child(self.inner.id, up);
        }

        Ok(())
    }

    /// Makes this node current on the calling thread until the guard drops.
    ///
    /// Used when work belonging to the node continues on another unit.
    /// Entering does not change the opening unit, so closing the node from
    /// there skips up-propagation.
    #[must_use]
    pub fn enter(&self) -> EnteredNode {
        if self.phase() == NodePhase::Closed {
            tracing::debug!(node_id = self.inner.id, "Entering a closed node");
        }
        EnteredNode {
            previous: unit::replace_current_node(Some(self.clone())),
        }
    }

    fn owning_unit(&self) -> ExecutionUnit {
        self.inner
            .state
            .lock()
            .opening_unit
            .unwrap_or(self.inner.creating_unit)
    }

    /// Returns the flattened view children inherit.
    fn effective_down_view(&self) -> Arc<DataMap> {
        let mut state = self.inner.state.lock();
        if state.phase == NodePhase::Closed {
            tracing::debug!(node_id = self.inner.id, "Opening a child of a closed node");
        }
        if state.pending_down {
            fold_down_overwrites(&mut state, &self.inner.policy);
        }
        Arc::clone(&state.down)
    }

    fn put_overwrite(
        &self,
        key: String,
        value: Option<ContextValue>,
        operation: &'static str,
    ) -> Result<(), ClosedNodeAccessError> {
        let mut state = self.inner.state.lock();
        if state.phase == NodePhase::Closed {
            return Err(ClosedNodeAccessError::new(self.inner.id, operation, key));
        }
        if self.inner.policy.is_down_propagated(&key) {
            state.pending_down = true;
        }
        state.overwrites.insert(key, value);
        Ok(())
    }

    fn merge_from_child(&self, child_id: u64, entries: Vec<(String, Option<ContextValue>)>) {
        let mut state = self.inner.state.lock();
        if state.phase == NodePhase::Closed {
            tracing::debug!(
                node_id = self.inner.id,
                child_id,
                "Parent already closed, dropping up-propagated data"
            );
            return;
        }
        for (key, value) in entries {
            if self.inner.policy.is_down_propagated(&key) {
                state.pending_down = true;
            }
            state.overwrites.insert(key, value);
        }
    }

    fn closed_access(&self, err: &ClosedNodeAccessError) {
        match self.inner.closed_access {
            ClosedAccessMode::Panic => panic!("{err}"),
            ClosedAccessMode::LogOnce => {
                if !self.inner.closed_access_logged.swap(true, Ordering::Relaxed) {
                    tracing::error!(error = %err, "Context node accessed after close");
                }
            }
        }
    }
}

impl fmt::Debug for ContextNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextNode")
            .field("id", &self.inner.id)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

/// Guard returned by [`ContextNode::enter`].
#[derive(Debug)]
pub struct EnteredNode {
    previous: Option<ContextNode>,
}

impl Drop for EnteredNode {
    fn drop(&mut self) {
        unit::replace_current_node(self.previous.take());
    }
}

fn fold_down_overwrites(state: &mut NodeState, policy: &PropagationPolicy) {
    let NodeState {
        down,
        overwrites,
        pending_down,
        ..
    } = state;
    // Copies the map only if a child or the parent still shares it.
    let view = Arc::make_mut(down);
    apply_overwrites(
        view,
        overwrites
            .iter()
            .filter(|(key, _)| policy.is_down_propagated(key)),
    );
    *pending_down = false;
}

/// Follows `previous` links past closed nodes.
fn nearest_live(mut node: Option<ContextNode>) -> Option<ContextNode> {
    while let Some(candidate) = node {
        let previous = {
            let state = candidate.inner.state.lock();
            if state.phase != NodePhase::Closed {
                drop(state);
                return Some(candidate);
            }
            state.previous.clone()
        };
        node = previous;
    }
    None
}

fn apply_overwrites<'a>(
    view: &mut DataMap,
    overwrites: impl Iterator<Item = (&'a String, &'a Option<ContextValue>)>,
) {
    for (key, value) in overwrites {
        match value {
            Some(value) => {
                view.insert(key.clone(), value.clone());
            }
            None => {
                view.remove(key);
            }
        }
    }
}
