//! Nested, propagating call context.
//!
//! This module provides:
//! - Context values and the wire-capable scalar type registry
//! - Per-key propagation policies
//! - Context nodes with down- and up-propagation
//! - Per-execution-unit "current node" tracking and task hand-offs

mod handoff;
mod node;
mod policy;
mod unit;
mod value;


pub use handoff::HandOff;
pub use node::{ClosedAccessMode, ContextNode, DataMap, EnteredNode, NodePhase};
pub use policy::{KeyPolicy, PropagationPolicy};
pub use unit::ExecutionUnit;
pub use value::{ContextValue, ValueType};
