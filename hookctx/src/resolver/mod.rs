//! Dependency resolution between action calls.
//!
//! Each action call declares the context keys it reads and writes. The
//! resolver turns those declarations into an execution order, or reports
//! the cycle that makes ordering impossible.

mod descriptor;
mod plan;
mod resolve;

pub use descriptor::{ActionCallDescriptor, GuardCondition};
pub use plan::OrderedActionPlan;
pub use resolve::resolve;
