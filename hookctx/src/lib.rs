//! # hookctx
//!
//! The runtime data layer of an APM agent: the nested call context that
//! instrumentation actions read and write, and the machinery that runs those
//! actions in dependency order.
//!
//! - **Context nodes**: one node per instrumented method activation, with
//!   per-key down-propagation to nested calls and up-propagation to callers
//! - **Propagation codec**: taggable context data carried in one transport
//!   header across process boundaries
//! - **Dependency resolver**: orders actions by the keys they read and write
//! - **Execution scheduler**: drives one hook invocation from entry to exit,
//!   honoring guard conditions and containing action failures
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use hookctx::prelude::*;
//!
//! let scheduler = Scheduler::from_config(&AgentConfig::from_path("agent.json")?);
//! scheduler.register_rule(
//!     Rule::new("http.server").with_entry(ActionCall::from_fn(
//!         ActionCallDescriptor::new("method").with_writes(["http.method"]),
//!         |ctx| {
//!             ctx.set("http.method", "GET");
//!             Ok(())
//!         },
//!     )),
//! )?;
//!
//! let mut hook = scheduler.open(None, "http.server")?;
//! hook.activate()?;
//! hook.run_entry(&MethodFrame::new())?;
//! hook.run_exit(&MethodFrame::new())?;
//! hook.close()?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod codec;
pub mod config;
pub mod context;
pub mod errors;
pub mod events;
pub mod observability;
pub mod resolver;
pub mod scheduler;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::codec::PropagationCodec;
    pub use crate::config::{AgentConfig, CodecConfig, LoggingConfig, SchedulerConfig};
    pub use crate::context::{
        ClosedAccessMode, ContextNode, ContextValue, DataMap, KeyPolicy, NodePhase,
        PropagationPolicy, ValueType,
    };
    pub use crate::errors::{
        ActionExecutionError, ClosedNodeAccessError, ContractErrorInfo,
        CyclicDependencyError, HookError, InvalidTransitionError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::observability::init_logging;
    pub use crate::resolver::{ActionCallDescriptor, GuardCondition, OrderedActionPlan};
    pub use crate::scheduler::{
        Action, ActionCall, ActionContext, ActionReport, HookInvocation, HookPhase,
        HookState, MethodFrame, Registration, Rule, Scheduler,
    };
}
