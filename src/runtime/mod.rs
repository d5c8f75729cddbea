//! Runtime Module - workflow execution
//!
//! - `context`: mutable state of one run
//! - `orchestrator`: the engine/tool loop, checkpoints, resume
//! - `capability`: what the engine may call (native tools and sub-workflows)
//! - `composer`: sub-workflow invocation and result binding
//! - `schedule`: batching of start-time sub-workflows
//!
//! This module is the "how". For static structure, see the `ast` module.

mod capability;
mod composer;
mod context;
mod orchestrator;
mod schedule;

pub use capability::{Capability, CapabilitySet};
pub use composer::Composer;
pub use context::{
    CompletedTool, EvolutionChange, ExecutionContext, Interaction, InteractionLog, RunStatus,
};
pub use orchestrator::{Orchestrator, RunControl, RunOutcome, RunSettings};
