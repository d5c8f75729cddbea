//! Lumen - checkpointed, resumable runner for prompt workflow documents

pub mod ast;
pub mod binding;
pub mod checkpoint;
pub mod config;
pub mod dag;
pub mod error;
pub mod event;
pub mod provider;
pub mod runtime;
pub mod tools;
pub mod util;
pub mod validation;

pub use ast::{load_document, parse_document, SubWorkflowInvocation, WorkflowDocument};
pub use checkpoint::{validate_compatibility, CheckpointStore, CompatibilityReport, ResumeState};
pub use config::LumenConfig;
pub use error::{FixSuggestion, LumenError, Result};
pub use event::{Event, EventKind, EventLog};
pub use provider::{MockProvider, Provider};
pub use runtime::{ExecutionContext, Orchestrator, RunControl, RunOutcome, RunSettings, RunStatus};
pub use tools::{Tool, ToolError, ToolOutput, ToolRegistry};
pub use validation::{ValidationReport, Validator};
