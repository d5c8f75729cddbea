//! AST Module - parsed workflow documents
//!
//! - `document`: WorkflowDocument and header blocks
//! - `parameter`: `input.schema` entries
//! - `invocation`: sub-workflow declarations
//! - `parser`: text → WorkflowDocument
//!
//! These types are the static "what". Execution state lives in `runtime`.

mod document;
mod invocation;
mod parameter;
mod parser;

pub use document::{
    CheckpointPolicy, CheckpointTrigger, ExtensionBlock, GenerationConfig, InputSpec, OutputSpec,
    RetryPolicy, ToolReference, WorkflowDocument,
};
pub use invocation::{stem_name, InheritanceMode, InvocationTiming, SubWorkflowInvocation};
pub use parameter::{ParamType, ParameterSpec};
pub use parser::{compute_hash, load_document, parse_document};
