//! Tools Module - native capabilities callable by the model
//!
//! - [`Tool`] - async trait every native tool implements
//! - [`ToolRegistry`] - name → tool lookup handed to the orchestrator
//! - [`FnTool`] - closure-backed tool for embedding and tests
//! - `builtin` - `set_variable`, `record_insight`, `request_checkpoint`
//!
//! Tool failures are [`ToolError`]s: they are reported back to the model as a
//! tool-role message and never abort the run.

mod builtin;
mod registry;

pub use builtin::{builtin_tools, RecordInsightTool, RequestCheckpointTool, SetVariableTool};
pub use builtin::{BUILTIN_TOOLS, RECORD_INSIGHT, REQUEST_CHECKPOINT, SET_VARIABLE};
pub use registry::ToolRegistry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════
// TOOL TRAIT
// ═══════════════════════════════════════════════════════════════════════════

#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name as the model sees it
    fn name(&self) -> &str;

    /// Tool description for the model
    fn description(&self) -> &str;

    /// JSON Schema for the arguments object
    fn parameters_schema(&self) -> Value;

    /// Safe to repeat (annotates logs only)
    fn idempotent(&self) -> bool {
        false
    }

    /// Execute with already-validated JSON arguments
    async fn call(&self, args: Value) -> Result<ToolOutput, ToolError>;
}

/// Side effects a tool asks the orchestrator to apply to the run context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum ContextEffect {
    SetVariable {
        key: String,
        value: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reasoning: Option<String>,
    },
    Insight {
        text: String,
    },
    CheckpointRequested,
}

/// Output from a tool execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Result handed back to the model
    pub content: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub effects: Vec<ContextEffect>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Value::String(content.into()),
            effects: Vec::new(),
        }
    }

    pub fn json(content: Value) -> Self {
        Self {
            content,
            effects: Vec::new(),
        }
    }

    pub fn with_effect(mut self, effect: ContextEffect) -> Self {
        self.effects.push(effect);
        self
    }

    /// Content as the text placed in the tool-role message
    pub fn content_text(&self) -> String {
        match &self.content {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TOOL ERRORS (LUMEN-200 range)
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToolError {
    #[error("[LUMEN-200] Tool '{tool}' failed: {reason}")]
    Failed { tool: String, reason: String },

    #[error("[LUMEN-201] Invalid arguments for tool '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("[LUMEN-202] Tool '{tool}' timed out after {secs}s")]
    Timeout { tool: String, secs: u64 },

    #[error("[LUMEN-203] Tool '{tool}' was cancelled")]
    Cancelled { tool: String },

    #[error("[LUMEN-204] Tool '{tool}' is not available in this workflow")]
    NotFound { tool: String },
}

impl ToolError {
    pub fn failed(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Failed { .. } => "LUMEN-200",
            Self::InvalidArguments { .. } => "LUMEN-201",
            Self::Timeout { .. } => "LUMEN-202",
            Self::Cancelled { .. } => "LUMEN-203",
            Self::NotFound { .. } => "LUMEN-204",
        }
    }
}

/// Validate `args` against a tool's JSON schema, reporting every violation
pub fn validate_arguments(tool: &str, schema: &Value, args: &Value) -> Result<(), ToolError> {
    let compiled = jsonschema::validator_for(schema).map_err(|e| ToolError::InvalidArguments {
        tool: tool.to_string(),
        reason: format!("tool schema is invalid: {}", e),
    })?;

    let errors: Vec<String> = compiled.iter_errors(args).map(|e| e.to_string()).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ToolError::InvalidArguments {
            tool: tool.to_string(),
            reason: errors.join("; "),
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CLOSURE TOOL
// ═══════════════════════════════════════════════════════════════════════════

type ToolFn = dyn Fn(Value) -> Result<ToolOutput, ToolError> + Send + Sync;

/// Tool backed by a synchronous closure
pub struct FnTool {
    name: String,
    description: String,
    schema: Value,
    idempotent: bool,
    f: Box<ToolFn>,
}

impl FnTool {
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, schema: Value, f: F) -> Self
    where
        F: Fn(Value) -> Result<ToolOutput, ToolError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            idempotent: false,
            f: Box::new(f),
        }
    }

    pub fn mark_idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone()
    }

    fn idempotent(&self) -> bool {
        self.idempotent
    }

    async fn call(&self, args: Value) -> Result<ToolOutput, ToolError> {
        (self.f)(args)
    }
}
