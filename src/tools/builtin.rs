//! Built-in tools available to every workflow
//!
//! These are the only way the model changes run state: `set_variable`
//! writes a variable (recorded as a context-evolution entry), and
//! `record_insight` appends a key insight.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ContextEffect, Tool, ToolError, ToolOutput};

pub const SET_VARIABLE: &str = "set_variable";
pub const RECORD_INSIGHT: &str = "record_insight";
pub const REQUEST_CHECKPOINT: &str = "request_checkpoint";

pub const BUILTIN_TOOLS: &[&str] = &[SET_VARIABLE, RECORD_INSIGHT, REQUEST_CHECKPOINT];

/// All built-ins, ready to register
pub fn builtin_tools() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(SetVariableTool),
        Arc::new(RecordInsightTool),
        Arc::new(RequestCheckpointTool),
    ]
}

fn parse_args<T: for<'de> Deserialize<'de>>(tool: &str, args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments {
        tool: tool.to_string(),
        reason: e.to_string(),
    })
}

pub struct SetVariableTool;

#[derive(Deserialize)]
struct SetVariableArgs {
    name: String,
    value: Value,
    #[serde(default)]
    reasoning: Option<String>,
}

#[async_trait]
impl Tool for SetVariableTool {
    fn name(&self) -> &str {
        SET_VARIABLE
    }

    fn description(&self) -> &str {
        "Set a workflow variable. Later steps and sub-workflows see the new value."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string", "minLength": 1},
                "value": {},
                "reasoning": {"type": "string"}
            },
            "required": ["name", "value"]
        })
    }

    fn idempotent(&self) -> bool {
        true
    }

    async fn call(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let args: SetVariableArgs = parse_args(SET_VARIABLE, args)?;
        Ok(ToolOutput::text(format!("{} updated", args.name)).with_effect(
            ContextEffect::SetVariable {
                key: args.name,
                value: args.value,
                reasoning: args.reasoning,
            },
        ))
    }
}

pub struct RecordInsightTool;

#[derive(Deserialize)]
struct RecordInsightArgs {
    insight: String,
}

#[async_trait]
impl Tool for RecordInsightTool {
    fn name(&self) -> &str {
        RECORD_INSIGHT
    }

    fn description(&self) -> &str {
        "Record a key insight worth keeping if the workflow is resumed later."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"insight": {"type": "string", "minLength": 1}},
            "required": ["insight"]
        })
    }

    async fn call(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let args: RecordInsightArgs = parse_args(RECORD_INSIGHT, args)?;
        Ok(ToolOutput::text("insight recorded")
            .with_effect(ContextEffect::Insight { text: args.insight }))
    }
}

pub struct RequestCheckpointTool;

#[async_trait]
impl Tool for RequestCheckpointTool {
    fn name(&self) -> &str {
        REQUEST_CHECKPOINT
    }

    fn description(&self) -> &str {
        "Persist the current progress now so the workflow can resume from here."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"reason": {"type": "string"}}
        })
    }

    fn idempotent(&self) -> bool {
        true
    }

    async fn call(&self, _args: Value) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput::text("checkpoint requested").with_effect(ContextEffect::CheckpointRequested))
    }
}
