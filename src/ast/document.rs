//! Workflow document types
//!
//! A `WorkflowDocument` is produced once by the parser and never mutated.
//! Header fields map 1:1 to the YAML front matter; unknown keys are kept in
//! ordered side-maps so nothing a user wrote is ever dropped.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::binding::Template;

use super::invocation::SubWorkflowInvocation;
use super::parameter::ParameterSpec;

/// Generation settings forwarded to the engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
}

/// `input:` block
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    #[serde(default)]
    pub schema: BTreeMap<String, ParameterSpec>,
    /// Workflow-level defaults
    #[serde(default)]
    pub default: BTreeMap<String, Value>,
}

/// `output:` block
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

/// When checkpoints are written during a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointTrigger {
    #[default]
    EveryToolCall,
    EveryN,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointPolicy {
    #[serde(default)]
    pub trigger: CheckpointTrigger,
    /// Tool calls between checkpoints for `every_n`
    #[serde(default = "default_interval")]
    pub interval: u32,
    /// Keep the previous checkpoint as a timestamped backup; falls back to config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<bool>,
}

fn default_interval() -> u32 {
    5
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self {
            trigger: CheckpointTrigger::default(),
            interval: default_interval(),
            backup: None,
        }
    }
}

impl CheckpointPolicy {
    /// Whether the `calls`-th tool call since the run (re)started triggers a write
    pub fn is_due(&self, calls: u32) -> bool {
        match self.trigger {
            CheckpointTrigger::EveryToolCall => true,
            CheckpointTrigger::EveryN => calls > 0 && calls % self.interval.max(1) == 0,
            CheckpointTrigger::Manual => false,
        }
    }
}

/// Engine retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    500
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

/// Namespaced `lumen:` extension block
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtensionBlock {
    #[serde(default)]
    pub workflows: Vec<SubWorkflowInvocation>,
    #[serde(default)]
    pub checkpoint: CheckpointPolicy,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(flatten)]
    pub extra: serde_yaml::Mapping,
}

/// Explicit ```` ```tool ```` block in the body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolReference {
    pub name: String,
    #[serde(default)]
    pub params: Value,
    /// 1-based line of the opening fence
    #[serde(skip)]
    pub line: usize,
}

/// Parsed workflow document
#[derive(Debug, Clone)]
pub struct WorkflowDocument {
    pub name: String,
    pub description: Option<String>,
    pub model: String,
    pub config: GenerationConfig,
    /// Declared tool names
    pub tools: Vec<String>,
    pub input: InputSpec,
    pub output: Option<OutputSpec>,
    pub extension: ExtensionBlock,
    /// Unknown top-level header keys, in file order
    pub extra: serde_yaml::Mapping,
    pub has_header: bool,
    /// Prompt source: the body with ```` ```workflow ```` blocks removed
    pub body: String,
    pub template: Template,
    /// Root variable names the body references
    pub parameter_refs: BTreeSet<String>,
    /// Header declarations followed by body blocks
    pub invocations: Vec<SubWorkflowInvocation>,
    pub tool_refs: Vec<ToolReference>,
    /// `xxh3:<16 hex>` over the raw file text
    pub content_hash: String,
    /// Same digest over the body only
    pub body_hash: String,
    pub source_path: Option<PathBuf>,
}

impl WorkflowDocument {
    pub fn invocation(&self, name: &str) -> Option<&SubWorkflowInvocation> {
        self.invocations.iter().find(|inv| inv.name == name)
    }

    /// Every parameter name with a declaration (schema entry or workflow default)
    pub fn declared_parameters(&self) -> BTreeSet<&str> {
        self.input
            .schema
            .keys()
            .chain(self.input.default.keys())
            .map(String::as_str)
            .collect()
    }

    /// Names of parameters without any default
    pub fn required_parameters(&self) -> Vec<&str> {
        self.input
            .schema
            .iter()
            .filter(|(name, spec)| spec.default.is_none() && !self.input.default.contains_key(*name))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// JSON schema describing the workflow's inputs (used when exposed as a tool)
    pub fn input_json_schema(&self) -> Value {
        let properties: serde_json::Map<String, Value> = self
            .input
            .schema
            .iter()
            .map(|(name, spec)| (name.clone(), spec.to_json_schema()))
            .collect();
        serde_json::json!({
            "type": "object",
            "properties": properties,
        })
    }
}
