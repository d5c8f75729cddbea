//! Sub-workflow invocation declarations
//!
//! Declared under `lumen.workflows` in the header or as fenced
//! ```` ```workflow ```` blocks in the body.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a child workflow sees (and writes back to) the parent's variables
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InheritanceMode {
    /// Parent variables overlaid by the invocation params
    Inherit,
    /// Only the invocation params
    #[default]
    Isolated,
    /// Like `Inherit`, and variables the child changes are written back
    Merge,
}

impl InheritanceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InheritanceMode::Inherit => "inherit",
            InheritanceMode::Isolated => "isolated",
            InheritanceMode::Merge => "merge",
        }
    }
}

/// When a declared sub-workflow runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationTiming {
    /// Before the first model turn
    #[default]
    Start,
    /// Only when the model calls it as a tool
    OnDemand,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubWorkflowInvocation {
    /// Invocation name; defaults to the file stem of `path`
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Parameter bindings; string values are templates over the parent variables
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Value>,
    #[serde(default)]
    pub mode: InheritanceMode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_group: Option<String>,
    #[serde(default)]
    pub when: InvocationTiming,
}

impl SubWorkflowInvocation {
    /// Fill `name` from the path when it was left out
    pub fn normalize(mut self) -> Self {
        if self.name.trim().is_empty() {
            self.name = stem_name(&self.path);
        }
        self
    }
}

/// `./checks/lint.lumen.md` → `lint`
pub fn stem_name(path: &str) -> String {
    let file = Path::new(path)
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or_default();
    let file = file.strip_suffix(".md").unwrap_or(file);
    let file = file.strip_suffix(".lumen").unwrap_or(file);
    match file.split_once('.') {
        Some((head, _)) if !head.is_empty() => head.to_string(),
        _ => file.to_string(),
    }
}
