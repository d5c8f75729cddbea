//! Capabilities - everything the engine can call as a tool
//!
//! Native tools and declared sub-workflows sit behind one `invoke`. Both
//! return a [`ToolOutput`] whose effects the orchestrator applies.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::{json, Value};

use crate::ast::{SubWorkflowInvocation, WorkflowDocument};
use crate::error::LumenError;
use crate::provider::ToolDefinition;
use crate::tools::{builtin_tools, validate_arguments, Tool, ToolError, ToolOutput, ToolRegistry};

use super::composer::Composer;

pub enum Capability {
    Native(Arc<dyn Tool>),
    SubWorkflow(SubWorkflowInvocation),
}

impl Capability {
    pub fn name(&self) -> &str {
        match self {
            Self::Native(tool) => tool.name(),
            Self::SubWorkflow(inv) => &inv.name,
        }
    }

    pub fn is_sub_workflow(&self) -> bool {
        matches!(self, Self::SubWorkflow(_))
    }

    /// Provenance label for variable changes this capability causes
    pub fn source(&self) -> String {
        match self {
            Self::Native(tool) => format!("tool:{}", tool.name()),
            Self::SubWorkflow(inv) => format!("sub_workflow:{}", inv.name),
        }
    }

    pub fn definition(&self) -> ToolDefinition {
        match self {
            Self::Native(tool) => {
                ToolDefinition::new(tool.name(), tool.description(), tool.parameters_schema())
            }
            Self::SubWorkflow(inv) => {
                let properties: serde_json::Map<String, Value> =
                    inv.params.keys().map(|k| (k.clone(), json!({}))).collect();
                let description = inv
                    .description
                    .clone()
                    .unwrap_or_else(|| format!("Run the '{}' sub-workflow ({})", inv.name, inv.path));
                ToolDefinition::new(
                    &inv.name,
                    description,
                    json!({"type": "object", "properties": properties}),
                )
            }
        }
    }

    /// Run the capability
    ///
    /// The outer error is fatal to the calling run (recursion, depth); the
    /// inner one is an ordinary tool failure.
    pub async fn invoke(
        &self,
        args: Value,
        composer: &Composer<'_>,
        variables: &FxHashMap<String, Value>,
    ) -> Result<Result<ToolOutput, ToolError>, LumenError> {
        match self {
            Self::Native(tool) => {
                if let Err(e) = validate_arguments(tool.name(), &tool.parameters_schema(), &args) {
                    return Ok(Err(e));
                }
                Ok(tool.call(args).await)
            }
            Self::SubWorkflow(inv) => composer.invoke(inv, variables, args).await,
        }
    }
}

/// Name → capability table for one run
pub struct CapabilitySet {
    entries: FxHashMap<String, Capability>,
    order: Vec<String>,
}

impl CapabilitySet {
    /// Built-ins, registered tools declared in `tools:`, then every declared sub-workflow
    pub fn build(doc: &WorkflowDocument, registry: &ToolRegistry) -> Self {
        let mut set = Self {
            entries: FxHashMap::default(),
            order: Vec::new(),
        };

        for tool in builtin_tools() {
            set.insert(Capability::Native(tool));
        }
        for name in &doc.tools {
            match registry.get(name) {
                Some(tool) => set.insert(Capability::Native(tool)),
                None => tracing::warn!(tool = %name, workflow = %doc.name, "declared tool is not registered"),
            }
        }
        for inv in &doc.invocations {
            set.insert(Capability::SubWorkflow(inv.clone()));
        }

        set
    }

    fn insert(&mut self, capability: Capability) {
        let name = capability.name().to_string();
        if self.entries.insert(name.clone(), capability).is_none() {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Capability> {
        self.entries.get(name)
    }

    /// Names in offer order
    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.entries.get(name))
            .map(Capability::definition)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parse_document;
    use crate::tools::{FnTool, BUILTIN_TOOLS};

    fn registry() -> ToolRegistry {
        ToolRegistry::new()
            .with(FnTool::new("search", "Search", json!({"type": "object"}), |_| {
                Ok(ToolOutput::text("hit"))
            }))
            .with(FnTool::new("hidden", "Not declared", json!({"type": "object"}), |_| {
                Ok(ToolOutput::text("nope"))
            }))
    }

    #[test]
    fn offers_builtins_declared_tools_and_sub_workflows() {
        let doc = parse_document(
            "---\nname: t\nmodel: m\ntools: [search, missing]\nlumen:\n  workflows:\n    - path: ./lint.lumen.md\n---\nGo\n",
            None,
        )
        .unwrap();
        let set = CapabilitySet::build(&doc, &registry());

        let names = set.names();
        assert_eq!(&names[..BUILTIN_TOOLS.len()], BUILTIN_TOOLS);
        assert!(names.contains(&"search".to_string()));
        assert!(names.contains(&"lint".to_string()));
        assert!(!names.contains(&"hidden".to_string()));
        assert!(!names.contains(&"missing".to_string()));

        assert_eq!(set.get("lint").map(Capability::source).as_deref(), Some("sub_workflow:lint"));
        assert_eq!(set.get("search").map(Capability::source).as_deref(), Some("tool:search"));
        assert_eq!(set.definitions().len(), set.len());
    }
}
