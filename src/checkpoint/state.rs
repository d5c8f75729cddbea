//! ResumeState - the persisted projection of an [`ExecutionContext`]

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::runtime::{
    CompletedTool, EvolutionChange, ExecutionContext, Interaction, InteractionLog, RunStatus,
};

/// Current on-disk format
pub const STATE_VERSION: u32 = 1;

/// Variable snapshot plus the ordered history of how it got there
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextEvolution {
    pub variables: BTreeMap<String, Value>,
    #[serde(default)]
    pub changes: Vec<EvolutionChange>,
    #[serde(default)]
    pub insights: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeState {
    pub version: u32,
    pub workflow_id: String,
    pub workflow_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<PathBuf>,
    pub content_hash: String,
    pub body_hash: String,
    pub model: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    pub started_at: DateTime<Utc>,
    pub step: u64,
    pub turns: u32,
    /// Resolved values of the declared parameters the run relied on
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    #[serde(default)]
    pub completed_tools: Vec<CompletedTool>,
    #[serde(default)]
    pub interactions: Vec<Interaction>,
    #[serde(default)]
    pub evolution: ContextEvolution,
    #[serde(default)]
    pub available_tools: Vec<String>,
}

impl ResumeState {
    pub fn from_context(ctx: &ExecutionContext) -> Self {
        Self {
            version: STATE_VERSION,
            workflow_id: ctx.workflow_id.clone(),
            workflow_name: ctx.workflow_name.clone(),
            source_path: ctx.source_path.clone(),
            content_hash: ctx.content_hash.clone(),
            body_hash: ctx.body_hash.clone(),
            model: ctx.model.clone(),
            status: ctx.status,
            phase: ctx.phase.clone(),
            started_at: ctx.started_at,
            step: ctx.step,
            turns: ctx.turns,
            parameters: ctx.parameters.clone(),
            completed_tools: ctx.completed_tools.clone(),
            interactions: ctx.interactions.entries().to_vec(),
            evolution: ContextEvolution {
                variables: ctx.variable_snapshot(),
                changes: ctx.changes.clone(),
                insights: ctx.insights.clone(),
            },
            available_tools: ctx.available_tools.clone(),
        }
    }

    /// Rebuild the context; the interaction cursor starts a new session
    pub fn restore(&self) -> ExecutionContext {
        let mut interactions = InteractionLog::from_entries(self.interactions.clone());
        interactions.start_session();

        ExecutionContext {
            workflow_id: self.workflow_id.clone(),
            workflow_name: self.workflow_name.clone(),
            model: self.model.clone(),
            content_hash: self.content_hash.clone(),
            body_hash: self.body_hash.clone(),
            source_path: self.source_path.clone(),
            started_at: self.started_at,
            status: self.status,
            step: self.step,
            turns: self.turns,
            phase: self.phase.clone(),
            variables: self
                .evolution
                .variables
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            parameters: self.parameters.clone(),
            interactions,
            completed_tools: self.completed_tools.clone(),
            changes: self.evolution.changes.clone(),
            insights: self.evolution.insights.clone(),
            available_tools: self.available_tools.clone(),
            session_tool_calls: 0,
        }
    }

    /// Names of tools the run actually called
    pub fn called_tools(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.completed_tools.iter().map(|t| t.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parse_document;
    use crate::provider::ToolCall;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sample() -> ExecutionContext {
        let doc = parse_document("---\nname: t\nmodel: m\n---\nHi {{x}}\n", None).unwrap();
        let mut ctx = ExecutionContext::new("t-1", &doc)
            .with_variables([("x".to_string(), json!("a"))].into_iter().collect())
            .with_parameters(BTreeMap::from([("x".to_string(), json!("a"))]));
        ctx.begin();
        ctx.record_user("Hi a");
        let call = ToolCall {
            id: "call_1".into(),
            name: "set_variable".into(),
            arguments: json!({"name": "y", "value": 1}),
        };
        ctx.record_assistant(None, vec![call.clone()]);
        ctx.set_variable("y", json!(1), "tool:set_variable", None);
        ctx.record_tool(&call, Ok(json!("y updated")));
        ctx.record_insight("y matters");
        ctx
    }

    #[test]
    fn restore_reconstructs_context() {
        let ctx = sample();
        let restored = ResumeState::from_context(&ctx).restore();

        assert_eq!(restored.variables, ctx.variables);
        assert_eq!(restored.completed_tools, ctx.completed_tools);
        assert_eq!(restored.interactions.entries(), ctx.interactions.entries());
        assert_eq!(restored.insights, vec!["y matters".to_string()]);
        assert_eq!(restored.interactions.session_start(), 2 + 1);
    }

    #[test]
    fn restore_then_project_is_identical() {
        let state = ResumeState::from_context(&sample());
        assert_eq!(ResumeState::from_context(&state.restore()), state);
    }

    #[test]
    fn json_roundtrip_keeps_version() {
        let state = ResumeState::from_context(&sample());
        let text = serde_json::to_string_pretty(&state).unwrap();
        let back: ResumeState = serde_json::from_str(&text).unwrap();
        assert_eq!(back.version, STATE_VERSION);
        assert_eq!(back, state);
        assert_eq!(back.called_tools(), vec!["set_variable"]);
    }
}
