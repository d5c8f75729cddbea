//! ExecutionContext - mutable state of one run
//!
//! The interaction log is append-only; a cursor marks where the current
//! session (fresh start or resume) began. Variables change only through
//! [`ExecutionContext::set_variable`], which records an [`EvolutionChange`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ast::WorkflowDocument;
use crate::provider::{Message, MessageRole, ToolCall};

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the interaction log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Set on tool-role entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
    pub timestamp: DateTime<Utc>,
}

impl Interaction {
    fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            is_error: false,
            timestamp: Utc::now(),
        }
    }

    fn to_message(&self) -> Message {
        match self.role {
            MessageRole::User => Message::user(&self.content),
            MessageRole::System => Message::system(&self.content),
            MessageRole::Assistant if self.tool_calls.is_empty() => {
                Message::assistant(&self.content)
            }
            MessageRole::Assistant => {
                Message::assistant_with_calls(Some(&self.content), &self.tool_calls)
            }
            MessageRole::Tool => {
                let id = self.tool_call_id.clone().unwrap_or_default();
                if self.is_error {
                    Message::tool_error(id, &self.content)
                } else {
                    Message::tool_result(id, &self.content)
                }
            }
        }
    }
}

/// Append-only conversation record with a session cursor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InteractionLog {
    entries: Vec<Interaction>,
    session_start: usize,
}

impl InteractionLog {
    pub fn from_entries(entries: Vec<Interaction>) -> Self {
        Self {
            entries,
            session_start: 0,
        }
    }

    pub fn push(&mut self, entry: Interaction) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[Interaction] {
        &self.entries
    }

    /// Entries appended since the current session began
    pub fn current_session(&self) -> &[Interaction] {
        &self.entries[self.session_start..]
    }

    /// Mark the end of history carried over from a previous session
    pub fn start_session(&mut self) {
        self.session_start = self.entries.len();
    }

    pub fn session_start(&self) -> usize {
        self.session_start
    }

    pub fn last(&self) -> Option<&Interaction> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A finished tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedTool {
    pub call_id: String,
    pub name: String,
    pub parameters: Value,
    pub result: Value,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// One variable change, in order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionChange {
    pub key: String,
    #[serde(default)]
    pub old: Option<Value>,
    pub new: Value,
    /// `tool:<name>` or `sub_workflow:<name>`
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionContext {
    pub workflow_id: String,
    pub workflow_name: String,
    pub model: String,
    pub content_hash: String,
    pub body_hash: String,
    pub source_path: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub status: RunStatus,
    /// Engine turns plus tool calls since the run first started
    pub step: u64,
    /// Engine turns since the run first started
    pub turns: u32,
    /// Free-text label of the current phase
    pub phase: Option<String>,
    pub variables: FxHashMap<String, Value>,
    /// Resolved values of declared parameters
    pub parameters: BTreeMap<String, Value>,
    pub interactions: InteractionLog,
    pub completed_tools: Vec<CompletedTool>,
    pub changes: Vec<EvolutionChange>,
    pub insights: Vec<String>,
    /// Tool names offered to the engine
    pub available_tools: Vec<String>,
    /// Tool calls since this session began (checkpoint policy counter)
    pub session_tool_calls: u32,
}

impl ExecutionContext {
    pub fn new(workflow_id: impl Into<String>, doc: &WorkflowDocument) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            workflow_name: doc.name.clone(),
            model: doc.model.clone(),
            content_hash: doc.content_hash.clone(),
            body_hash: doc.body_hash.clone(),
            source_path: doc.source_path.clone(),
            started_at: Utc::now(),
            status: RunStatus::NotStarted,
            step: 0,
            turns: 0,
            phase: None,
            variables: FxHashMap::default(),
            parameters: BTreeMap::new(),
            interactions: InteractionLog::default(),
            completed_tools: Vec::new(),
            changes: Vec::new(),
            insights: Vec::new(),
            available_tools: Vec::new(),
            session_tool_calls: 0,
        }
    }

    /// Initial variables; not recorded as changes
    pub fn with_variables(mut self, variables: FxHashMap<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_parameters(mut self, parameters: BTreeMap<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    /// `NotStarted → InProgress`; no-op otherwise
    pub fn begin(&mut self) {
        if self.status == RunStatus::NotStarted {
            self.status = RunStatus::InProgress;
        }
    }

    /// Overwrite a variable and record the change
    pub fn set_variable(
        &mut self,
        key: impl Into<String>,
        value: Value,
        source: impl Into<String>,
        reasoning: Option<String>,
    ) {
        let key = key.into();
        let old = self.variables.insert(key.clone(), value.clone());
        self.changes.push(EvolutionChange {
            key,
            old,
            new: value,
            source: source.into(),
            reasoning,
        });
    }

    pub fn record_insight(&mut self, text: impl Into<String>) {
        self.insights.push(text.into());
    }

    pub fn record_user(&mut self, text: impl Into<String>) {
        self.interactions.push(Interaction::new(MessageRole::User, text));
    }

    pub fn record_assistant(&mut self, text: Option<String>, calls: Vec<ToolCall>) {
        let mut entry = Interaction::new(MessageRole::Assistant, text.unwrap_or_default());
        entry.tool_calls = calls;
        self.interactions.push(entry);
        self.turns += 1;
        self.step += 1;
    }

    /// Record a tool outcome: a tool-role entry plus a [`CompletedTool`]
    pub fn record_tool(&mut self, call: &ToolCall, outcome: Result<Value, String>) {
        let success = outcome.is_ok();
        let result = match outcome {
            Ok(value) => value,
            Err(error) => Value::String(error),
        };

        let mut entry = Interaction::new(MessageRole::Tool, value_text(&result));
        entry.tool_call_id = Some(call.id.clone());
        entry.is_error = !success;
        self.interactions.push(entry);

        self.completed_tools.push(CompletedTool {
            call_id: call.id.clone(),
            name: call.name.clone(),
            parameters: call.arguments.clone(),
            result,
            success,
            timestamp: Utc::now(),
        });
        self.session_tool_calls += 1;
        self.step += 1;
    }

    pub fn is_tool_completed(&self, call_id: &str) -> bool {
        self.completed_tools.iter().any(|t| t.call_id == call_id)
    }

    /// Tool calls of the last assistant turn that have no recorded result
    pub fn pending_tool_calls(&self) -> Vec<ToolCall> {
        let Some(turn) = self
            .interactions
            .entries()
            .iter()
            .rev()
            .find(|e| e.role == MessageRole::Assistant)
        else {
            return Vec::new();
        };

        turn.tool_calls
            .iter()
            .filter(|call| !self.is_tool_completed(&call.id))
            .cloned()
            .collect()
    }

    /// Final answer when the log ends with an assistant turn without tool calls
    pub fn final_answer(&self) -> Option<&str> {
        self.interactions
            .last()
            .filter(|e| e.role == MessageRole::Assistant && e.tool_calls.is_empty())
            .map(|e| e.content.as_str())
    }

    /// Variables changed during the run, with their final values
    pub fn output_variables(&self) -> BTreeMap<String, Value> {
        let keys: BTreeSet<&str> = self.changes.iter().map(|c| c.key.as_str()).collect();
        keys.into_iter()
            .filter_map(|k| self.variables.get(k).map(|v| (k.to_string(), v.clone())))
            .collect()
    }

    /// Sorted variable snapshot
    pub fn variable_snapshot(&self) -> BTreeMap<String, Value> {
        self.variables
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Full history as engine messages
    pub fn to_messages(&self) -> Vec<Message> {
        self.interactions
            .entries()
            .iter()
            .map(Interaction::to_message)
            .collect()
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parse_document;
    use crate::provider::MessageContent;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn ctx() -> ExecutionContext {
        let doc = parse_document("---\nname: t\nmodel: m\n---\nHello\n", None).unwrap();
        ExecutionContext::new("t-1", &doc)
    }

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: json!({"q": 1}),
        }
    }

    #[test]
    fn begin_only_from_not_started() {
        let mut ctx = ctx();
        ctx.begin();
        assert_eq!(ctx.status, RunStatus::InProgress);
        ctx.status = RunStatus::Failed;
        ctx.begin();
        assert_eq!(ctx.status, RunStatus::Failed);
    }

    #[test]
    fn set_variable_records_old_value() {
        let mut ctx = ctx().with_variables(FxHashMap::from_iter([("x".to_string(), json!(1))]));
        ctx.set_variable("x", json!(2), "tool:set_variable", Some("bump".into()));
        assert_eq!(ctx.variables["x"], json!(2));
        assert_eq!(ctx.changes[0].old, Some(json!(1)));
        assert_eq!(ctx.changes[0].source, "tool:set_variable");
        assert_eq!(ctx.output_variables(), BTreeMap::from([("x".to_string(), json!(2))]));
    }

    #[test]
    fn pending_calls_exclude_completed() {
        let mut ctx = ctx();
        ctx.record_user("go");
        ctx.record_assistant(None, vec![call("a", "search"), call("b", "search")]);
        ctx.record_tool(&call("a", "search"), Ok(json!("found")));

        let pending = ctx.pending_tool_calls();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "b");
        assert_eq!(ctx.step, 2);
        assert_eq!(ctx.session_tool_calls, 1);
    }

    #[test]
    fn failed_tool_becomes_error_message() {
        let mut ctx = ctx();
        ctx.record_assistant(Some("trying".into()), vec![call("a", "boom")]);
        ctx.record_tool(&call("a", "boom"), Err("exploded".to_string()));

        let messages = ctx.to_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, MessageRole::Tool);
        assert_eq!(messages[1].content.as_text().as_deref(), Some("exploded"));
        assert!(matches!(messages[1].content, MessageContent::Blocks(_)));
        assert!(!ctx.completed_tools[0].success);
    }

    #[test]
    fn session_cursor() {
        let mut ctx = ctx();
        ctx.record_user("one");
        ctx.interactions.start_session();
        assert!(ctx.interactions.current_session().is_empty());
        ctx.record_user("two");
        assert_eq!(ctx.interactions.current_session().len(), 1);
        assert_eq!(ctx.interactions.len(), 2);
    }

    #[test]
    fn final_answer_only_for_plain_assistant_turn() {
        let mut ctx = ctx();
        ctx.record_assistant(None, vec![call("a", "x")]);
        assert_eq!(ctx.final_answer(), None);
        ctx.record_tool(&call("a", "x"), Ok(json!(1)));
        ctx.record_assistant(Some("done".into()), vec![]);
        assert_eq!(ctx.final_answer(), Some("done"));
    }
}
