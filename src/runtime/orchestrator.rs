//! Orchestrator - drives one workflow run
//!
//! The orchestrator is the only component that talks to the engine and to
//! tools. One run:
//!
//! 1. Run `when: start` sub-workflows (prelude), binding their results
//! 2. Render the body into the first user message
//! 3. Loop: engine turn → final text (completed) or tool calls
//! 4. Each tool call is validated, invoked, recorded and checkpointed per policy
//!
//! Tool failures are fed back to the engine. Engine failures (after retries),
//! `max_turns` and the run deadline fail the run. Cancellation stops the loop
//! at the next await point. Failed and cancelled runs get a best-effort final
//! checkpoint; completed runs have their checkpoint archived.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::ast::{InvocationTiming, SubWorkflowInvocation, WorkflowDocument};
use crate::binding::{missing_variables, resolve_parameters};
use crate::checkpoint::{sanitize_id, validate_compatibility, validate_id, CheckpointStore, ResumeState};
use crate::config::{LumenConfig, OnComplete};
use crate::error::{LumenError, Result};
use crate::event::{EventKind, EventLog};
use crate::provider::{ChatRequest, ChatResponse, Provider, ToolCall, Usage};
use crate::tools::{ContextEffect, ToolError, ToolOutput, ToolRegistry};
use crate::util::{DEFAULT_MAX_DEPTH, DEFAULT_MAX_TURNS, RUN_TIMEOUT, TOOL_TIMEOUT};
use crate::validation::Validator;

use super::capability::CapabilitySet;
use super::composer::Composer;
use super::context::{ExecutionContext, RunStatus};
use super::schedule;

// ═══════════════════════════════════════════════════════════════════════════
// SETTINGS & CONTROL
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub max_turns: u32,
    pub tool_timeout: Duration,
    pub run_timeout: Duration,
    pub max_depth: usize,
    pub on_complete: OnComplete,
    /// Model used when a document leaves `model` empty
    pub model: Option<String>,
    /// Extra tool names the validator accepts
    pub known_tools: Vec<String>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            tool_timeout: TOOL_TIMEOUT,
            run_timeout: RUN_TIMEOUT,
            max_depth: DEFAULT_MAX_DEPTH,
            on_complete: OnComplete::default(),
            model: None,
            known_tools: Vec::new(),
        }
    }
}

impl RunSettings {
    pub fn from_config(config: &LumenConfig) -> Self {
        Self {
            max_turns: config.runtime.max_turns,
            tool_timeout: config.runtime.tool_timeout(),
            run_timeout: config.runtime.run_timeout(),
            max_depth: config.runtime.max_depth,
            on_complete: config.checkpoint.on_complete,
            model: config.provider.model.clone(),
            known_tools: config.known_tools.clone(),
        }
    }
}

/// Handle for steering a run from outside (signals, UIs, tests)
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    token: CancellationToken,
    checkpoint: Arc<AtomicBool>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop the run (and its sub-workflows) at the next await point
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Write a checkpoint after the next tool call regardless of policy
    pub fn request_checkpoint(&self) {
        self.checkpoint.store(true, Ordering::SeqCst);
    }

    fn take_checkpoint_request(&self) -> bool {
        self.checkpoint.swap(false, Ordering::SeqCst)
    }

    /// Cancelled with the parent, never the other way around
    fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            checkpoint: Arc::new(AtomicBool::new(false)),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// OUTCOME
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub workflow_id: String,
    pub status: RunStatus,
    /// Final engine text
    pub output: Option<String>,
    pub turns: u32,
    pub usage: Usage,
    pub context: ExecutionContext,
}

impl RunOutcome {
    /// Output parsed as JSON when possible, else a string
    pub fn output_value(&self) -> Value {
        match &self.output {
            Some(text) => serde_json::from_str(text.trim())
                .unwrap_or_else(|_| Value::String(text.clone())),
            None => Value::Null,
        }
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.context.variables.get(name)
    }

    /// Variables changed during the run, with final values
    pub fn outputs(&self) -> BTreeMap<String, Value> {
        self.context.output_variables()
    }
}

enum Finish {
    Completed(String),
    Cancelled,
}

// ═══════════════════════════════════════════════════════════════════════════
// ORCHESTRATOR
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    tools: ToolRegistry,
    store: Option<CheckpointStore>,
    events: EventLog,
    settings: RunSettings,
    control: RunControl,
    /// Canonical paths of the documents above this run
    lineage: Vec<PathBuf>,
    depth: usize,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("provider", &self.provider.name())
            .field("tools", &self.tools)
            .field("store", &self.store)
            .field("depth", &self.depth)
            .finish()
    }
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            tools: ToolRegistry::new(),
            store: None,
            events: EventLog::new(),
            settings: RunSettings::default(),
            control: RunControl::new(),
            lineage: Vec::new(),
            depth: 0,
        }
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_store(mut self, store: CheckpointStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_settings(mut self, settings: RunSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_events(mut self, events: EventLog) -> Self {
        self.events = events;
        self
    }

    pub fn with_control(mut self, control: RunControl) -> Self {
        self.control = control;
        self
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn control(&self) -> &RunControl {
        &self.control
    }

    pub fn store(&self) -> Option<&CheckpointStore> {
        self.store.as_ref()
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    pub(super) fn lineage(&self) -> &[PathBuf] {
        &self.lineage
    }

    pub(super) fn depth(&self) -> usize {
        self.depth
    }

    /// Orchestrator for a sub-workflow: same engine, tools, store and log
    pub(super) fn child(&self, lineage: Vec<PathBuf>) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            tools: self.tools.clone(),
            store: self.store.clone(),
            events: self.events.clone(),
            settings: self.settings.clone(),
            control: self.control.child(),
            lineage,
            depth: self.depth + 1,
        }
    }

    /// `<name>-<UTC timestamp>`
    pub fn new_run_id(doc: &WorkflowDocument) -> String {
        format!("{}-{}", sanitize_id(&doc.name), Utc::now().format("%Y%m%d-%H%M%S"))
    }

    /// Validator seeded with everything this orchestrator can call
    pub fn validator(&self) -> Validator {
        Validator::new()
            .with_known_tools(self.tools.names())
            .with_known_tools(self.settings.known_tools.iter().cloned())
    }

    // ───────────────────────────────────────────────────────────────────────
    // Entry points
    // ───────────────────────────────────────────────────────────────────────

    pub async fn run(&self, doc: &WorkflowDocument, inputs: &FxHashMap<String, Value>) -> Result<RunOutcome> {
        self.run_with_id(&Self::new_run_id(doc), doc, inputs).await
    }

    /// Fresh run under a caller-chosen id
    pub async fn run_with_id(
        &self,
        workflow_id: &str,
        doc: &WorkflowDocument,
        inputs: &FxHashMap<String, Value>,
    ) -> Result<RunOutcome> {
        validate_id(workflow_id)?;

        let report = self.validator().check(doc)?;
        for warning in &report.warnings {
            tracing::warn!(workflow_id, "{}", warning);
        }

        let resolution = resolve_parameters(doc, inputs).map_err(|e| e.with_workflow(workflow_id))?;
        let variables = resolution.variables();
        let parameters: BTreeMap<String, Value> = resolution
            .parameters
            .iter()
            .filter(|p| p.declared)
            .filter_map(|p| p.value.clone().map(|v| (p.name.clone(), v)))
            .collect();

        // Nothing runs until every body reference can be satisfied
        let prelude: Vec<&str> = prelude_invocations(doc).map(|inv| inv.name.as_str()).collect();
        let missing = missing_variables(&doc.template, |name| {
            variables.contains_key(name) || prelude.contains(&name)
        });
        if !missing.is_empty() {
            return Err(LumenError::MissingVariables {
                workflow: workflow_id.to_string(),
                names: missing,
            });
        }

        let ctx = ExecutionContext::new(workflow_id, doc)
            .with_variables(variables)
            .with_parameters(parameters);
        self.execute(doc, ctx, false).await
    }

    /// Continue a checkpointed run
    ///
    /// `force` resumes despite a compatibility mismatch, and starts over
    /// (moving the unreadable file aside) when the checkpoint is corrupted.
    pub async fn resume(&self, workflow_id: &str, doc: &WorkflowDocument, force: bool) -> Result<RunOutcome> {
        let store = self.store.as_ref().ok_or_else(|| LumenError::ConfigError {
            reason: "resuming requires a checkpoint store".to_string(),
        })?;

        let state = match store.load(workflow_id).await {
            Ok(Some(state)) => state,
            Ok(None) => {
                return Err(LumenError::CheckpointNotFound {
                    workflow: workflow_id.to_string(),
                })
            }
            Err(e @ LumenError::CheckpointCorrupted { .. }) if force => {
                tracing::warn!(workflow_id, error = %e, "starting over from a corrupted checkpoint");
                store.quarantine(workflow_id).await?;
                return self.run_with_id(workflow_id, doc, &FxHashMap::default()).await;
            }
            Err(e) => return Err(e),
        };

        let report = validate_compatibility(&state, doc).into_result(workflow_id, force)?;
        for warning in &report.warnings {
            tracing::warn!(workflow_id, score = report.score, "{}", warning);
        }

        self.resume_state(state, doc).await
    }

    /// Resume a checkpoint of `workflow_id` that did not complete, when compatible, else run fresh
    pub(super) async fn run_or_resume(
        &self,
        workflow_id: &str,
        doc: &WorkflowDocument,
        inputs: &FxHashMap<String, Value>,
    ) -> Result<RunOutcome> {
        if let Some(store) = &self.store {
            match store.load(workflow_id).await {
                Ok(Some(state)) if state.status != RunStatus::Completed => {
                    if validate_compatibility(&state, doc).can_resume {
                        tracing::info!(workflow_id, step = state.step, "resuming from checkpoint");
                        return self.resume_state(state, doc).await;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(workflow_id, error = %e, "ignoring unreadable checkpoint");
                    store.quarantine(workflow_id).await?;
                }
            }
        }
        self.run_with_id(workflow_id, doc, inputs).await
    }

    async fn resume_state(&self, state: ResumeState, doc: &WorkflowDocument) -> Result<RunOutcome> {
        let mut ctx = state.restore();
        ctx.content_hash = doc.content_hash.clone();
        ctx.body_hash = doc.body_hash.clone();
        ctx.model = doc.model.clone();
        if ctx.status.is_terminal() {
            ctx.status = RunStatus::InProgress;
        }
        self.execute(doc, ctx, true).await
    }

    // ───────────────────────────────────────────────────────────────────────
    // Run lifecycle
    // ───────────────────────────────────────────────────────────────────────

    async fn execute(&self, doc: &WorkflowDocument, mut ctx: ExecutionContext, resumed: bool) -> Result<RunOutcome> {
        let started = std::time::Instant::now();
        let workflow_id: Arc<str> = ctx.workflow_id.as_str().into();
        let capabilities = CapabilitySet::build(doc, &self.tools);
        ctx.available_tools = capabilities.names();

        self.events.emit(EventKind::RunStarted {
            workflow_id: Arc::clone(&workflow_id),
            name: doc.name.clone(),
            content_hash: doc.content_hash.clone(),
            resumed,
        });
        tracing::info!(workflow_id = %workflow_id, workflow = %doc.name, resumed, "run started");

        let span = tracing::info_span!("run", workflow_id = %workflow_id, depth = self.depth);
        let deadline = Instant::now() + self.settings.run_timeout;
        let mut usage = Usage::default();
        let result = self
            .drive(doc, &mut ctx, &capabilities, deadline, &mut usage)
            .instrument(span)
            .await;

        let output = match result {
            Ok(Finish::Completed(text)) => {
                ctx.status = RunStatus::Completed;
                self.archive(&ctx).await;
                let duration_ms = started.elapsed().as_millis() as u64;
                self.events.emit(EventKind::RunCompleted {
                    workflow_id: Arc::clone(&workflow_id),
                    turns: ctx.turns,
                    duration_ms,
                });
                tracing::info!(workflow_id = %workflow_id, turns = ctx.turns, duration_ms, "run completed");
                Some(text)
            }
            Ok(Finish::Cancelled) => {
                ctx.status = RunStatus::Cancelled;
                self.final_checkpoint(doc, &ctx).await;
                self.events.emit(EventKind::RunCancelled {
                    workflow_id: Arc::clone(&workflow_id),
                });
                tracing::warn!(workflow_id = %workflow_id, "run cancelled");
                None
            }
            Err(error) => {
                ctx.status = RunStatus::Failed;
                self.final_checkpoint(doc, &ctx).await;
                self.events.emit(EventKind::RunFailed {
                    workflow_id: Arc::clone(&workflow_id),
                    error: error.to_string(),
                });
                tracing::error!(workflow_id = %workflow_id, error = %error, "run failed");
                return Err(error);
            }
        };

        Ok(RunOutcome {
            workflow_id: ctx.workflow_id.clone(),
            status: ctx.status,
            output,
            turns: ctx.turns,
            usage,
            context: ctx,
        })
    }

    async fn drive(
        &self,
        doc: &WorkflowDocument,
        ctx: &mut ExecutionContext,
        capabilities: &CapabilitySet,
        deadline: Instant,
        usage: &mut Usage,
    ) -> Result<Finish> {
        if ctx.interactions.is_empty() {
            if !self.run_prelude(doc, ctx).await? {
                return Ok(Finish::Cancelled);
            }
            let prompt = doc
                .template
                .render(&ctx.variables)
                .map_err(|e| e.with_workflow(&ctx.workflow_id))?;
            ctx.record_user(prompt);
        } else if let Some(answer) = ctx.final_answer() {
            // Crashed between the final answer and completion
            return Ok(Finish::Completed(answer.to_string()));
        } else {
            let pending = ctx.pending_tool_calls();
            if !pending.is_empty() {
                tracing::info!(count = pending.len(), "running tool calls left unfinished by the previous session");
            }
            for call in &pending {
                if self.control.is_cancelled() {
                    return Ok(Finish::Cancelled);
                }
                self.dispatch(doc, ctx, capabilities, call, deadline).await?;
            }
        }

        ctx.begin();

        loop {
            if self.control.is_cancelled() {
                return Ok(Finish::Cancelled);
            }
            if Instant::now() >= deadline {
                return Err(self.timeout_error(ctx));
            }
            if ctx.turns >= self.settings.max_turns {
                return Err(LumenError::Orchestration {
                    workflow: ctx.workflow_id.clone(),
                    reason: format!("exceeded max_turns ({})", self.settings.max_turns),
                });
            }

            let Some(response) = self.call_engine(doc, ctx, capabilities, deadline).await? else {
                return Ok(Finish::Cancelled);
            };
            *usage += response.usage;

            self.events.emit(EventKind::ModelResponded {
                workflow_id: ctx.workflow_id.as_str().into(),
                turn: ctx.turns + 1,
                tool_calls: response.tool_calls.len(),
                input_tokens: response.usage.input_tokens,
                output_tokens: response.usage.output_tokens,
            });

            let text = response.text();
            if response.tool_calls.is_empty() {
                let Some(text) = text.filter(|t| !t.trim().is_empty()) else {
                    return Err(LumenError::Orchestration {
                        workflow: ctx.workflow_id.clone(),
                        reason: "engine returned neither text nor tool calls".to_string(),
                    });
                };
                ctx.record_assistant(Some(text.clone()), Vec::new());
                return Ok(Finish::Completed(text));
            }

            if let Some(bad) = response.tool_calls.iter().find(|c| c.name.is_empty() || c.id.is_empty()) {
                return Err(LumenError::Orchestration {
                    workflow: ctx.workflow_id.clone(),
                    reason: format!("engine returned a malformed tool call: {:?}", bad),
                });
            }

            ctx.record_assistant(text, response.tool_calls.clone());
            for call in &response.tool_calls {
                // Calls left behind stay pending in the checkpoint
                if self.control.is_cancelled() {
                    return Ok(Finish::Cancelled);
                }
                self.dispatch(doc, ctx, capabilities, call, deadline).await?;
            }
        }
    }

    /// Run `when: start` sub-workflows not yet bound; `false` when cancelled
    async fn run_prelude(&self, doc: &WorkflowDocument, ctx: &mut ExecutionContext) -> Result<bool> {
        let pending: Vec<&SubWorkflowInvocation> = prelude_invocations(doc)
            .filter(|inv| !ctx.variables.contains_key(&inv.name))
            .collect();
        if pending.is_empty() {
            return Ok(true);
        }

        ctx.phase = Some("prelude".to_string());
        let composer = Composer::new(self, &ctx.workflow_id, doc);

        for batch in schedule::batches(&pending) {
            if self.control.is_cancelled() {
                return Ok(false);
            }

            let vars = &ctx.variables;
            let results = join_all(
                batch
                    .iter()
                    .map(|inv| composer.invoke(inv, vars, Value::Object(Default::default()))),
            )
            .await;

            for (inv, result) in batch.iter().zip(results) {
                let source = format!("sub_workflow:{}", inv.name);
                match result? {
                    Ok(output) => {
                        self.apply_effects(ctx, &source, &output);
                    }
                    // Left unbound so a resumed run picks the child up again
                    Err(ToolError::Cancelled { .. }) if self.control.is_cancelled() => {
                        tracing::info!(sub_workflow = %inv.name, "prelude sub-workflow cancelled");
                    }
                    Err(error) => {
                        tracing::warn!(sub_workflow = %inv.name, error = %error, "prelude sub-workflow failed");
                        let failure = serde_json::json!({
                            "status": RunStatus::Failed.as_str(),
                            "output": Value::Null,
                            "variables": {},
                            "error": error.to_string(),
                        });
                        self.set_variable(ctx, &inv.name, failure, &source, None);
                    }
                }
            }

            if self.control.is_cancelled() {
                return Ok(false);
            }
            if doc.extension.checkpoint.trigger != crate::ast::CheckpointTrigger::Manual {
                self.checkpoint(doc, ctx).await?;
            }
        }

        ctx.phase = None;
        Ok(true)
    }

    /// Invoke one tool call, then checkpoint if the policy says so
    async fn dispatch(
        &self,
        doc: &WorkflowDocument,
        ctx: &mut ExecutionContext,
        capabilities: &CapabilitySet,
        call: &ToolCall,
        deadline: Instant,
    ) -> Result<()> {
        let requested_by_tool = self.invoke_tool(doc, ctx, capabilities, call, deadline).await?;
        let requested_by_caller = self.control.take_checkpoint_request();

        if requested_by_tool
            || requested_by_caller
            || doc.extension.checkpoint.is_due(ctx.session_tool_calls)
        {
            self.checkpoint(doc, ctx).await?;
        }
        Ok(())
    }

    /// Returns whether the tool asked for a checkpoint
    ///
    /// The run deadline is raced against the call itself. A call interrupted
    /// by cancellation is not recorded and stays pending for resume.
    async fn invoke_tool(
        &self,
        doc: &WorkflowDocument,
        ctx: &mut ExecutionContext,
        capabilities: &CapabilitySet,
        call: &ToolCall,
        deadline: Instant,
    ) -> Result<bool> {
        let workflow_id: Arc<str> = ctx.workflow_id.as_str().into();
        self.events.emit(EventKind::ToolInvoked {
            workflow_id: Arc::clone(&workflow_id),
            tool: call.name.clone(),
            call_id: call.id.clone(),
            arguments: call.arguments.clone(),
        });

        let started = std::time::Instant::now();
        let capability = capabilities.get(&call.name);
        tracing::debug!(
            tool = %call.name,
            call_id = %call.id,
            idempotent = matches!(capability, Some(super::Capability::Native(t)) if t.idempotent()),
            "tool invoked"
        );

        let outcome: std::result::Result<ToolOutput, ToolError> = match capability {
            None => Err(ToolError::NotFound {
                tool: call.name.clone(),
            }),
            Some(capability) if capability.is_sub_workflow() => {
                // Cancellation reaches the child through its own token
                let composer = Composer::new(self, &ctx.workflow_id, doc);
                tokio::select! {
                    biased;
                    _ = tokio::time::sleep_until(deadline) => return Err(self.timeout_error(ctx)),
                    result = capability.invoke(call.arguments.clone(), &composer, &ctx.variables) => result?,
                }
            }
            Some(capability) => {
                let composer = Composer::new(self, &ctx.workflow_id, doc);
                let timeout = self.settings.tool_timeout;
                tokio::select! {
                    biased;
                    _ = self.control.token.cancelled() => Err(ToolError::Cancelled { tool: call.name.clone() }),
                    _ = tokio::time::sleep_until(deadline) => return Err(self.timeout_error(ctx)),
                    result = tokio::time::timeout(timeout, capability.invoke(call.arguments.clone(), &composer, &ctx.variables)) => {
                        match result {
                            Ok(result) => result?,
                            Err(_) => Err(ToolError::Timeout { tool: call.name.clone(), secs: timeout.as_secs() }),
                        }
                    }
                }
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let mut requested = false;
        match outcome {
            Ok(output) => {
                let source = capability
                    .map(super::Capability::source)
                    .unwrap_or_else(|| format!("tool:{}", call.name));
                requested = self.apply_effects(ctx, &source, &output);
                ctx.record_tool(call, Ok(output.content));
                self.events.emit(EventKind::ToolCompleted {
                    workflow_id,
                    tool: call.name.clone(),
                    call_id: call.id.clone(),
                    duration_ms,
                });
                tracing::debug!(tool = %call.name, duration_ms, "tool completed");
            }
            Err(ToolError::Cancelled { .. }) if self.control.is_cancelled() => {
                tracing::info!(tool = %call.name, call_id = %call.id, "tool call interrupted by cancellation");
            }
            Err(error) => {
                tracing::warn!(tool = %call.name, call_id = %call.id, error = %error, "tool failed");
                ctx.record_tool(call, Err(error.to_string()));
                self.events.emit(EventKind::ToolFailed {
                    workflow_id,
                    tool: call.name.clone(),
                    call_id: call.id.clone(),
                    error: error.to_string(),
                });
            }
        }

        Ok(requested)
    }

    /// Apply tool effects to the context; returns whether a checkpoint was requested
    fn apply_effects(&self, ctx: &mut ExecutionContext, source: &str, output: &ToolOutput) -> bool {
        let mut requested = false;
        for effect in &output.effects {
            match effect {
                ContextEffect::SetVariable { key, value, reasoning } => {
                    self.set_variable(ctx, key, value.clone(), source, reasoning.clone());
                }
                ContextEffect::Insight { text } => ctx.record_insight(text.clone()),
                ContextEffect::CheckpointRequested => requested = true,
            }
        }
        requested
    }

    fn set_variable(
        &self,
        ctx: &mut ExecutionContext,
        key: &str,
        value: Value,
        source: &str,
        reasoning: Option<String>,
    ) {
        ctx.set_variable(key, value, source, reasoning);
        self.events.emit(EventKind::VariableChanged {
            workflow_id: ctx.workflow_id.as_str().into(),
            key: key.to_string(),
            source: source.to_string(),
        });
    }

    /// One engine turn with retries; `None` when cancelled
    async fn call_engine(
        &self,
        doc: &WorkflowDocument,
        ctx: &ExecutionContext,
        capabilities: &CapabilitySet,
        deadline: Instant,
    ) -> Result<Option<ChatResponse>> {
        let request = ChatRequest {
            model: self.model_for(doc),
            messages: ctx.to_messages(),
            tools: capabilities.definitions(),
            settings: doc.config.clone(),
        };
        let policy = &doc.extension.retry;
        let attempts = policy.max_attempts.max(1);
        let turn = ctx.turns + 1;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            self.events.emit(EventKind::ModelCalled {
                workflow_id: ctx.workflow_id.as_str().into(),
                turn,
                attempt,
                messages: request.messages.len(),
            });

            let result = tokio::select! {
                biased;
                _ = self.control.token.cancelled() => return Ok(None),
                _ = tokio::time::sleep_until(deadline) => return Err(self.timeout_error(ctx)),
                result = self.provider.chat(request.clone()) => result,
            };

            match result {
                Ok(response) => return Ok(Some(response)),
                Err(error) => {
                    last_error = error.to_string();
                    tracing::warn!(turn, attempt, error = %last_error, "engine call failed");
                    if attempt < attempts {
                        let backoff = Duration::from_millis(
                            policy.backoff_ms.saturating_mul(1u64 << (attempt - 1).min(16)),
                        );
                        tokio::select! {
                            biased;
                            _ = self.control.token.cancelled() => return Ok(None),
                            _ = tokio::time::sleep(backoff) => {}
                        }
                    }
                }
            }
        }

        Err(LumenError::Orchestration {
            workflow: ctx.workflow_id.clone(),
            reason: format!("engine call failed after {} attempt(s): {}", attempts, last_error),
        })
    }

    fn model_for(&self, doc: &WorkflowDocument) -> String {
        if !doc.model.is_empty() {
            return doc.model.clone();
        }
        self.settings
            .model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string())
    }

    fn timeout_error(&self, ctx: &ExecutionContext) -> LumenError {
        LumenError::RunTimeout {
            workflow: ctx.workflow_id.clone(),
            timeout_secs: self.settings.run_timeout.as_secs(),
        }
    }

    // ───────────────────────────────────────────────────────────────────────
    // Checkpoints
    // ───────────────────────────────────────────────────────────────────────

    async fn checkpoint(&self, doc: &WorkflowDocument, ctx: &ExecutionContext) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };

        let state = ResumeState::from_context(ctx);
        let receipt = store.save(&state, doc.extension.checkpoint.backup).await?;
        self.events.emit(EventKind::CheckpointSaved {
            workflow_id: ctx.workflow_id.as_str().into(),
            step: ctx.step,
            path: receipt.path.display().to_string(),
            backup: receipt.backup.as_ref().map(|p| p.display().to_string()),
        });
        tracing::info!(step = ctx.step, path = %receipt.path.display(), "checkpoint saved");
        Ok(())
    }

    async fn final_checkpoint(&self, doc: &WorkflowDocument, ctx: &ExecutionContext) {
        if let Err(error) = self.checkpoint(doc, ctx).await {
            tracing::warn!(workflow_id = %ctx.workflow_id, error = %error, "final checkpoint failed");
        }
    }

    async fn archive(&self, ctx: &ExecutionContext) {
        let Some(store) = &self.store else {
            return;
        };
        match store.complete(&ctx.workflow_id, self.settings.on_complete).await {
            Ok(path) => {
                if path.is_some() || self.settings.on_complete == OnComplete::Delete {
                    self.events.emit(EventKind::CheckpointArchived {
                        workflow_id: ctx.workflow_id.as_str().into(),
                        path: path.map(|p| p.display().to_string()),
                    });
                }
            }
            Err(error) => {
                tracing::warn!(workflow_id = %ctx.workflow_id, error = %error, "could not archive checkpoint");
            }
        }
    }
}

fn prelude_invocations(doc: &WorkflowDocument) -> impl Iterator<Item = &SubWorkflowInvocation> {
    doc.invocations
        .iter()
        .filter(|inv| inv.when == InvocationTiming::Start)
}
