//! Sub-workflow composition
//!
//! A child run gets its own context, id `<parent>.<name>` and checkpoint.
//! What it sees from the parent depends on the inheritance mode:
//!
//! - `isolated`: only the invocation params
//! - `inherit`: parent variables overlaid by the params
//! - `merge`: like `inherit`; variables the child changed are written back
//!
//! In every mode the child's `{status, output, variables}` is bound in the
//! parent under the invocation name.

use std::path::{Path, PathBuf};

use futures::future::{BoxFuture, FutureExt};
use rustc_hash::FxHashMap;
use serde_json::{json, Value};

use crate::ast::{load_document, InheritanceMode, SubWorkflowInvocation, WorkflowDocument};
use crate::binding::render_str;
use crate::checkpoint::sanitize_id;
use crate::error::LumenError;
use crate::event::EventKind;
use crate::tools::{ContextEffect, ToolError, ToolOutput};

use super::context::RunStatus;
use super::orchestrator::{Orchestrator, RunOutcome};

pub struct Composer<'a> {
    orchestrator: &'a Orchestrator,
    parent_id: String,
    /// Directory relative invocation paths resolve against
    base_dir: PathBuf,
    /// Path of the invoking document, when it came from a file
    parent_path: Option<PathBuf>,
}

impl<'a> Composer<'a> {
    pub fn new(orchestrator: &'a Orchestrator, parent_id: &str, parent: &WorkflowDocument) -> Self {
        let parent_path = parent.source_path.clone();
        let base_dir = parent
            .source_path
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_default();

        Self {
            orchestrator,
            parent_id: parent_id.to_string(),
            base_dir,
            parent_path,
        }
    }

    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn child_id(&self, inv: &SubWorkflowInvocation) -> String {
        format!("{}.{}", self.parent_id, sanitize_id(&inv.name))
    }

    /// Build the child's caller inputs for `inv`
    ///
    /// String params are rendered against the parent variables; engine
    /// arguments overlay the declared params.
    pub fn bind_inputs(
        &self,
        inv: &SubWorkflowInvocation,
        parent_vars: &FxHashMap<String, Value>,
        args: Value,
    ) -> Result<FxHashMap<String, Value>, LumenError> {
        let mut inputs = match inv.mode {
            InheritanceMode::Isolated => FxHashMap::default(),
            InheritanceMode::Inherit | InheritanceMode::Merge => parent_vars.clone(),
        };

        for (name, value) in &inv.params {
            let value = match value {
                Value::String(text) => Value::String(render_str(text, parent_vars)?),
                other => other.clone(),
            };
            inputs.insert(name.clone(), value);
        }

        match args {
            Value::Object(map) => inputs.extend(map),
            Value::Null => {}
            other => {
                return Err(LumenError::TemplateError {
                    reason: format!("arguments for '{}' must be an object, got {}", inv.name, other),
                })
            }
        }

        Ok(inputs)
    }

    /// Run `inv` as a child workflow
    ///
    /// The outer error (recursion, depth) is fatal to the caller; child
    /// failures come back as a [`ToolError`].
    pub fn invoke<'b>(
        &'b self,
        inv: &'b SubWorkflowInvocation,
        parent_vars: &'b FxHashMap<String, Value>,
        args: Value,
    ) -> BoxFuture<'b, Result<Result<ToolOutput, ToolError>, LumenError>> {
        async move {
            let path = self.resolve_path(&inv.path);
            let canonical = canonical_or_raw(&path).await;

            let mut stack = self.orchestrator.lineage().to_vec();
            if let Some(parent) = &self.parent_path {
                stack.push(canonical_or_raw(parent).await);
            }
            if stack.contains(&canonical) {
                let chain: Vec<String> = stack
                    .iter()
                    .chain(std::iter::once(&canonical))
                    .map(|p| p.display().to_string())
                    .collect();
                return Err(LumenError::RecursiveInvocation {
                    chain: chain.join(" → "),
                });
            }

            let max_depth = self.orchestrator.settings().max_depth;
            if self.orchestrator.depth() + 1 > max_depth {
                return Err(LumenError::Orchestration {
                    workflow: self.parent_id.clone(),
                    reason: format!(
                        "sub-workflow '{}' would exceed the maximum nesting depth of {}",
                        inv.name, max_depth
                    ),
                });
            }

            let failed = |reason: String| ToolError::Failed {
                tool: inv.name.clone(),
                reason,
            };

            let doc = match load_document(&path).await {
                Ok(doc) => doc,
                Err(e) => return Ok(Err(failed(e.to_string()))),
            };
            let inputs = match self.bind_inputs(inv, parent_vars, args) {
                Ok(inputs) => inputs,
                Err(e) => return Ok(Err(failed(e.to_string()))),
            };

            let child_id = self.child_id(inv);
            let events = self.orchestrator.events();
            events.emit(EventKind::SubWorkflowStarted {
                workflow_id: self.parent_id.as_str().into(),
                child_id: child_id.clone(),
                name: inv.name.clone(),
                mode: inv.mode.as_str().to_string(),
            });
            tracing::info!(
                workflow_id = %self.parent_id,
                child_id = %child_id,
                mode = inv.mode.as_str(),
                "sub-workflow started"
            );

            stack.push(canonical);
            let child = self.orchestrator.child(stack);
            let outcome = child.run_or_resume(&child_id, &doc, &inputs).await;

            let status = match &outcome {
                Ok(o) => o.status.as_str(),
                Err(_) => RunStatus::Failed.as_str(),
            };
            events.emit(EventKind::SubWorkflowFinished {
                workflow_id: self.parent_id.as_str().into(),
                child_id: child_id.clone(),
                name: inv.name.clone(),
                status: status.to_string(),
            });

            Ok(match outcome {
                Ok(o) if o.status == RunStatus::Completed => Ok(result_output(inv, &o)),
                Ok(_) => Err(ToolError::Cancelled {
                    tool: inv.name.clone(),
                }),
                Err(e) => Err(failed(e.to_string())),
            })
        }
        .boxed()
    }
}

async fn canonical_or_raw(path: &Path) -> PathBuf {
    tokio::fs::canonicalize(path)
        .await
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Tool output for a completed child, with the bindings it causes
fn result_output(inv: &SubWorkflowInvocation, outcome: &RunOutcome) -> ToolOutput {
    let outputs = outcome.outputs();
    let result = json!({
        "status": outcome.status.as_str(),
        "output": outcome.output_value(),
        "variables": outputs,
    });

    let mut output = ToolOutput::json(result.clone()).with_effect(ContextEffect::SetVariable {
        key: inv.name.clone(),
        value: result,
        reasoning: None,
    });

    if inv.mode == InheritanceMode::Merge {
        for (key, value) in outputs {
            output = output.with_effect(ContextEffect::SetVariable {
                key,
                value,
                reasoning: Some(format!("merged from sub-workflow '{}'", inv.name)),
            });
        }
    }

    output
}
