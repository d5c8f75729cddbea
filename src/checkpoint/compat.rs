//! Drift detection between a checkpoint and the current document
//!
//! Equal content hashes are fully compatible. Otherwise each difference
//! costs score; some differences also block the resume outright.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::ast::WorkflowDocument;
use crate::error::LumenError;
use crate::tools::BUILTIN_TOOLS;

use super::state::ResumeState;

const REMOVED_PARAMETER: f64 = 0.35;
const REMOVED_CALLED_TOOL: f64 = 0.35;
const RENAMED: f64 = 0.35;
const MODEL_CHANGED: f64 = 0.1;
const REMOVED_UNUSED_TOOL: f64 = 0.05;
const NEW_REQUIRED_PARAMETER: f64 = 0.1;
const BODY_CHANGED: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompatibilityReport {
    pub can_resume: bool,
    pub requires_adaptation: bool,
    /// 1.0 is identical, clamped to [0, 1]
    pub score: f64,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
}

impl CompatibilityReport {
    fn identical() -> Self {
        Self {
            can_resume: true,
            requires_adaptation: false,
            score: 1.0,
            warnings: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    /// Refuse an incompatible resume unless forced
    pub fn into_result(self, workflow: &str, force: bool) -> Result<Self, LumenError> {
        if self.can_resume || force {
            Ok(self)
        } else {
            Err(LumenError::CompatibilityMismatch {
                workflow: workflow.to_string(),
                score: self.score,
                warnings: self.warnings,
                suggestions: self.suggestions,
            })
        }
    }
}

/// Tool names the document makes available to the engine
pub fn document_tools(doc: &WorkflowDocument) -> BTreeSet<String> {
    doc.tools
        .iter()
        .cloned()
        .chain(BUILTIN_TOOLS.iter().map(|t| t.to_string()))
        .chain(doc.invocations.iter().map(|inv| inv.name.clone()))
        .collect()
}

fn penalize(
    report: &mut CompatibilityReport,
    cost: f64,
    blocking: bool,
    warning: String,
    suggestion: String,
) {
    report.score -= cost;
    report.can_resume &= !blocking;
    report.warnings.push(warning);
    report.suggestions.push(suggestion);
}

pub fn validate_compatibility(state: &ResumeState, doc: &WorkflowDocument) -> CompatibilityReport {
    if state.content_hash == doc.content_hash {
        return CompatibilityReport::identical();
    }

    let mut report = CompatibilityReport {
        can_resume: true,
        requires_adaptation: false,
        score: 1.0,
        warnings: Vec::new(),
        suggestions: Vec::new(),
    };

    if state.workflow_name != doc.name {
        penalize(
            &mut report,
            RENAMED,
            true,
            format!("workflow renamed from '{}' to '{}'", state.workflow_name, doc.name),
            format!("restore the name '{}' or start a new run", state.workflow_name),
        );
    }

    let declared = doc.declared_parameters();
    for name in state.parameters.keys() {
        if !declared.contains(name.as_str()) {
            penalize(
                &mut report,
                REMOVED_PARAMETER,
                true,
                format!("parameter '{}' used by the run was removed", name),
                format!("re-declare '{}' under input.schema", name),
            );
        }
    }

    let available = document_tools(doc);
    let called = state.called_tools();
    for tool in &called {
        if !available.contains(*tool) {
            penalize(
                &mut report,
                REMOVED_CALLED_TOOL,
                true,
                format!("tool '{}' was called but is no longer declared", tool),
                format!("add '{}' back to the tools list", tool),
            );
        }
    }

    for tool in &state.available_tools {
        if !called.contains(&tool.as_str()) && !available.contains(tool) {
            penalize(
                &mut report,
                REMOVED_UNUSED_TOOL,
                false,
                format!("tool '{}' is no longer available", tool),
                format!("the resumed run cannot call '{}'", tool),
            );
        }
    }

    for name in doc.required_parameters() {
        if !state.parameters.contains_key(name) && !state.evolution.variables.contains_key(name) {
            penalize(
                &mut report,
                NEW_REQUIRED_PARAMETER,
                false,
                format!("new required parameter '{}' has no value", name),
                format!("give '{}' a default", name),
            );
        }
    }

    if state.model != doc.model {
        penalize(
            &mut report,
            MODEL_CHANGED,
            false,
            format!("model changed from '{}' to '{}'", state.model, doc.model),
            "earlier turns were produced by a different model".to_string(),
        );
    }

    if state.body_hash != doc.body_hash {
        penalize(
            &mut report,
            BODY_CHANGED,
            false,
            "workflow body changed since the checkpoint".to_string(),
            "the resumed run keeps the original prompt; restart to use the new one".to_string(),
        );
    }

    report.score = report.score.clamp(0.0, 1.0);
    report.requires_adaptation = !report.warnings.is_empty();
    report
}
