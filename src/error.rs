// The #[error] attribute from thiserror uses struct fields via string interpolation,
// but Rust's unused_assignments lint doesn't recognize this.
#![allow(unused_assignments)]

//! Lumen Error Types with Error Codes
//!
//! Error code ranges:
//! - LUMEN-000-009: Document parse errors
//! - LUMEN-010-019: Validation errors
//! - LUMEN-020-029: Template/parameter errors
//! - LUMEN-030-039: Provider errors
//! - LUMEN-040-049: Orchestration errors
//! - LUMEN-050-059: Checkpoint errors
//! - LUMEN-060-069: Configuration / IO errors
//!
//! Tool failures are deliberately *not* part of this enum: they are
//! [`ToolError`](crate::tools::ToolError)s and are surfaced to the model
//! instead of aborting the run.

use miette::Diagnostic;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LumenError>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

fn format_location(line: &Option<usize>, column: &Option<usize>) -> String {
    match (line, column) {
        (Some(l), Some(c)) => format!(":{}:{}", l, c),
        (Some(l), None) => format!(":{}", l),
        _ => String::new(),
    }
}

fn join_list(items: &[String], sep: &str) -> String {
    items.join(sep)
}

/// All error variants are part of the public API.
///
/// Implements both `thiserror::Error` for std error compatibility
/// and `miette::Diagnostic` for fancy terminal error display.
#[derive(Error, Debug, Diagnostic)]
pub enum LumenError {
    // ═══════════════════════════════════════════
    // PARSE ERRORS (000-009)
    // ═══════════════════════════════════════════
    #[error("[LUMEN-001] Failed to parse {file}{}: {details}", format_location(.line, .column))]
    #[diagnostic(
        code(lumen::parse_error),
        help("Check the YAML header between the two '---' lines and the template tags in the body")
    )]
    ParseError {
        file: String,
        line: Option<usize>,
        column: Option<usize>,
        details: String,
    },

    #[error("[LUMEN-002] Workflow file not found: {path}")]
    #[diagnostic(code(lumen::workflow_not_found), help("Check the file path exists"))]
    WorkflowNotFound { path: String },

    // ═══════════════════════════════════════════
    // VALIDATION ERRORS (010-019)
    // ═══════════════════════════════════════════
    #[error("[LUMEN-010] Workflow '{workflow}' failed validation: {}", join_list(.errors, "; "))]
    #[diagnostic(
        code(lumen::validation_failed),
        help("Run `lumen validate <file>` to see every error and warning")
    )]
    ValidationFailed {
        workflow: String,
        errors: Vec<String>,
    },

    #[error("[LUMEN-011] Cycle detected in sub-workflow dependencies: {cycle}")]
    #[diagnostic(code(lumen::cycle_detected))]
    CycleDetected { cycle: String },

    #[error("[LUMEN-012] Sub-workflow '{name}' depends on unknown sibling '{dependency}'")]
    #[diagnostic(code(lumen::missing_dependency))]
    MissingDependency { name: String, dependency: String },

    // ═══════════════════════════════════════════
    // TEMPLATE / PARAMETER ERRORS (020-029)
    // ═══════════════════════════════════════════
    #[error("[LUMEN-020] Workflow '{workflow}' references unresolved variable(s): {}", join_list(.names, ", "))]
    #[diagnostic(
        code(lumen::missing_variables),
        help("Pass the values as inputs or add defaults under input.schema")
    )]
    MissingVariables { workflow: String, names: Vec<String> },

    #[error("[LUMEN-021] Template error: {reason}")]
    #[diagnostic(code(lumen::template_error))]
    TemplateError { reason: String },

    #[error("[LUMEN-022] Invalid value for parameter '{name}': {reason}")]
    #[diagnostic(code(lumen::invalid_parameter))]
    InvalidParameter { name: String, reason: String },

    // ═══════════════════════════════════════════
    // PROVIDER ERRORS (030-039)
    // ═══════════════════════════════════════════
    #[error("[LUMEN-030] Provider '{provider}' not configured")]
    #[diagnostic(code(lumen::provider_not_configured))]
    ProviderNotConfigured { provider: String },

    #[error("[LUMEN-031] Missing API key for provider '{provider}'")]
    #[diagnostic(code(lumen::missing_api_key))]
    MissingApiKey { provider: String },

    // ═══════════════════════════════════════════
    // ORCHESTRATION ERRORS (040-049)
    // ═══════════════════════════════════════════
    #[error("[LUMEN-040] Workflow '{workflow}' failed: {reason}")]
    #[diagnostic(code(lumen::orchestration_failed))]
    Orchestration { workflow: String, reason: String },

    #[error("[LUMEN-041] Recursive sub-workflow invocation: {chain}")]
    #[diagnostic(
        code(lumen::recursive_invocation),
        help("A workflow cannot invoke itself, directly or through other workflows")
    )]
    RecursiveInvocation { chain: String },

    #[error("[LUMEN-042] Workflow '{workflow}' exceeded its run timeout of {timeout_secs}s")]
    #[diagnostic(code(lumen::run_timeout))]
    RunTimeout { workflow: String, timeout_secs: u64 },

    // ═══════════════════════════════════════════
    // CHECKPOINT ERRORS (050-059)
    // ═══════════════════════════════════════════
    #[error("[LUMEN-050] Checkpoint for '{workflow}' at {path} is corrupted: {reason}")]
    #[diagnostic(
        code(lumen::checkpoint_corrupted),
        help("The file was left untouched for inspection; use --force to start over")
    )]
    CheckpointCorrupted {
        workflow: String,
        path: String,
        reason: String,
    },

    #[error("[LUMEN-051] No checkpoint found for workflow '{workflow}'")]
    #[diagnostic(code(lumen::checkpoint_not_found))]
    CheckpointNotFound { workflow: String },

    #[error(
        "[LUMEN-052] Checkpoint for '{workflow}' is incompatible with the current document (score {score:.2}): {}",
        join_list(.warnings, "; ")
    )]
    #[diagnostic(
        code(lumen::compatibility_mismatch),
        help("Apply the suggested adaptations or resume with --force at your own risk")
    )]
    CompatibilityMismatch {
        workflow: String,
        score: f64,
        warnings: Vec<String>,
        suggestions: Vec<String>,
    },

    #[error("[LUMEN-053] Invalid workflow id '{id}': {reason}")]
    #[diagnostic(code(lumen::invalid_workflow_id))]
    InvalidWorkflowId { id: String, reason: String },

    // ═══════════════════════════════════════════
    // CONFIG / IO ERRORS (060-069)
    // ═══════════════════════════════════════════
    #[error("[LUMEN-060] Configuration error: {reason}")]
    #[diagnostic(code(lumen::config_error))]
    ConfigError { reason: String },

    #[error("[LUMEN-061] IO error: {0}")]
    #[diagnostic(code(lumen::io_error))]
    Io(#[from] std::io::Error),

    #[error("[LUMEN-062] JSON error: {0}")]
    #[diagnostic(code(lumen::json_error))]
    Json(#[from] serde_json::Error),
}

impl LumenError {
    /// Error code (e.g. `LUMEN-020`) for machine-readable reporting
    pub fn code(&self) -> &'static str {
        match self {
            Self::ParseError { .. } => "LUMEN-001",
            Self::WorkflowNotFound { .. } => "LUMEN-002",
            Self::ValidationFailed { .. } => "LUMEN-010",
            Self::CycleDetected { .. } => "LUMEN-011",
            Self::MissingDependency { .. } => "LUMEN-012",
            Self::MissingVariables { .. } => "LUMEN-020",
            Self::TemplateError { .. } => "LUMEN-021",
            Self::InvalidParameter { .. } => "LUMEN-022",
            Self::ProviderNotConfigured { .. } => "LUMEN-030",
            Self::MissingApiKey { .. } => "LUMEN-031",
            Self::Orchestration { .. } => "LUMEN-040",
            Self::RecursiveInvocation { .. } => "LUMEN-041",
            Self::RunTimeout { .. } => "LUMEN-042",
            Self::CheckpointCorrupted { .. } => "LUMEN-050",
            Self::CheckpointNotFound { .. } => "LUMEN-051",
            Self::CompatibilityMismatch { .. } => "LUMEN-052",
            Self::InvalidWorkflowId { .. } => "LUMEN-053",
            Self::ConfigError { .. } => "LUMEN-060",
            Self::Io(_) => "LUMEN-061",
            Self::Json(_) => "LUMEN-062",
        }
    }

    /// Attach the workflow id to errors raised before it was known
    pub fn with_workflow(self, id: &str) -> Self {
        match self {
            Self::MissingVariables { workflow, names } if workflow.is_empty() => {
                Self::MissingVariables {
                    workflow: id.to_string(),
                    names,
                }
            }
            other => other,
        }
    }
}

impl FixSuggestion for LumenError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            LumenError::ParseError { .. } => {
                Some("Check YAML syntax (indentation, quoting) and that every {{#if}}/{{#each}} is closed")
            }
            LumenError::WorkflowNotFound { .. } => Some("Check the file path and its extension"),
            LumenError::ValidationFailed { .. } => Some("Fix the listed errors; warnings do not block execution"),
            LumenError::CycleDetected { .. } => Some("Remove one of the depends_on edges forming the cycle"),
            LumenError::MissingDependency { .. } => {
                Some("depends_on must name another sub-workflow declared in the same document")
            }
            LumenError::MissingVariables { .. } => {
                Some("Provide the variables with --input name=value or declare defaults")
            }
            LumenError::TemplateError { .. } => Some("{{#each}} only iterates arrays and objects"),
            LumenError::InvalidParameter { .. } => Some("Check the parameter's type, enum and pattern"),
            LumenError::ProviderNotConfigured { .. } => Some("Available providers: claude, mock"),
            LumenError::MissingApiKey { .. } => Some("Set ANTHROPIC_API_KEY or add it to ~/.config/lumen/config.toml"),
            LumenError::Orchestration { .. } => {
                Some("Inspect the checkpoint with `lumen checkpoints show <id>` and resume once fixed")
            }
            LumenError::RecursiveInvocation { .. } => Some("Break the invocation loop between workflows"),
            LumenError::RunTimeout { .. } => Some("Raise runtime.run_timeout_secs or resume from the checkpoint"),
            LumenError::CheckpointCorrupted { .. } => Some("Inspect or delete the checkpoint file"),
            LumenError::CheckpointNotFound { .. } => Some("List checkpoints with `lumen checkpoints list`"),
            LumenError::CompatibilityMismatch { .. } => Some("Restore the removed parameters/tools or pass --force"),
            LumenError::InvalidWorkflowId { .. } => Some("Use letters, digits, '.', '-' and '_' only"),
            LumenError::ConfigError { .. } => Some("Check ~/.config/lumen/config.toml syntax"),
            LumenError::Io(_) => Some("Check file path and permissions"),
            LumenError::Json(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_includes_location() {
        let err = LumenError::ParseError {
            file: "flow.lumen.md".to_string(),
            line: Some(3),
            column: Some(7),
            details: "bad indentation".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("flow.lumen.md:3:7"), "{msg}");
        assert_eq!(err.code(), "LUMEN-001");
    }

    #[test]
    fn missing_variables_lists_every_name() {
        let err = LumenError::MissingVariables {
            workflow: "review".to_string(),
            names: vec!["repo".to_string(), "ticket".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("review"));
        assert!(msg.contains("repo, ticket"));
    }

    #[test]
    fn with_workflow_fills_empty_id_only() {
        let err = LumenError::MissingVariables {
            workflow: String::new(),
            names: vec!["x".to_string()],
        }
        .with_workflow("wf-1");
        assert!(err.to_string().contains("wf-1"));

        let err = LumenError::MissingVariables {
            workflow: "kept".to_string(),
            names: vec!["x".to_string()],
        }
        .with_workflow("wf-1");
        assert!(err.to_string().contains("kept"));
    }

    #[test]
    fn every_variant_has_a_code() {
        let err = LumenError::CheckpointNotFound {
            workflow: "a".to_string(),
        };
        assert!(err.code().starts_with("LUMEN-"));
        assert!(err.fix_suggestion().is_some());
    }
}
