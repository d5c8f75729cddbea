//! Validation issues and the report returned by the validator

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::binding::ParamSource;
use crate::error::LumenError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationIssue {
    #[error("header is present but 'name' is empty")]
    MissingName,

    #[error("header is present but 'model' is empty")]
    MissingModel,

    #[error("sub-workflow '{name}' has an empty path")]
    EmptyInvocationPath { name: String },

    #[error("sub-workflow '{name}' is declared more than once")]
    DuplicateInvocation { name: String },

    #[error("sub-workflow '{name}' depends on unknown sibling '{dependency}'")]
    UnknownDependency { name: String, dependency: String },

    #[error("sub-workflow dependency cycle: {cycle}")]
    DependencyCycle { cycle: String },

    #[error("parameter '{parameter}' has an invalid pattern: {reason}")]
    InvalidPattern { parameter: String, reason: String },

    #[error("undefined parameter '{name}' is referenced in the body")]
    UndefinedParameter { name: String },

    #[error("unknown tool '{name}'")]
    UnknownTool { name: String },

    #[error("parameter '{name}': workflow default {workflow} conflicts with schema default {schema}; the schema default wins")]
    DefaultConflict {
        name: String,
        schema: Value,
        workflow: Value,
    },

    #[error("parameter '{name}': workflow default and schema default are identical")]
    RedundantDefault { name: String },

    #[error("parameter '{name}': default value {reason}")]
    DefaultViolatesConstraint { name: String, reason: String },

    #[error("tool block at line {line} calls '{name}', which is not declared in 'tools'")]
    UndeclaredToolBlock { name: String, line: usize },
}

impl ValidationIssue {
    pub fn severity(&self) -> Severity {
        match self {
            Self::MissingName
            | Self::MissingModel
            | Self::EmptyInvocationPath { .. }
            | Self::DuplicateInvocation { .. }
            | Self::UnknownDependency { .. }
            | Self::DependencyCycle { .. }
            | Self::InvalidPattern { .. } => Severity::Error,
            Self::UndefinedParameter { .. }
            | Self::UnknownTool { .. }
            | Self::DefaultConflict { .. }
            | Self::RedundantDefault { .. }
            | Self::DefaultViolatesConstraint { .. }
            | Self::UndeclaredToolBlock { .. } => Severity::Warning,
        }
    }

    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::MissingName => Some("Add 'name: <workflow-name>' to the header".to_string()),
            Self::MissingModel => Some("Add 'model: <model-id>' to the header".to_string()),
            Self::UndefinedParameter { name } => {
                Some(format!("Declare it under input.schema: '{}: string'", name))
            }
            Self::UnknownTool { .. } => {
                Some("Register the tool or add it to known_tools in the config".to_string())
            }
            Self::RedundantDefault { .. } => Some("Remove one of the two defaults".to_string()),
            Self::DependencyCycle { .. } => Some("Remove one depends_on edge".to_string()),
            _ => None,
        }
    }
}

/// Effective default of one parameter (after precedence)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectiveDefault {
    pub name: String,
    pub value: Value,
    pub source: ParamSource,
}

/// Outcome of validating one document
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub workflow: String,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub defaults: Vec<EffectiveDefault>,
}

impl ValidationReport {
    pub fn new(workflow: impl Into<String>) -> Self {
        Self {
            workflow: workflow.into(),
            ..Self::default()
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn add(&mut self, issue: ValidationIssue) {
        match issue.severity() {
            Severity::Error => self.errors.push(issue),
            Severity::Warning => self.warnings.push(issue),
        }
    }

    pub fn default_for(&self, name: &str) -> Option<&EffectiveDefault> {
        self.defaults.iter().find(|d| d.name == name)
    }

    /// `Ok(self)` when valid, otherwise `ValidationFailed` listing every error
    pub fn into_result(self) -> Result<Self, LumenError> {
        if self.is_valid() {
            Ok(self)
        } else {
            Err(LumenError::ValidationFailed {
                workflow: self.workflow.clone(),
                errors: self.errors.iter().map(ToString::to_string).collect(),
            })
        }
    }
}
