//! Document validator
//!
//! Errors are reserved for documents that cannot run (or would run with
//! undefined behavior); everything else is a warning.

use regex::Regex;
use rustc_hash::FxHashSet;

use crate::ast::{InvocationTiming, WorkflowDocument};
use crate::binding::{check_constraints, effective_default};
use crate::dag::DependencyGraph;
use crate::error::LumenError;
use crate::tools::BUILTIN_TOOLS;

use super::result::{EffectiveDefault, ValidationIssue, ValidationReport};

#[derive(Debug, Clone, Default)]
pub struct Validator {
    known_tools: FxHashSet<String>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extend the set of tool names considered known
    pub fn with_known_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_tools.extend(tools.into_iter().map(Into::into));
        self
    }

    fn is_known_tool(&self, doc: &WorkflowDocument, name: &str) -> bool {
        BUILTIN_TOOLS.contains(&name)
            || self.known_tools.contains(name)
            || doc.invocations.iter().any(|inv| inv.name == name)
    }

    pub fn validate(&self, doc: &WorkflowDocument) -> ValidationReport {
        let mut report = ValidationReport::new(doc.name.clone());

        // (a) header completeness
        if doc.has_header {
            if doc.name.trim().is_empty() {
                report.add(ValidationIssue::MissingName);
            }
            if doc.model.trim().is_empty() {
                report.add(ValidationIssue::MissingModel);
            }
        }

        // (b) body references
        for name in &doc.parameter_refs {
            let declared = doc.input.schema.contains_key(name)
                || doc.input.default.contains_key(name)
                || doc
                    .invocations
                    .iter()
                    .any(|inv| &inv.name == name && inv.when == InvocationTiming::Start);
            if !declared {
                report.add(ValidationIssue::UndefinedParameter { name: name.clone() });
            }
        }

        // (c) tools
        for tool in &doc.tools {
            if !self.is_known_tool(doc, tool) {
                report.add(ValidationIssue::UnknownTool { name: tool.clone() });
            }
        }
        for tool_ref in &doc.tool_refs {
            let declared = doc.tools.contains(&tool_ref.name)
                || self.is_known_tool(doc, &tool_ref.name);
            if !declared {
                report.add(ValidationIssue::UndeclaredToolBlock {
                    name: tool_ref.name.clone(),
                    line: tool_ref.line,
                });
            }
        }

        // (d) sub-workflow declarations
        self.check_invocations(doc, &mut report);

        // (e) defaults and constraints
        self.check_parameters(doc, &mut report);

        report
    }

    /// Validate and turn errors into `ValidationFailed`
    pub fn check(&self, doc: &WorkflowDocument) -> Result<ValidationReport, LumenError> {
        self.validate(doc).into_result()
    }

    fn check_invocations(&self, doc: &WorkflowDocument, report: &mut ValidationReport) {
        let mut seen: FxHashSet<&str> = FxHashSet::default();
        for inv in &doc.invocations {
            if inv.path.trim().is_empty() {
                report.add(ValidationIssue::EmptyInvocationPath {
                    name: inv.name.clone(),
                });
            }
            if !seen.insert(inv.name.as_str()) {
                report.add(ValidationIssue::DuplicateInvocation {
                    name: inv.name.clone(),
                });
            }
        }

        let graph = DependencyGraph::from_invocations(&doc.invocations);
        for err in graph.missing_dependencies() {
            if let LumenError::MissingDependency { name, dependency } = err {
                report.add(ValidationIssue::UnknownDependency { name, dependency });
            }
        }
        if let Err(LumenError::CycleDetected { cycle }) = graph.detect_cycles() {
            report.add(ValidationIssue::DependencyCycle { cycle });
        }
    }

    fn check_parameters(&self, doc: &WorkflowDocument, report: &mut ValidationReport) {
        for (name, spec) in &doc.input.schema {
            if let Some(pattern) = &spec.pattern {
                if let Err(e) = Regex::new(pattern) {
                    report.add(ValidationIssue::InvalidPattern {
                        parameter: name.clone(),
                        reason: e.to_string(),
                    });
                }
            }

            match (&spec.default, doc.input.default.get(name)) {
                (Some(schema), Some(workflow)) if schema == workflow => {
                    report.add(ValidationIssue::RedundantDefault { name: name.clone() });
                }
                (Some(schema), Some(workflow)) => {
                    report.add(ValidationIssue::DefaultConflict {
                        name: name.clone(),
                        schema: schema.clone(),
                        workflow: workflow.clone(),
                    });
                }
                _ => {}
            }
        }

        for name in doc.declared_parameters() {
            let Some((value, source)) = effective_default(doc, name) else {
                continue;
            };
            if let Some(spec) = doc.input.schema.get(name) {
                // Invalid patterns were already reported as errors
                let pattern_ok = spec.pattern.as_deref().is_none_or(|p| Regex::new(p).is_ok());
                if pattern_ok {
                    if let Err(reason) = check_constraints(spec, &value) {
                        report.add(ValidationIssue::DefaultViolatesConstraint {
                            name: name.to_string(),
                            reason,
                        });
                    }
                }
            }
            report.defaults.push(EffectiveDefault {
                name: name.to_string(),
                value,
                source,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parse_document;
    use crate::binding::ParamSource;
    use serde_json::json;

    fn validate(text: &str) -> ValidationReport {
        let doc = parse_document(text, None).unwrap();
        Validator::new().with_known_tools(["read_file"]).validate(&doc)
    }

    #[test]
    fn headerless_is_valid() {
        let report = validate("Plain instructions.\n");
        assert!(report.is_valid());
        assert!(!report.has_warnings());
    }

    #[test]
    fn header_requires_name_and_model() {
        let report = validate("---\ndescription: x\n---\nbody\n");
        assert_eq!(
            report.errors,
            vec![ValidationIssue::MissingName, ValidationIssue::MissingModel]
        );
    }

    #[test]
    fn only_start_invocations_bind_body_names() {
        let header = "---\nname: a\nmodel: m\nlumen:\n  workflows:\n    - { name: prep, path: ./prep.lumen.md }\n    - { name: ask, path: ./ask.lumen.md, when: on_demand }\n---\n";
        let report = validate(&format!("{}Use {{{{prep.output}}}} and {{{{ask.output}}}}\n", header));
        assert!(report.is_valid());
        assert_eq!(
            report.warnings,
            vec![ValidationIssue::UndefinedParameter {
                name: "ask".to_string()
            }]
        );
    }

    #[test]
    fn undefined_parameter_is_a_warning() {
        let report = validate("---\nname: a\nmodel: m\n---\nUse {{ticket}}\n");
        assert!(report.is_valid());
        assert_eq!(
            report.warnings,
            vec![ValidationIssue::UndefinedParameter {
                name: "ticket".to_string()
            }]
        );
    }

    #[test]
    fn unknown_tool_is_a_warning() {
        let report = validate("---\nname: a\nmodel: m\ntools: [read_file, set_variable, rm_rf]\n---\nx\n");
        assert!(report.is_valid());
        assert_eq!(
            report.warnings,
            vec![ValidationIssue::UnknownTool {
                name: "rm_rf".to_string()
            }]
        );
    }

    #[test]
    fn empty_invocation_path_is_an_error() {
        let report = validate("---\nname: a\nmodel: m\nlumen:\n  workflows:\n    - name: child\n---\nx\n");
        assert_eq!(
            report.errors,
            vec![ValidationIssue::EmptyInvocationPath {
                name: "child".to_string()
            }]
        );
    }

    #[test]
    fn mutual_dependency_fails_validation() {
        let text = "---\nname: a\nmodel: m\nlumen:\n  workflows:\n    - { name: x, path: ./x.lumen.md, depends_on: [y] }\n    - { name: y, path: ./y.lumen.md, depends_on: [x] }\n---\nbody\n";
        let report = validate(text);
        assert!(!report.is_valid());
        assert!(matches!(
            report.errors[0],
            ValidationIssue::DependencyCycle { .. }
        ));
    }

    #[test]
    fn conflict_and_effective_default() {
        let text = "---\nname: a\nmodel: m\ninput:\n  schema:\n    x: { type: string, default: b }\n  default:\n    x: a\n---\n{{x}}\n";
        let report = validate(text);
        assert!(report.is_valid());
        assert!(matches!(
            report.warnings[0],
            ValidationIssue::DefaultConflict { .. }
        ));
        let default = report.default_for("x").unwrap();
        assert_eq!(default.value, json!("b"));
        assert_eq!(default.source, ParamSource::SchemaDefault);
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        let report = validate("---\nname: a\nmodel: m\ninput:\n  schema:\n    t: { type: string, pattern: '([' }\n---\nx\n");
        assert!(matches!(
            report.errors[0],
            ValidationIssue::InvalidPattern { .. }
        ));
    }

    #[test]
    fn default_violating_enum_warns() {
        let report = validate("---\nname: a\nmodel: m\ninput:\n  schema:\n    m: { enum: [a, b], default: c }\n---\nx\n");
        assert!(report.is_valid());
        assert!(matches!(
            report.warnings[0],
            ValidationIssue::DefaultViolatesConstraint { .. }
        ));
    }

    #[test]
    fn sub_workflow_names_count_as_tools_and_variables() {
        let text = "---\nname: a\nmodel: m\ntools: [lint]\nlumen:\n  workflows:\n    - path: ./lint.lumen.md\n---\nLint said {{lint.output}}\n";
        let report = validate(text);
        assert!(report.is_valid());
        assert!(!report.has_warnings(), "{:?}", report.warnings);
    }
}
