//! Parameter resolution
//!
//! Precedence, highest first: caller value → schema default → workflow
//! default → unresolved. Unresolved parameters are not an error here; the
//! body render fails later if it actually needs one.

use std::fmt;

use regex::Regex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ast::{ParamType, ParameterSpec, WorkflowDocument};
use crate::error::{LumenError, Result};

use super::template::value_to_string;

/// Where a parameter's value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamSource {
    Caller,
    SchemaDefault,
    WorkflowDefault,
}

impl fmt::Display for ParamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ParamSource::Caller => "caller",
            ParamSource::SchemaDefault => "schema default",
            ParamSource::WorkflowDefault => "workflow default",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedParameter {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ParamSource>,
    /// Has an `input.schema` entry
    #[serde(default)]
    pub declared: bool,
}

/// Result of resolving a document's parameters against caller input
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub parameters: Vec<ResolvedParameter>,
    pub warnings: Vec<String>,
}

impl Resolution {
    /// Resolved values as an initial variable set
    pub fn variables(&self) -> FxHashMap<String, Value> {
        self.parameters
            .iter()
            .filter_map(|p| p.value.clone().map(|v| (p.name.clone(), v)))
            .collect()
    }
}

/// Effective default for `name`, ignoring caller input
pub fn effective_default(doc: &WorkflowDocument, name: &str) -> Option<(Value, ParamSource)> {
    let schema = doc.input.schema.get(name).and_then(|s| s.default.clone());
    let workflow = doc.input.default.get(name).cloned();
    match (schema, workflow) {
        (Some(v), _) => Some((v, ParamSource::SchemaDefault)),
        (None, Some(v)) => Some((v, ParamSource::WorkflowDefault)),
        (None, None) => None,
    }
}

/// Conflict / redundancy warnings between the two default sources
pub fn default_warnings(doc: &WorkflowDocument) -> Vec<String> {
    let mut warnings = Vec::new();
    for (name, spec) in &doc.input.schema {
        let (Some(schema), Some(workflow)) = (&spec.default, doc.input.default.get(name)) else {
            continue;
        };
        if schema == workflow {
            warnings.push(format!(
                "parameter '{}': workflow default and schema default are both {}; one is redundant",
                name, schema
            ));
        } else {
            warnings.push(format!(
                "parameter '{}': workflow default {} conflicts with schema default {}; using the schema default",
                name, workflow, schema
            ));
        }
    }
    warnings
}

/// Resolve every declared parameter (plus undeclared caller values)
pub fn resolve_parameters(
    doc: &WorkflowDocument,
    caller: &FxHashMap<String, Value>,
) -> Result<Resolution> {
    let mut parameters = Vec::new();

    for name in doc.declared_parameters() {
        let declared = doc.input.schema.get(name);
        let (value, source) = match caller.get(name) {
            Some(value) => {
                let value = match declared {
                    Some(spec) => {
                        let value = coerce_value(name, spec, value.clone())?;
                        check_constraints(spec, &value).map_err(|reason| {
                            LumenError::InvalidParameter {
                                name: name.to_string(),
                                reason,
                            }
                        })?;
                        value
                    }
                    None => value.clone(),
                };
                (Some(value), Some(ParamSource::Caller))
            }
            None => match effective_default(doc, name) {
                Some((value, source)) => (Some(value), Some(source)),
                None => (None, None),
            },
        };
        parameters.push(ResolvedParameter {
            name: name.to_string(),
            value,
            source,
            declared: declared.is_some(),
        });
    }

    let mut extra: Vec<_> = caller
        .iter()
        .filter(|(name, _)| !parameters.iter().any(|p| &p.name == *name))
        .collect();
    extra.sort_by(|a, b| a.0.cmp(b.0));
    for (name, value) in extra {
        parameters.push(ResolvedParameter {
            name: name.clone(),
            value: Some(value.clone()),
            source: Some(ParamSource::Caller),
            declared: false,
        });
    }

    Ok(Resolution {
        parameters,
        warnings: default_warnings(doc),
    })
}

/// Convert a caller value to the declared type
///
/// Strings are parsed into integers, numbers and booleans; other mismatches
/// are rejected.
pub fn coerce_value(name: &str, spec: &ParameterSpec, value: Value) -> Result<Value> {
    if spec.param_type.accepts(&value) {
        return Ok(value);
    }

    let invalid = |reason: String| LumenError::InvalidParameter {
        name: name.to_string(),
        reason,
    };
    let expected = spec.param_type.as_str();

    match (spec.param_type, &value) {
        (ParamType::String, Value::Number(_) | Value::Bool(_)) => {
            Ok(Value::String(value_to_string(&value)))
        }
        (ParamType::Integer, Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| invalid(format!("expected {}, got '{}'", expected, s))),
        (ParamType::Number, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| invalid(format!("expected {}, got '{}'", expected, s))),
        (ParamType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(Value::Bool(true)),
            "false" | "no" | "0" => Ok(Value::Bool(false)),
            _ => Err(invalid(format!("expected {}, got '{}'", expected, s))),
        },
        (ParamType::Array | ParamType::Object, Value::String(s)) => {
            serde_json::from_str::<Value>(s)
                .ok()
                .filter(|parsed| spec.param_type.accepts(parsed))
                .ok_or_else(|| invalid(format!("expected {} as JSON, got '{}'", expected, s)))
        }
        _ => Err(invalid(format!("expected {}, got {}", expected, value))),
    }
}

/// Check `enum` and `pattern` constraints
pub fn check_constraints(spec: &ParameterSpec, value: &Value) -> std::result::Result<(), String> {
    if !spec.enum_values.is_empty() && !spec.enum_values.contains(value) {
        let allowed: Vec<String> = spec.enum_values.iter().map(Value::to_string).collect();
        return Err(format!("{} is not one of [{}]", value, allowed.join(", ")));
    }

    if let Some(pattern) = &spec.pattern {
        let re = Regex::new(pattern).map_err(|e| format!("invalid pattern '{}': {}", pattern, e))?;
        let text = value_to_string(value);
        if !re.is_match(&text) {
            return Err(format!("'{}' does not match pattern '{}'", text, pattern));
        }
    }

    Ok(())
}
