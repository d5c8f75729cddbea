//! Parameter schema entries (`input.schema`)
//!
//! Accepts both the full form and the `name: string` shorthand:
//!
//! ```yaml
//! input:
//!   schema:
//!     repo: string
//!     mode: { type: string, enum: [quick, deep], default: quick }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declared parameter type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    #[serde(alias = "int")]
    Integer,
    #[serde(alias = "float")]
    Number,
    #[serde(alias = "bool")]
    Boolean,
    Array,
    Object,
    #[default]
    Any,
}

impl ParamType {
    /// Does `value` already have this type?
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
            ParamType::Any => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
            ParamType::Any => "any",
        }
    }
}

/// One `input.schema` entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "ParameterSpecRaw")]
pub struct ParameterSpec {
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "enum", skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Schema-level default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ParameterSpecRaw {
    Short(ParamType),
    Full(ParameterSpecFull),
}

#[derive(Deserialize)]
struct ParameterSpecFull {
    #[serde(rename = "type", default)]
    param_type: ParamType,
    #[serde(default)]
    description: Option<String>,
    #[serde(rename = "enum", default)]
    enum_values: Vec<Value>,
    #[serde(default)]
    pattern: Option<String>,
    #[serde(default)]
    default: Option<Value>,
}

impl From<ParameterSpecRaw> for ParameterSpec {
    fn from(raw: ParameterSpecRaw) -> Self {
        match raw {
            ParameterSpecRaw::Short(param_type) => Self {
                param_type,
                ..Self::default()
            },
            ParameterSpecRaw::Full(full) => Self {
                param_type: full.param_type,
                description: full.description,
                enum_values: full.enum_values,
                pattern: full.pattern,
                default: full.default,
            },
        }
    }
}

impl ParameterSpec {
    /// JSON schema fragment used when the workflow is exposed as a tool
    pub fn to_json_schema(&self) -> Value {
        let mut schema = serde_json::Map::new();
        if self.param_type != ParamType::Any {
            schema.insert("type".into(), Value::from(self.param_type.as_str()));
        }
        if let Some(description) = &self.description {
            schema.insert("description".into(), Value::from(description.clone()));
        }
        if !self.enum_values.is_empty() {
            schema.insert("enum".into(), Value::Array(self.enum_values.clone()));
        }
        if let Some(pattern) = &self.pattern {
            schema.insert("pattern".into(), Value::from(pattern.clone()));
        }
        Value::Object(schema)
    }
}
