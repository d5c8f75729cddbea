//! Dotted-path access into JSON values
//!
//! Supports:
//! - `a.b.c` (dot notation)
//! - `a.items.0.name` (numeric segment indexes arrays)
//! - `a.items[0].name` (bracket index)
//! - `$.a.b` (optional `$` root prefix)
//!
//! Does NOT support filters, wildcards or slices.

use serde_json::Value;

use crate::error::LumenError;

/// A parsed path segment
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Object field access: .field
    Field(String),
    /// Array index access: [0] or .0
    Index(usize),
}

/// Parse a dotted path into segments
///
/// Examples:
/// - "price.currency" → [Field("price"), Field("currency")]
/// - "items[0].name" → [Field("items"), Index(0), Field("name")]
pub fn parse(path: &str) -> Result<Vec<Segment>, LumenError> {
    let path = if let Some(stripped) = path.strip_prefix("$.") {
        stripped
    } else if path == "$" {
        return Ok(vec![]);
    } else {
        path
    };

    if path.is_empty() {
        return Ok(vec![]);
    }

    let invalid = || LumenError::TemplateError {
        reason: format!("invalid path '{}'", path),
    };

    let mut segments = Vec::new();

    for part in path.split('.') {
        if part.is_empty() {
            return Err(invalid());
        }

        if let Some(bracket_pos) = part.find('[') {
            let field = &part[..bracket_pos];
            if !field.is_empty() {
                segments.push(Segment::Field(field.to_string()));
            }

            if !part.ends_with(']') {
                return Err(invalid());
            }

            let index_str = &part[bracket_pos + 1..part.len() - 1];
            let index: usize = index_str.parse().map_err(|_| invalid())?;
            segments.push(Segment::Index(index));
        } else if let Ok(index) = part.parse::<usize>() {
            segments.push(Segment::Index(index));
        } else {
            segments.push(Segment::Field(part.to_string()));
        }
    }

    Ok(segments)
}

/// Walk segments by reference; no clone until the caller needs one
pub fn lookup<'a>(value: &'a Value, segments: &[Segment]) -> Option<&'a Value> {
    let mut current = value;

    for segment in segments {
        current = match segment {
            Segment::Field(name) => current.get(name)?,
            Segment::Index(idx) => current.get(*idx)?,
        };
    }

    Some(current)
}

/// Parse and apply a path in one step
pub fn resolve(value: &Value, path: &str) -> Result<Option<Value>, LumenError> {
    let segments = parse(path)?;
    Ok(lookup(value, &segments).cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_simple_path() {
        let segments = parse("a.b.c").unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::Field("a".to_string()),
                Segment::Field("b".to_string()),
                Segment::Field("c".to_string()),
            ]
        );
    }

    #[test]
    fn parse_with_dollar_prefix() {
        assert_eq!(parse("$.a").unwrap(), vec![Segment::Field("a".to_string())]);
        assert!(parse("$").unwrap().is_empty());
    }

    #[test]
    fn parse_bracket_and_dot_index_agree() {
        assert_eq!(parse("items[0].name").unwrap(), parse("items.0.name").unwrap());
    }

    #[test]
    fn parse_rejects_empty_segment() {
        assert!(parse("a..b").is_err());
        assert!(parse("a[x]").is_err());
    }

    #[test]
    fn lookup_nested_array() {
        let value = json!({"users": [{"name": "Alice"}, {"name": "Bob"}]});
        let segments = parse("users.1.name").unwrap();
        assert_eq!(lookup(&value, &segments), Some(&json!("Bob")));
    }

    #[test]
    fn resolve_missing_field_is_none() {
        let value = json!({"a": 1});
        assert_eq!(resolve(&value, "b").unwrap(), None);
    }
}
