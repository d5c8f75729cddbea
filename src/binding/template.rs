//! Template engine for workflow bodies
//!
//! Syntax:
//! - `{{name}}` / `{{result.field}}` / `{{items.0.name}}` - substitution
//! - `{{#if x}}…{{else}}…{{/if}}` and `{{#unless x}}…{{/unless}}` - truthiness
//! - `{{#each xs}}…{{/each}}` with `{{this}}`, `{{this.field}}`, `{{@index}}`
//! - `{{#each xs as x}}…{{x.field}}…{{/each}}` - named loop item
//!
//! Templates are parsed once (at document load) into a small node tree and
//! rendered single-pass. Rendering never mutates the variable set and reports
//! every unresolved reference in one error.

use std::collections::BTreeSet;
use std::fmt;

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::error::LumenError;
use crate::util::jsonpath::{self, Segment};

/// Reserved root names that never refer to workflow variables
const THIS: &str = "this";
const INDEX: &str = "@index";

/// Syntax error with 1-based position inside the template text
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}:{}", self.message, self.line, self.column)
    }
}

/// A `{{path}}` reference
#[derive(Debug, Clone, PartialEq)]
pub struct VarRef {
    /// Path as written (`result.items.0`)
    pub path: String,
    root: String,
    rest: Vec<Segment>,
}

impl VarRef {
    fn parse(path: &str) -> Result<Self, String> {
        if path == INDEX {
            return Ok(Self {
                path: path.to_string(),
                root: INDEX.to_string(),
                rest: Vec::new(),
            });
        }

        let valid = path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '[' | ']' | '$'));
        if path.is_empty() || !valid {
            return Err(format!("invalid variable reference '{}'", path));
        }

        let mut segments = jsonpath::parse(path).map_err(|e| e.to_string())?;
        if segments.is_empty() {
            return Err(format!("invalid variable reference '{}'", path));
        }
        let root = match segments.remove(0) {
            Segment::Field(name) => name,
            Segment::Index(_) => {
                return Err(format!("variable reference '{}' must start with a name", path))
            }
        };

        Ok(Self {
            path: path.to_string(),
            root,
            rest: segments,
        })
    }

    /// First path segment (the variable name)
    pub fn root(&self) -> &str {
        &self.root
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Var(VarRef),
    If {
        cond: VarRef,
        negate: bool,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
    Each {
        source: VarRef,
        alias: Option<String>,
        body: Vec<Node>,
    },
}

/// A parsed template
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Template {
    nodes: Vec<Node>,
}

/// Block under construction while parsing
struct OpenBlock {
    kind: BlockKind,
    line: usize,
    column: usize,
    then: Vec<Node>,
    otherwise: Option<Vec<Node>>,
}

enum BlockKind {
    If { cond: VarRef, negate: bool },
    Each { source: VarRef, alias: Option<String> },
}

impl BlockKind {
    fn tag(&self) -> &'static str {
        match self {
            BlockKind::If { negate: false, .. } => "if",
            BlockKind::If { negate: true, .. } => "unless",
            BlockKind::Each { .. } => "each",
        }
    }
}

/// 1-based (line, column) of a byte offset
fn position(text: &str, offset: usize) -> (usize, usize) {
    let before = &text[..offset];
    let line = before.matches('\n').count() + 1;
    let column = match before.rfind('\n') {
        Some(nl) => before[nl + 1..].chars().count() + 1,
        None => before.chars().count() + 1,
    };
    (line, column)
}

impl Template {
    /// Parse template text into a node tree
    pub fn parse(text: &str) -> Result<Self, SyntaxError> {
        let mut stack: Vec<OpenBlock> = Vec::new();
        let mut root: Vec<Node> = Vec::new();
        let mut cursor = 0;

        fn current<'a>(stack: &'a mut [OpenBlock], root: &'a mut Vec<Node>) -> &'a mut Vec<Node> {
            match stack.last_mut() {
                Some(block) => block.otherwise.as_mut().unwrap_or(&mut block.then),
                None => root,
            }
        }

        while let Some(rel) = text[cursor..].find("{{") {
            let open = cursor + rel;
            if open > cursor {
                current(&mut stack, &mut root).push(Node::Text(text[cursor..open].to_string()));
            }
            let (line, column) = position(text, open);
            let err = |message: String| SyntaxError {
                line,
                column,
                message,
            };

            let close = text[open + 2..]
                .find("}}")
                .map(|i| open + 2 + i)
                .ok_or_else(|| err("unclosed '{{' tag".to_string()))?;
            let tag = text[open + 2..close].trim();
            cursor = close + 2;

            if let Some(rest) = tag.strip_prefix('#') {
                let (keyword, arg) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                let arg = arg.trim();
                let kind = match keyword {
                    "if" | "unless" => BlockKind::If {
                        cond: VarRef::parse(arg).map_err(&err)?,
                        negate: keyword == "unless",
                    },
                    "each" => {
                        let (source, alias) = match arg.split_once(" as ") {
                            Some((source, alias)) => (source.trim(), Some(alias.trim())),
                            None => (arg, None),
                        };
                        if let Some(alias) = alias {
                            if alias.is_empty()
                                || !alias.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                            {
                                return Err(err(format!("invalid loop alias '{}'", alias)));
                            }
                        }
                        BlockKind::Each {
                            source: VarRef::parse(source).map_err(&err)?,
                            alias: alias.map(str::to_string),
                        }
                    }
                    other => return Err(err(format!("unknown block '#{}'", other))),
                };
                stack.push(OpenBlock {
                    kind,
                    line,
                    column,
                    then: Vec::new(),
                    otherwise: None,
                });
            } else if let Some(name) = tag.strip_prefix('/') {
                let block = stack
                    .pop()
                    .ok_or_else(|| err(format!("'{{{{/{}}}}}' without an open block", name)))?;
                if block.kind.tag() != name.trim() {
                    return Err(err(format!(
                        "'{{{{/{}}}}}' closes '{{{{#{}}}}}' opened at {}:{}",
                        name.trim(),
                        block.kind.tag(),
                        block.line,
                        block.column
                    )));
                }
                let node = match block.kind {
                    BlockKind::If { cond, negate } => Node::If {
                        cond,
                        negate,
                        then: block.then,
                        otherwise: block.otherwise.unwrap_or_default(),
                    },
                    BlockKind::Each { source, alias } => Node::Each {
                        source,
                        alias,
                        body: block.then,
                    },
                };
                current(&mut stack, &mut root).push(node);
            } else if tag == "else" {
                let block = stack
                    .last_mut()
                    .filter(|b| matches!(b.kind, BlockKind::If { .. }) && b.otherwise.is_none());
                match block {
                    Some(block) => block.otherwise = Some(Vec::new()),
                    None => return Err(err("'{{else}}' outside an if/unless block".to_string())),
                }
            } else {
                let var = VarRef::parse(tag).map_err(&err)?;
                current(&mut stack, &mut root).push(Node::Var(var));
            }
        }

        if cursor < text.len() {
            current(&mut stack, &mut root).push(Node::Text(text[cursor..].to_string()));
        }

        if let Some(block) = stack.pop() {
            return Err(SyntaxError {
                line: block.line,
                column: block.column,
                message: format!("unclosed '{{{{#{}}}}}' block", block.kind.tag()),
            });
        }

        Ok(Self { nodes: root })
    }

    /// True when the template has no tags at all
    pub fn is_static(&self) -> bool {
        self.nodes.iter().all(|n| matches!(n, Node::Text(_)))
    }

    /// Root variable names referenced anywhere, loop-locals excluded
    pub fn free_variables(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        collect_free(&self.nodes, &mut Vec::new(), true, &mut out);
        out
    }

    /// Render against a variable set
    ///
    /// Missing substitutions are collected and reported together as
    /// `MissingVariables`; a missing variable in a condition is falsy.
    pub fn render(&self, vars: &FxHashMap<String, Value>) -> Result<String, LumenError> {
        let mut renderer = Renderer {
            vars,
            frames: Vec::new(),
            missing: Vec::new(),
        };
        let mut out = String::new();
        renderer.render_nodes(&self.nodes, &mut out)?;

        if renderer.missing.is_empty() {
            Ok(out)
        } else {
            Err(LumenError::MissingVariables {
                workflow: String::new(),
                names: renderer.missing,
            })
        }
    }
}

/// Static check: root names used by substitutions or loops that are not in `known`
///
/// Conservative: references inside both branches of a conditional count, but
/// condition variables themselves never do.
pub fn missing_variables<F>(template: &Template, known: F) -> Vec<String>
where
    F: Fn(&str) -> bool,
{
    let mut refs = BTreeSet::new();
    collect_free(&template.nodes, &mut Vec::new(), false, &mut refs);
    refs.into_iter().filter(|name| !known(name)).collect()
}

/// Parse and render in one step (sub-workflow parameter bindings)
pub fn render_str(text: &str, vars: &FxHashMap<String, Value>) -> Result<String, LumenError> {
    let template = Template::parse(text).map_err(|e| LumenError::TemplateError {
        reason: e.to_string(),
    })?;
    template.render(vars)
}

fn collect_free(
    nodes: &[Node],
    locals: &mut Vec<String>,
    include_conditions: bool,
    out: &mut BTreeSet<String>,
) {
    fn add(var: &VarRef, locals: &[String], out: &mut BTreeSet<String>) {
        let root = var.root();
        let local = root == INDEX
            || (root == THIS && !locals.is_empty())
            || locals.iter().any(|l| l == root);
        if !local {
            out.insert(root.to_string());
        }
    }

    for node in nodes {
        match node {
            Node::Text(_) => {}
            Node::Var(var) => add(var, locals, out),
            Node::If {
                cond,
                then,
                otherwise,
                ..
            } => {
                if include_conditions {
                    add(cond, locals, out);
                }
                collect_free(then, locals, include_conditions, out);
                collect_free(otherwise, locals, include_conditions, out);
            }
            Node::Each {
                source,
                alias,
                body,
            } => {
                add(source, locals, out);
                // `this` is always bound inside a loop; the alias too when given
                locals.push(alias.clone().unwrap_or_else(|| THIS.to_string()));
                collect_free(body, locals, include_conditions, out);
                locals.pop();
            }
        }
    }
}

struct LoopFrame {
    item: Value,
    alias: Option<String>,
    index: usize,
}

struct Renderer<'a> {
    vars: &'a FxHashMap<String, Value>,
    frames: Vec<LoopFrame>,
    missing: Vec<String>,
}

impl Renderer<'_> {
    fn lookup(&self, var: &VarRef) -> Option<Value> {
        let root = var.root();

        if root == INDEX {
            return self.frames.last().map(|f| Value::from(f.index));
        }

        let base = self
            .frames
            .iter()
            .rev()
            .find(|f| f.alias.as_deref() == Some(root))
            .or_else(|| (root == THIS).then(|| self.frames.last()).flatten())
            .map(|f| &f.item)
            .or_else(|| self.vars.get(root))?;

        jsonpath::lookup(base, &var.rest).cloned()
    }

    fn note_missing(&mut self, var: &VarRef) {
        if !self.missing.iter().any(|m| m == &var.path) {
            self.missing.push(var.path.clone());
        }
    }

    fn render_nodes(&mut self, nodes: &[Node], out: &mut String) -> Result<(), LumenError> {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Var(var) => match self.lookup(var) {
                    Some(value) => out.push_str(&value_to_string(&value)),
                    None => self.note_missing(var),
                },
                Node::If {
                    cond,
                    negate,
                    then,
                    otherwise,
                } => {
                    let truthy = self.lookup(cond).is_some_and(|v| is_truthy(&v));
                    if truthy != *negate {
                        self.render_nodes(then, out)?;
                    } else {
                        self.render_nodes(otherwise, out)?;
                    }
                }
                Node::Each {
                    source,
                    alias,
                    body,
                } => {
                    let items = match self.lookup(source) {
                        None => {
                            self.note_missing(source);
                            continue;
                        }
                        Some(Value::Null) => Vec::new(),
                        Some(Value::Array(items)) => items,
                        Some(Value::Object(map)) => map.into_iter().map(|(_, v)| v).collect(),
                        Some(other) => {
                            return Err(LumenError::TemplateError {
                                reason: format!(
                                    "'{{{{#each {}}}}}' expects an array or object, got {}",
                                    source.path,
                                    type_name(&other)
                                ),
                            })
                        }
                    };

                    for (index, item) in items.into_iter().enumerate() {
                        self.frames.push(LoopFrame {
                            item,
                            alias: alias.clone(),
                            index,
                        });
                        let result = self.render_nodes(body, out);
                        self.frames.pop();
                        result?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Truthiness used by `if`/`unless`
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Convert a JSON value to its prompt text
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
