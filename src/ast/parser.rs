//! Document parser: front matter, body template, fenced reference blocks

use std::path::Path;

use serde::Deserialize;
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

use crate::binding::Template;
use crate::error::{LumenError, Result};

use super::document::{
    ExtensionBlock, GenerationConfig, InputSpec, OutputSpec, ToolReference, WorkflowDocument,
};
use super::invocation::{stem_name, SubWorkflowInvocation};

const DELIMITER: &str = "---";

/// Raw front matter as written
#[derive(Debug, Default, Deserialize)]
struct HeaderRaw {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    model: String,
    #[serde(default)]
    config: GenerationConfig,
    #[serde(default)]
    tools: Vec<String>,
    #[serde(default)]
    input: InputSpec,
    #[serde(default)]
    output: Option<OutputSpec>,
    #[serde(default)]
    lumen: ExtensionBlock,
    #[serde(flatten)]
    extra: serde_yaml::Mapping,
}

/// `xxh3:` + 16 hex digits
pub fn compute_hash(text: &str) -> String {
    format!("xxh3:{:016x}", xxh3_64(text.as_bytes()))
}

/// Load and parse a workflow file
pub async fn load_document(path: &Path) -> Result<WorkflowDocument> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(LumenError::WorkflowNotFound {
                path: path.display().to_string(),
            })
        }
        Err(e) => return Err(e.into()),
    };
    parse_document(&text, Some(path))
}

/// Parse workflow text; `path` names the file in errors and supplies the default name
pub fn parse_document(text: &str, path: Option<&Path>) -> Result<WorkflowDocument> {
    let file = path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "<inline>".to_string());
    let parse_error = |line: Option<usize>, column: Option<usize>, details: String| {
        LumenError::ParseError {
            file: file.clone(),
            line,
            column,
            details,
        }
    };

    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let is_delimiter = |line: &str| line.trim_end() == DELIMITER;

    // (header text, body text, 1-based line where the body starts)
    let (header, body, body_line) = match lines.first() {
        Some(first) if is_delimiter(*first) => {
            let close = lines
                .iter()
                .skip(1)
                .position(|l| is_delimiter(*l))
                .map(|i| i + 1)
                .ok_or_else(|| {
                    parse_error(Some(1), Some(1), "header opened with '---' is never closed".to_string())
                })?;
            let header: String = lines[1..close].concat();
            let body: String = lines[close + 1..].concat();
            (Some(header), body, close + 2)
        }
        _ => (None, text.to_string(), 1),
    };

    let has_header = header.is_some();
    let raw = match header.as_deref() {
        Some(h) if !h.trim().is_empty() => {
            serde_yaml::from_str::<HeaderRaw>(h).map_err(|e| {
                // Header YAML starts on file line 2
                let location = e.location();
                parse_error(
                    location.as_ref().map(|l| l.line() + 1),
                    location.as_ref().map(|l| l.column()),
                    format!("invalid header: {}", e),
                )
            })?
        }
        _ => HeaderRaw::default(),
    };

    let blocks = extract_blocks(&body, body_line, &parse_error)?;

    let template = Template::parse(&blocks.prompt).map_err(|e| {
        let line = blocks.line_map.get(e.line - 1).copied().unwrap_or(body_line);
        parse_error(Some(line), Some(e.column), e.message)
    })?;
    let parameter_refs = template.free_variables();

    let name = if raw.name.trim().is_empty() && !has_header {
        path.map(|p| stem_name(&p.to_string_lossy())).unwrap_or_default()
    } else {
        raw.name
    };

    let invocations: Vec<SubWorkflowInvocation> = raw
        .lumen
        .workflows
        .iter()
        .cloned()
        .chain(blocks.invocations)
        .map(SubWorkflowInvocation::normalize)
        .collect();

    debug!(
        workflow = %name,
        has_header,
        invocations = invocations.len(),
        tool_refs = blocks.tool_refs.len(),
        "parsed workflow document"
    );

    Ok(WorkflowDocument {
        name,
        description: raw.description,
        model: raw.model,
        config: raw.config,
        tools: raw.tools,
        input: raw.input,
        output: raw.output,
        extension: raw.lumen,
        extra: raw.extra,
        has_header,
        body_hash: compute_hash(&body),
        body: blocks.prompt,
        template,
        parameter_refs,
        invocations,
        tool_refs: blocks.tool_refs,
        content_hash: compute_hash(text),
        source_path: path.map(Path::to_path_buf),
    })
}

struct BodyBlocks {
    /// Body with `workflow` blocks removed
    prompt: String,
    /// prompt line index → file line
    line_map: Vec<usize>,
    invocations: Vec<SubWorkflowInvocation>,
    tool_refs: Vec<ToolReference>,
}

#[derive(Deserialize)]
struct ToolBlock {
    name: String,
    #[serde(default)]
    params: serde_json::Value,
}

fn extract_blocks<F>(body: &str, first_line: usize, parse_error: &F) -> Result<BodyBlocks>
where
    F: Fn(Option<usize>, Option<usize>, String) -> LumenError,
{
    let mut out = BodyBlocks {
        prompt: String::with_capacity(body.len()),
        line_map: Vec::new(),
        invocations: Vec::new(),
        tool_refs: Vec::new(),
    };

    let lines: Vec<&str> = body.split_inclusive('\n').collect();
    let mut i = 0;

    while i < lines.len() {
        let file_line = first_line + i;
        let info = lines[i].trim().strip_prefix("```").map(str::trim);

        let kind = match info {
            Some("workflow") => Some(true),
            Some("tool") => Some(false),
            _ => None,
        };

        let Some(is_workflow) = kind else {
            out.prompt.push_str(lines[i]);
            out.line_map.push(file_line);
            i += 1;
            continue;
        };

        let close = lines[i + 1..]
            .iter()
            .position(|l| l.trim() == "```")
            .map(|p| i + 1 + p)
            .ok_or_else(|| {
                parse_error(Some(file_line), Some(1), "fenced block is never closed".to_string())
            })?;
        let content: String = lines[i + 1..close].concat();
        let yaml_error = |e: serde_yaml::Error| {
            let location = e.location();
            parse_error(
                Some(location.as_ref().map_or(file_line, |l| file_line + l.line())),
                location.as_ref().map(|l| l.column()),
                format!("invalid {} block: {}", if is_workflow { "workflow" } else { "tool" }, e),
            )
        };

        if is_workflow {
            let inv: SubWorkflowInvocation = serde_yaml::from_str(&content).map_err(yaml_error)?;
            out.invocations.push(inv);
        } else {
            let block: ToolBlock = serde_yaml::from_str(&content).map_err(yaml_error)?;
            out.tool_refs.push(ToolReference {
                name: block.name,
                params: block.params,
                line: file_line,
            });
            for (offset, line) in lines[i..=close].iter().enumerate() {
                out.prompt.push_str(line);
                out.line_map.push(file_line + offset);
            }
        }
        i = close + 1;
    }

    Ok(out)
}
