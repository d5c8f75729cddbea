//! Claude provider using the Anthropic Messages API

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{
    ChatRequest, ChatResponse, ContentBlock, Message, MessageContent, MessageRole, Provider,
    StopReason, ToolCall, Usage, CLAUDE_DEFAULT_MODEL,
};
use crate::util::{CONNECT_TIMEOUT, INFER_TIMEOUT};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct ClaudeProvider {
    api_key: String,
    client: Client,
}

impl ClaudeProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(INFER_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("lumen/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            api_key: api_key.into(),
            client,
        })
    }

    /// Read the key from `ANTHROPIC_API_KEY`
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").context("ANTHROPIC_API_KEY not set")?;
        Self::new(api_key)
    }

    /// Resolve short aliases to full model ids
    fn resolve_model<'a>(&self, model: &'a str) -> &'a str {
        if model.eq_ignore_ascii_case("sonnet") || model.eq_ignore_ascii_case("claude-sonnet") {
            CLAUDE_DEFAULT_MODEL
        } else if model.eq_ignore_ascii_case("opus") || model.eq_ignore_ascii_case("claude-opus") {
            "claude-opus-4-1"
        } else if model.eq_ignore_ascii_case("haiku") || model.eq_ignore_ascii_case("claude-haiku") {
            "claude-3-5-haiku-latest"
        } else if model.is_empty() {
            CLAUDE_DEFAULT_MODEL
        } else {
            model
        }
    }

    fn build_body(&self, request: &ChatRequest) -> Value {
        let system: Vec<String> = request
            .messages
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .filter_map(|m| m.content.as_text())
            .collect();

        // The API wants strictly alternating roles: fold runs of same-role messages
        let mut api_messages: Vec<Value> = Vec::new();
        for msg in request.messages.iter().filter(|m| m.role != MessageRole::System) {
            let (role, blocks) = message_to_api(msg);
            let same_role = api_messages.last().is_some_and(|last| last["role"] == role);
            let open = if same_role {
                api_messages
                    .last_mut()
                    .and_then(|last| last["content"].as_array_mut())
            } else {
                None
            };
            match open {
                Some(content) => content.extend(blocks),
                None => api_messages.push(json!({ "role": role, "content": blocks })),
            }
        }

        let settings = &request.settings;
        let mut body = json!({
            "model": self.resolve_model(&request.model),
            "max_tokens": settings.max_output_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": api_messages,
        });

        if !system.is_empty() {
            body["system"] = json!(system.join("\n\n"));
        }
        if let Some(temperature) = settings.temperature {
            body["temperature"] = json!(temperature);
        }
        if !settings.stop_sequences.is_empty() {
            body["stop_sequences"] = json!(settings.stop_sequences);
        }
        if !request.tools.is_empty() {
            let api_tools: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.input_schema,
                    })
                })
                .collect();
            body["tools"] = json!(api_tools);
        }

        body
    }
}

#[async_trait]
impl Provider for ClaudeProvider {
    fn default_model(&self) -> &str {
        CLAUDE_DEFAULT_MODEL
    }

    fn name(&self) -> &str {
        "claude"
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let body = self.build_body(&request);

        let response = self
            .client
            .post(API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .context("Failed to send chat request to Claude API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Claude API error {}: {}", status, body);
        }

        let json: Value = response.json().await?;
        parse_response(&json)
    }
}

/// Convert a Message to (API role, content blocks)
fn message_to_api(msg: &Message) -> (&'static str, Vec<Value>) {
    let role = match msg.role {
        MessageRole::Assistant => "assistant",
        // Tool results travel as user messages
        MessageRole::User | MessageRole::Tool | MessageRole::System => "user",
    };

    let blocks = match &msg.content {
        MessageContent::Text(text) if msg.role == MessageRole::Tool => vec![json!({
            "type": "tool_result",
            "tool_use_id": msg.tool_call_id.as_deref().unwrap_or("unknown"),
            "content": text,
        })],
        MessageContent::Text(text) => vec![json!({ "type": "text", "text": text })],
        MessageContent::Blocks(blocks) => blocks
            .iter()
            .map(|b| match b {
                ContentBlock::Text { text } => json!({ "type": "text", "text": text }),
                ContentBlock::ToolUse { id, name, input } => json!({
                    "type": "tool_use",
                    "id": id,
                    "name": name,
                    "input": input,
                }),
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => {
                    let mut result = json!({
                        "type": "tool_result",
                        "tool_use_id": tool_use_id,
                        "content": content,
                    });
                    if let Some(true) = is_error {
                        result["is_error"] = json!(true);
                    }
                    result
                }
            })
            .collect(),
    };

    (role, blocks)
}

/// Parse a Messages API response into a ChatResponse
fn parse_response(json: &Value) -> Result<ChatResponse> {
    let content_blocks = json["content"]
        .as_array()
        .context("Missing 'content' array in response")?;

    let mut blocks: Vec<ContentBlock> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for block in content_blocks {
        match block["type"].as_str().unwrap_or("text") {
            "text" => {
                let text = block["text"].as_str().unwrap_or("").to_string();
                blocks.push(ContentBlock::Text { text });
            }
            "tool_use" => {
                let id = block["id"]
                    .as_str()
                    .context("tool_use block without id")?
                    .to_string();
                let name = block["name"]
                    .as_str()
                    .context("tool_use block without name")?
                    .to_string();
                let input = block["input"].clone();

                blocks.push(ContentBlock::ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                });
                tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments: input,
                });
            }
            _ => {}
        }
    }

    let content = match blocks.as_slice() {
        [ContentBlock::Text { text }] => MessageContent::Text(text.clone()),
        _ => MessageContent::Blocks(blocks),
    };

    let stop_reason = match json["stop_reason"].as_str() {
        Some("end_turn") => StopReason::EndTurn,
        Some("tool_use") => StopReason::ToolUse,
        Some("max_tokens") => StopReason::MaxTokens,
        Some("stop_sequence") => StopReason::StopSequence,
        _ => StopReason::Unknown,
    };

    let usage = Usage::new(
        json["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
        json["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
    );

    Ok(ChatResponse {
        content,
        tool_calls,
        stop_reason,
        usage,
    })
}
