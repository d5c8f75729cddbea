//! Scripted provider for tests and dry runs
//!
//! Replies are served from a FIFO queue. Routes let concurrently running
//! sub-workflows draw from their own queue: a route matches when the first
//! user message contains its needle. Every request is recorded.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::{
    ChatRequest, ChatResponse, ContentBlock, MessageContent, MessageRole, Provider, StopReason,
    ToolCall, Usage,
};

#[derive(Debug, Clone)]
enum MockReply {
    Response(ChatResponse),
    Error(String),
}

#[derive(Default)]
pub struct MockProvider {
    queue: Mutex<VecDeque<MockReply>>,
    routes: Mutex<Vec<(String, VecDeque<MockReply>)>>,
    requests: Mutex<Vec<ChatRequest>>,
    delay: Option<Duration>,
    next_id: AtomicUsize,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep before every reply (timeouts and cancellation)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a final text answer
    pub fn then_text(self, text: impl Into<String>) -> Self {
        self.queue.lock().push_back(MockReply::Response(text_response(text.into())));
        self
    }

    /// Queue a turn requesting tool calls, `(name, arguments)` each
    pub fn then_tool_calls<S: Into<String>>(self, calls: Vec<(S, Value)>) -> Self {
        let response = self.tool_response(calls);
        self.queue.lock().push_back(MockReply::Response(response));
        self
    }

    /// Queue an engine failure
    pub fn then_error(self, message: impl Into<String>) -> Self {
        self.queue.lock().push_back(MockReply::Error(message.into()));
        self
    }

    /// Queue a final text answer on the route matching `needle`
    pub fn route_text(self, needle: impl Into<String>, text: impl Into<String>) -> Self {
        self.push_route(needle.into(), MockReply::Response(text_response(text.into())));
        self
    }

    /// Queue a tool-call turn on the route matching `needle`
    pub fn route_tool_calls<S: Into<String>>(
        self,
        needle: impl Into<String>,
        calls: Vec<(S, Value)>,
    ) -> Self {
        let response = self.tool_response(calls);
        self.push_route(needle.into(), MockReply::Response(response));
        self
    }

    fn push_route(&self, needle: String, reply: MockReply) {
        let mut routes = self.routes.lock();
        match routes.iter_mut().find(|(n, _)| *n == needle) {
            Some((_, queue)) => queue.push_back(reply),
            None => routes.push((needle, VecDeque::from([reply]))),
        }
    }

    fn tool_response<S: Into<String>>(&self, calls: Vec<(S, Value)>) -> ChatResponse {
        let tool_calls: Vec<ToolCall> = calls
            .into_iter()
            .map(|(name, arguments)| ToolCall {
                id: format!("call_{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1),
                name: name.into(),
                arguments,
            })
            .collect();
        let blocks = tool_calls
            .iter()
            .map(|c| ContentBlock::ToolUse {
                id: c.id.clone(),
                name: c.name.clone(),
                input: c.arguments.clone(),
            })
            .collect();
        ChatResponse {
            content: MessageContent::Blocks(blocks),
            tool_calls,
            stop_reason: StopReason::ToolUse,
            usage: Usage::new(10, 10),
        }
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    fn next_reply(&self, request: &ChatRequest) -> Option<MockReply> {
        let first_user = request
            .messages
            .iter()
            .find(|m| m.role == MessageRole::User)
            .and_then(|m| m.content.as_text())
            .unwrap_or_default();

        let mut routes = self.routes.lock();
        if let Some((_, queue)) = routes.iter_mut().find(|(n, _)| first_user.contains(n.as_str())) {
            return queue.pop_front();
        }
        drop(routes);

        self.queue.lock().pop_front()
    }
}

fn text_response(text: String) -> ChatResponse {
    ChatResponse {
        content: MessageContent::Text(text),
        tool_calls: vec![],
        stop_reason: StopReason::EndTurn,
        usage: Usage::new(10, 10),
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let reply = self.next_reply(&request);
        self.requests.lock().push(request);

        match reply {
            Some(MockReply::Response(response)) => Ok(response),
            Some(MockReply::Error(message)) => anyhow::bail!(message),
            // Script exhausted: finish politely
            None => Ok(text_response("Mock response".to_string())),
        }
    }

    fn default_model(&self) -> &str {
        "mock-v1"
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::GenerationConfig;
    use crate::provider::Message;
    use serde_json::json;

    fn request(prompt: &str) -> ChatRequest {
        ChatRequest {
            model: "mock-v1".to_string(),
            messages: vec![Message::user(prompt)],
            tools: vec![],
            settings: GenerationConfig::default(),
        }
    }

    #[tokio::test]
    async fn serves_queue_in_order_then_default() {
        let mock = MockProvider::new()
            .then_tool_calls(vec![("search", json!({"q": "x"}))])
            .then_text("done");

        let first = mock.chat(request("p")).await.unwrap();
        assert_eq!(first.tool_calls[0].id, "call_1");
        assert_eq!(first.stop_reason, StopReason::ToolUse);

        let second = mock.chat(request("p")).await.unwrap();
        assert_eq!(second.text(), Some("done".to_string()));

        let third = mock.chat(request("p")).await.unwrap();
        assert_eq!(third.text(), Some("Mock response".to_string()));
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn routes_match_first_user_message() {
        let mock = MockProvider::new()
            .then_text("main")
            .route_text("child task", "from child");

        let child = mock.chat(request("run the child task now")).await.unwrap();
        assert_eq!(child.text(), Some("from child".to_string()));
        let main = mock.chat(request("parent")).await.unwrap();
        assert_eq!(main.text(), Some("main".to_string()));
    }

    #[tokio::test]
    async fn scripted_error() {
        let mock = MockProvider::new().then_error("engine down");
        let err = mock.chat(request("p")).await.unwrap_err();
        assert!(err.to_string().contains("engine down"));
    }
}
