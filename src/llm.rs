//! Chat-completion plumbing.
//!
//! Agents never talk HTTP directly: they go through a [`ChatClient`] held by
//! the [`Ctx`](crate::Ctx). [`OllamaClient`] speaks Ollama's native
//! `/api/chat` endpoint; [`ScriptedClient`] replays canned replies for tests
//! and offline demos.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::agent::StepError;
use crate::tools::ToolSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One message on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Set on `Role::Tool` messages: which tool produced the content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// An assistant message that requests a single tool call.
    pub fn tool_call(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            tool_calls: vec![ToolCall::new(name, arguments)],
            tool_name: None,
        }
    }

    pub fn tool_result(tool: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_name: Some(tool.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            function: FunctionCall {
                name: name.into(),
                arguments,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    /// Arguments as a JSON object. Some models send the object encoded as a
    /// string; that form is decoded here.
    pub fn arguments(&self) -> Value {
        match &self.function.arguments {
            Value::String(raw) => serde_json::from_str(raw).unwrap_or(Value::Null),
            other => other.clone(),
        }
    }
}

/// Everything one completion call needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatRequest {
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("chat transport error: {0}")]
    Transport(String),
    #[error("could not decode chat response: {0}")]
    Decode(String),
    #[error("no chat client configured")]
    NotConfigured,
    #[error("scripted client has no replies left")]
    Exhausted,
}

impl From<ureq::Error> for LlmError {
    fn from(e: ureq::Error) -> Self {
        LlmError::Transport(e.to_string())
    }
}

impl From<LlmError> for StepError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Transport(_) => StepError::Transient(e.to_string()),
            LlmError::NotConfigured => StepError::Invalid(e.to_string()),
            _ => StepError::Other(e.to_string()),
        }
    }
}

/// Something that turns a chat request into one assistant message.
pub trait ChatClient: Send + Sync {
    fn complete(&self, request: &ChatRequest) -> Result<ChatMessage, LlmError>;
}

impl<C: ChatClient + ?Sized> ChatClient for Arc<C> {
    fn complete(&self, request: &ChatRequest) -> Result<ChatMessage, LlmError> {
        (**self).complete(request)
    }
}

impl<C: ChatClient + ?Sized> ChatClient for Box<C> {
    fn complete(&self, request: &ChatRequest) -> Result<ChatMessage, LlmError> {
        (**self).complete(request)
    }
}

// ---------------------------------------------------------------------------
// Ollama
// ---------------------------------------------------------------------------

pub struct OllamaClient {
    agent: ureq::Agent,
    base_url: String,
    model: String,
    temperature: Option<f64>,
}

impl std::fmt::Debug for OllamaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: ChatMessage,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_timeout(base_url, model, Duration::from_secs(120))
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();

        Self {
            agent: config.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            temperature: None,
        }
    }

    pub fn temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn body(&self, request: &ChatRequest) -> Value {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system {
            messages.push(ChatMessage::system(system.clone()));
        }
        messages.extend(request.messages.iter().cloned());

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
        });

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request.tools.iter().map(ToolSpec::to_function).collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(t) = self.temperature {
            body["options"] = serde_json::json!({ "temperature": t });
        }
        body
    }
}

impl ChatClient for OllamaClient {
    fn complete(&self, request: &ChatRequest) -> Result<ChatMessage, LlmError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = self.body(request);

        debug!(
            model = %self.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "sending chat request"
        );

        let response: OllamaResponse = self
            .agent
            .post(&url)
            .send_json(&body)?
            .body_mut()
            .read_json()
            .map_err(|e| LlmError::Decode(e.to_string()))?;

        debug!(
            prompt_tokens = response.prompt_eval_count.unwrap_or(0),
            completion_tokens = response.eval_count.unwrap_or(0),
            tool_calls = response.message.tool_calls.len(),
            "chat response received"
        );

        Ok(response.message)
    }
}

// ---------------------------------------------------------------------------
// Scripted replies
// ---------------------------------------------------------------------------

/// Replays a fixed queue of assistant messages and records every request.
#[derive(Debug, Default)]
pub struct ScriptedClient {
    replies: Mutex<VecDeque<ChatMessage>>,
    seen: Mutex<Vec<ChatRequest>>,
}

impl ScriptedClient {
    pub fn new(replies: impl IntoIterator<Item = ChatMessage>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().map(|r| r.len()).unwrap_or(0)
    }
}

impl ChatClient for ScriptedClient {
    fn complete(&self, request: &ChatRequest) -> Result<ChatMessage, LlmError> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(request.clone());
        }
        self.replies
            .lock()
            .ok()
            .and_then(|mut r| r.pop_front())
            .ok_or(LlmError::Exhausted)
    }
}

// ---------------------------------------------------------------------------
// Request builder used through Ctx::llm()
// ---------------------------------------------------------------------------

/// Fluent one-shot request: `ctx.llm().system(..).user(..).send()?`.
pub struct LlmRequest<'a> {
    client: Option<&'a dyn ChatClient>,
    request: ChatRequest,
}

impl<'a> LlmRequest<'a> {
    pub(crate) fn new(client: Option<&'a dyn ChatClient>) -> Self {
        Self {
            client,
            request: ChatRequest::default(),
        }
    }

    pub fn system(mut self, prompt: impl Into<String>) -> Self {
        self.request.system = Some(prompt.into());
        self
    }

    pub fn user(mut self, content: impl Into<String>) -> Self {
        self.request.messages.push(ChatMessage::user(content));
        self
    }

    pub fn message(mut self, message: ChatMessage) -> Self {
        self.request.messages.push(message);
        self
    }

    pub fn messages(mut self, messages: impl IntoIterator<Item = ChatMessage>) -> Self {
        self.request.messages.extend(messages);
        self
    }

    pub fn tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.request.tools = tools;
        self
    }

    /// Send and return the whole assistant message, tool calls included.
    pub fn send_message(self) -> Result<ChatMessage, StepError> {
        let client = self.client.ok_or(LlmError::NotConfigured)?;
        Ok(client.complete(&self.request)?)
    }

    /// Send and return only the text content.
    pub fn send(self) -> Result<String, StepError> {
        Ok(self.send_message()?.content)
    }
}
