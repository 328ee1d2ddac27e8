use std::fmt;

use serde_json::Value;

/// Source name used for the task message.
pub const USER: &str = "user";

#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    Task,
    Text,
    /// Tool results joined into one reply when the agent does not reflect.
    ToolSummary,
    Handoff { target: String },
    ToolCall { tool: String, arguments: Value },
    ToolResult { tool: String, is_error: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub source: String,
    pub kind: MessageKind,
    pub content: String,
}

impl Message {
    pub fn task(content: impl Into<String>) -> Self {
        Self {
            source: USER.to_string(),
            kind: MessageKind::Task,
            content: content.into(),
        }
    }

    pub fn text(source: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            kind: MessageKind::Text,
            content: content.into(),
        }
    }

    pub fn tool_summary(source: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            kind: MessageKind::ToolSummary,
            content: content.into(),
        }
    }

    pub fn handoff(source: impl Into<String>, target: impl Into<String>) -> Self {
        let target = target.into();
        Self {
            source: source.into(),
            content: format!("Transferred to {target}, adopting the role of {target} immediately."),
            kind: MessageKind::Handoff { target },
        }
    }

    pub fn tool_call(source: impl Into<String>, tool: impl Into<String>, arguments: Value) -> Self {
        Self {
            source: source.into(),
            content: arguments.to_string(),
            kind: MessageKind::ToolCall {
                tool: tool.into(),
                arguments,
            },
        }
    }

    pub fn tool_result(
        source: impl Into<String>,
        tool: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self {
            source: source.into(),
            content: content.into(),
            kind: MessageKind::ToolResult {
                tool: tool.into(),
                is_error,
            },
        }
    }

    /// Chat messages are what agents say to each other; tool calls and
    /// results are events inside a turn.
    pub fn is_chat(&self) -> bool {
        !matches!(
            self.kind,
            MessageKind::ToolCall { .. } | MessageKind::ToolResult { .. }
        )
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            MessageKind::Task | MessageKind::Text => {
                write!(f, "---------- {} ----------\n{}", self.source, self.content)
            }
            MessageKind::ToolSummary => write!(
                f,
                "---------- {} (tool results) ----------\n{}",
                self.source, self.content
            ),
            MessageKind::Handoff { target } => {
                write!(f, "---------- {} -> {target} ----------\n{}", self.source, self.content)
            }
            MessageKind::ToolCall { tool, .. } => {
                write!(f, "[{}] calls {tool}({})", self.source, self.content)
            }
            MessageKind::ToolResult { tool, is_error } => {
                let label = if *is_error { "failed" } else { "returned" };
                write!(f, "[{}] {tool} {label}:\n{}", self.source, self.content)
            }
        }
    }
}

/// The shared transcript a team passes from step to step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conversation {
    messages: Vec<Message>,
    turns: usize,
    turn_start: usize,
    last_speaker: Option<String>,
}

impl Conversation {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::task(task)],
            ..Self::default()
        }
    }

    /// Open a new turn for `agent`. Messages pushed from here on belong to it.
    pub fn begin_turn(&mut self, agent: &str) {
        self.turns += 1;
        self.turn_start = self.messages.len();
        self.last_speaker = Some(agent.to_string());
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn chat_messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.is_chat())
    }

    pub fn chat_count(&self) -> usize {
        self.chat_messages().count()
    }

    pub fn turns(&self) -> usize {
        self.turns
    }

    /// Messages produced since the last call to [`Conversation::begin_turn`].
    pub fn latest_turn(&self) -> &[Message] {
        &self.messages[self.turn_start..]
    }

    pub fn last_speaker(&self) -> Option<&str> {
        self.last_speaker.as_deref()
    }

    pub fn last_chat(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.is_chat())
    }

    pub fn task(&self) -> &str {
        self.messages
            .iter()
            .find(|m| m.kind == MessageKind::Task)
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }
}

impl fmt::Display for Conversation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, message) in self.messages.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{message}")?;
        }
        Ok(())
    }
}
