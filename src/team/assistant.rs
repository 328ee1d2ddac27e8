use serde_json::json;
use tracing::{debug, info};

use super::conversation::{Conversation, Message, MessageKind};
use crate::llm::ChatMessage;
use crate::tools::{ToolBox, ToolSpec, json_schema};
use crate::{Agent, Ctx, Outcome, StepResult};

const HANDOFF_PREFIX: &str = "transfer_to_";

/// An LLM-backed team member: a system prompt, the tools it may call and the
/// agents it may hand the turn to.
///
/// Each run is one turn. The model sees the chat transcript and may call
/// tools for up to `max_tool_iterations` rounds. Calling a
/// `transfer_to_<name>` tool ends the turn with a handoff.
#[derive(Debug, Clone)]
pub struct AssistantAgent {
    name: String,
    description: String,
    system_prompt: String,
    tools: ToolBox,
    handoffs: Vec<String>,
    reflect_on_tool_use: bool,
    max_tool_iterations: usize,
}

impl AssistantAgent {
    pub fn new(name: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            system_prompt: system_prompt.into(),
            tools: ToolBox::new(),
            handoffs: Vec::new(),
            reflect_on_tool_use: false,
            max_tool_iterations: 1,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn tools(mut self, tools: ToolBox) -> Self {
        self.tools = tools;
        self
    }

    pub fn handoff(mut self, target: impl Into<String>) -> Self {
        self.handoffs.push(target.into());
        self
    }

    pub fn handoffs<I, T>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.handoffs.extend(targets.into_iter().map(Into::into));
        self
    }

    /// Ask the model for a final reply after tools ran, instead of returning
    /// the raw tool results.
    pub fn reflect_on_tool_use(mut self, reflect: bool) -> Self {
        self.reflect_on_tool_use = reflect;
        self
    }

    pub fn max_tool_iterations(mut self, n: usize) -> Self {
        self.max_tool_iterations = n.max(1);
        self
    }

    pub fn about(&self) -> &str {
        &self.description
    }

    pub fn handoff_targets(&self) -> &[String] {
        &self.handoffs
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.names()
    }

    fn handoff_target(&self, tool: &str) -> Option<&str> {
        let target = tool.strip_prefix(HANDOFF_PREFIX)?;
        self.handoffs.iter().map(String::as_str).find(|h| *h == target)
    }

    fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self
            .tools
            .names()
            .into_iter()
            .filter_map(|n| self.tools.get(n))
            .map(|t| t.spec())
            .collect();
        specs.extend(self.handoffs.iter().map(|target| {
            ToolSpec::new(
                format!("{HANDOFF_PREFIX}{target}"),
                format!("Handoff to {target}."),
                json_schema(json!({}), &[]),
            )
        }));
        specs
    }

    /// The transcript as this agent sees it: its own messages as the
    /// assistant, everyone else's as the user, tagged with the speaker.
    fn history(&self, conv: &Conversation) -> Vec<ChatMessage> {
        conv.chat_messages()
            .map(|m| {
                if m.source == self.name {
                    ChatMessage::assistant(m.content.clone())
                } else if m.kind == MessageKind::Task {
                    ChatMessage::user(m.content.clone())
                } else {
                    ChatMessage::user(format!("{}: {}", m.source, m.content))
                }
            })
            .collect()
    }
}

impl Agent<Conversation> for AssistantAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, mut conv: Conversation, ctx: &mut Ctx) -> StepResult<Conversation> {
        conv.begin_turn(&self.name);
        let mut working = self.history(&conv);
        let specs = self.specs();
        let mut results: Vec<String> = Vec::new();

        for round in 1..=self.max_tool_iterations {
            let reply = ctx
                .llm()
                .system(self.system_prompt.clone())
                .messages(working.clone())
                .tools(specs.clone())
                .send_message()?;

            if reply.tool_calls.is_empty() {
                debug!(agent = %self.name, round, "text reply");
                conv.push(Message::text(&self.name, reply.content));
                return Ok((conv, Outcome::Continue));
            }

            working.push(reply.clone());
            let mut handoff: Option<String> = None;
            for call in &reply.tool_calls {
                if let Some(target) = self.handoff_target(call.name()) {
                    handoff.get_or_insert_with(|| target.to_string());
                    continue;
                }
                let args = call.arguments();
                conv.push(Message::tool_call(&self.name, call.name(), args.clone()));
                let (content, is_error) = match self.tools.call(call.name(), &args, ctx) {
                    Ok(out) => (out, false),
                    Err(err) => (format!("Error: {err}"), true),
                };
                conv.push(Message::tool_result(&self.name, call.name(), content.clone(), is_error));
                working.push(ChatMessage::tool_result(call.name(), content.clone()));
                results.push(content);
            }

            if let Some(target) = handoff {
                info!(from = %self.name, to = %target, "handoff");
                conv.push(Message::handoff(&self.name, &target));
                return Ok((conv, Outcome::Next(target)));
            }
        }

        if self.reflect_on_tool_use {
            let reply = ctx
                .llm()
                .system(self.system_prompt.clone())
                .messages(working)
                .send()?;
            conv.push(Message::text(&self.name, reply));
        } else {
            conv.push(Message::tool_summary(&self.name, results.join("\n")));
        }
        Ok((conv, Outcome::Continue))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Role, ScriptedClient, ToolCall};
    use crate::tools::{Tool, ToolError, str_arg};
    use serde_json::Value;
    use std::sync::Arc;

    struct Upper;

    impl Tool for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn description(&self) -> &str {
            "Upper-case the text"
        }

        fn input_schema(&self) -> Value {
            json_schema(json!({"text": {"type": "string"}}), &["text"])
        }

        fn call(&self, args: &Value, _ctx: &mut Ctx) -> Result<String, ToolError> {
            Ok(str_arg(args, "text")?.to_uppercase())
        }
    }

    fn ctx_with(replies: Vec<ChatMessage>) -> (Arc<ScriptedClient>, Ctx) {
        let client = Arc::new(ScriptedClient::new(replies));
        let ctx = Ctx::new().with_client(Arc::clone(&client));
        (client, ctx)
    }

    #[test]
    fn text_reply_ends_the_turn() {
        let (client, mut ctx) = ctx_with(vec![ChatMessage::assistant("GDP grew 2.5%")]);
        let mut agent = AssistantAgent::new("analyst", "You analyze.");
        let mut conv = Conversation::new("how is gdp?");
        conv.begin_turn("gatherer");
        conv.push(Message::text("gatherer", "found data"));

        let (conv, outcome) = agent.run(conv, &mut ctx).unwrap();
        assert_eq!(outcome, Outcome::Continue);
        assert_eq!(conv.last_chat().unwrap().content, "GDP grew 2.5%");
        assert_eq!(conv.last_speaker(), Some("analyst"));

        let req = &client.requests()[0];
        assert_eq!(req.system.as_deref(), Some("You analyze."));
        assert_eq!(req.messages[0].content, "how is gdp?");
        assert_eq!(req.messages[1].content, "gatherer: found data");
        assert!(req.tools.is_empty());
    }

    #[test]
    fn tool_results_are_summarized_without_reflection() {
        let (client, mut ctx) = ctx_with(vec![ChatMessage::tool_call("upper", json!({"text": "cpi"}))]);
        let mut agent = AssistantAgent::new("a", "p").tools(ToolBox::new().with(Upper));

        let (conv, outcome) = agent.run(Conversation::new("t"), &mut ctx).unwrap();
        assert_eq!(outcome, Outcome::Continue);
        let turn = conv.latest_turn();
        assert_eq!(turn.len(), 3);
        assert!(matches!(&turn[1].kind, MessageKind::ToolResult { is_error: false, .. }));
        assert_eq!(turn[2].kind, MessageKind::ToolSummary);
        assert_eq!(turn[2].content, "CPI");
        assert_eq!(client.requests()[0].tools[0].name, "upper");
        assert_eq!(client.remaining(), 0);
    }

    #[test]
    fn reflection_makes_a_second_call_without_tools() {
        let (client, mut ctx) = ctx_with(vec![
            ChatMessage::tool_call("upper", json!({"text": "x"})),
            ChatMessage::assistant("The answer is X."),
        ]);
        let mut agent = AssistantAgent::new("a", "p")
            .tools(ToolBox::new().with(Upper))
            .reflect_on_tool_use(true);

        let (conv, _) = agent.run(Conversation::new("t"), &mut ctx).unwrap();
        assert_eq!(conv.last_chat().unwrap().content, "The answer is X.");
        let second = &client.requests()[1];
        assert!(second.tools.is_empty());
        assert_eq!(second.messages.last().unwrap().role, Role::Tool);
    }

    #[test]
    fn several_rounds_until_text() {
        let (client, mut ctx) = ctx_with(vec![
            ChatMessage::tool_call("upper", json!({"text": "a"})),
            ChatMessage::tool_call("upper", json!({"text": "b"})),
            ChatMessage::assistant("done"),
        ]);
        let mut agent = AssistantAgent::new("a", "p")
            .tools(ToolBox::new().with(Upper))
            .max_tool_iterations(5);

        let (conv, _) = agent.run(Conversation::new("t"), &mut ctx).unwrap();
        assert_eq!(conv.last_chat().unwrap().content, "done");
        assert_eq!(client.requests().len(), 3);
        assert_eq!(client.requests()[2].messages.len(), 5);
    }

    #[test]
    fn failing_tool_becomes_an_error_result() {
        let (_client, mut ctx) = ctx_with(vec![ChatMessage::tool_call("missing", json!({}))]);
        let mut agent = AssistantAgent::new("a", "p").tools(ToolBox::new().with(Upper));

        let (conv, outcome) = agent.run(Conversation::new("t"), &mut ctx).unwrap();
        assert_eq!(outcome, Outcome::Continue);
        let turn = conv.latest_turn();
        assert!(matches!(&turn[1].kind, MessageKind::ToolResult { is_error: true, .. }));
        assert!(turn[1].content.starts_with("Error: unknown tool 'missing'"));
    }

    #[test]
    fn handoff_call_routes_to_target() {
        let reply = ChatMessage {
            role: Role::Assistant,
            content: String::new(),
            tool_calls: vec![
                ToolCall::new("upper", json!({"text": "q"})),
                ToolCall::new("transfer_to_analyst", json!({})),
            ],
            tool_name: None,
        };
        let (client, mut ctx) = ctx_with(vec![reply]);
        let mut agent = AssistantAgent::new("gatherer", "p")
            .tools(ToolBox::new().with(Upper))
            .handoff("analyst");

        let (conv, outcome) = agent.run(Conversation::new("t"), &mut ctx).unwrap();
        assert_eq!(outcome, Outcome::next("analyst"));
        assert_eq!(
            conv.last_chat().unwrap().kind,
            MessageKind::Handoff { target: "analyst".into() }
        );
        // The tool that came with the handoff still ran.
        assert_eq!(conv.latest_turn().len(), 3);

        let names: Vec<String> = client.requests()[0].tools.iter().map(|t| t.name.clone()).collect();
        assert_eq!(names, ["upper", "transfer_to_analyst"]);
    }

    #[test]
    fn undeclared_transfer_is_just_an_unknown_tool() {
        let (_client, mut ctx) = ctx_with(vec![ChatMessage::tool_call("transfer_to_writer", json!({}))]);
        let mut agent = AssistantAgent::new("a", "p").handoff("analyst");
        let (conv, outcome) = agent.run(Conversation::new("t"), &mut ctx).unwrap();
        assert_eq!(outcome, Outcome::Continue);
        assert_eq!(conv.last_chat().unwrap().kind, MessageKind::ToolSummary);
    }
}
