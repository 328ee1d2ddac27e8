use tracing::{debug, warn};

use super::conversation::Conversation;
use crate::llm::ChatMessage;
use crate::tools::mentioned_names;
use crate::{Agent, Ctx, Outcome, StepError, StepResult};

/// Step name of the selector in a selector team.
pub const SELECTOR: &str = "selector";

pub const DEFAULT_SELECTOR_PROMPT: &str = "You are in a role play game. The following roles are available:
{roles}.
Read the following conversation. Then select the next role from {participants} to play. Only return the role.

{history}

Read the above conversation. Then select the next role from {participants} to play. Only return the role.";

const MAX_ATTEMPTS: usize = 3;

/// Picks the next speaker by asking the model to name one.
#[derive(Debug, Clone)]
pub struct SelectorAgent {
    participants: Vec<(String, String)>,
    prompt: String,
    allow_repeated_speaker: bool,
}

impl SelectorAgent {
    /// `participants` are `(name, description)` pairs in declared order.
    pub fn new(participants: Vec<(String, String)>) -> Self {
        Self {
            participants,
            prompt: DEFAULT_SELECTOR_PROMPT.to_string(),
            allow_repeated_speaker: true,
        }
    }

    /// Template with `{roles}`, `{participants}` and `{history}` placeholders.
    pub fn prompt(mut self, template: impl Into<String>) -> Self {
        self.prompt = template.into();
        self
    }

    pub fn allow_repeated_speaker(mut self, allow: bool) -> Self {
        self.allow_repeated_speaker = allow;
        self
    }

    fn candidates(&self, previous: Option<&str>) -> Vec<&str> {
        let all = self.participants.iter().map(|(n, _)| n.as_str());
        let filtered: Vec<&str> = all
            .clone()
            .filter(|n| self.allow_repeated_speaker || Some(*n) != previous)
            .collect();
        if filtered.is_empty() { all.collect() } else { filtered }
    }

    fn render(&self, conv: &Conversation, candidates: &[&str]) -> String {
        let roles = self
            .participants
            .iter()
            .filter(|(n, _)| candidates.contains(&n.as_str()))
            .map(|(n, d)| format!("{n}: {d}"))
            .collect::<Vec<_>>()
            .join("\n");
        let history = conv
            .chat_messages()
            .map(|m| format!("{}: {}", m.source, m.content))
            .collect::<Vec<_>>()
            .join("\n");
        self.prompt
            .replace("{roles}", &roles)
            .replace("{participants}", &format!("{candidates:?}"))
            .replace("{history}", &history)
    }
}

impl Agent<Conversation> for SelectorAgent {
    fn name(&self) -> &str {
        SELECTOR
    }

    fn run(&mut self, conv: Conversation, ctx: &mut Ctx) -> StepResult<Conversation> {
        let previous = conv.last_speaker();
        let candidates = self.candidates(previous);
        if let [only] = candidates.as_slice() {
            return Ok((conv.clone(), Outcome::next(*only)));
        }

        let mut messages = vec![ChatMessage::user(self.render(&conv, &candidates))];
        for attempt in 1..=MAX_ATTEMPTS {
            let reply = ctx.llm().messages(messages.clone()).send()?;
            let named = mentioned_names(&reply, &candidates);
            debug!(attempt, reply = %reply, ?named, "selector reply");

            let feedback = match named.as_slice() {
                [one] => return Ok((conv.clone(), Outcome::next(*one))),
                [] => format!(
                    "No valid name was mentioned. Please select from: {candidates:?}."
                ),
                _ => format!(
                    "Expected exactly one name to be mentioned. Please select only one from: {candidates:?}."
                ),
            };
            messages.push(ChatMessage::assistant(reply));
            messages.push(ChatMessage::user(feedback));
        }

        let fallback = previous
            .filter(|p| self.participants.iter().any(|(n, _)| n == *p))
            .or(candidates.first().copied())
            .ok_or_else(|| StepError::invalid("selector has no participants"))?
            .to_string();
        warn!(speaker = %fallback, "selector gave no usable name, falling back");
        Ok((conv, Outcome::Next(fallback)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedClient;
    use crate::team::Message;
    use std::sync::Arc;

    fn selector() -> SelectorAgent {
        SelectorAgent::new(vec![
            ("gatherer".into(), "finds data".into()),
            ("analyst".into(), "interprets data".into()),
            ("writer".into(), "writes the report".into()),
        ])
    }

    fn ctx_with(replies: &[&str]) -> (Arc<ScriptedClient>, Ctx) {
        let client = Arc::new(ScriptedClient::new(
            replies.iter().map(|r| ChatMessage::assistant(*r)),
        ));
        let ctx = Ctx::new().with_client(Arc::clone(&client));
        (client, ctx)
    }

    #[test]
    fn picks_the_named_agent() {
        let (client, mut ctx) = ctx_with(&["analyst"]);
        let mut conv = Conversation::new("inflation outlook");
        conv.begin_turn("gatherer");
        conv.push(Message::text("gatherer", "CPI is 3.1%"));

        let (_, outcome) = selector().run(conv, &mut ctx).unwrap();
        assert_eq!(outcome, Outcome::next("analyst"));

        let prompt = &client.requests()[0].messages[0].content;
        assert!(prompt.contains("analyst: interprets data"));
        assert!(prompt.contains("gatherer: CPI is 3.1%"));
    }

    #[test]
    fn retries_on_ambiguous_or_empty_replies() {
        let (client, mut ctx) = ctx_with(&["either gatherer or writer", "nobody", "The writer."]);
        let (_, outcome) = selector().run(Conversation::new("t"), &mut ctx).unwrap();
        assert_eq!(outcome, Outcome::next("writer"));
        let last = client.requests().pop().unwrap();
        assert_eq!(last.messages.len(), 5);
        assert!(last.messages[4].content.starts_with("No valid name"));
    }

    #[test]
    fn falls_back_to_previous_speaker() {
        let (_client, mut ctx) = ctx_with(&["?", "?", "?"]);
        let mut conv = Conversation::new("t");
        conv.begin_turn("analyst");
        let (_, outcome) = selector().run(conv, &mut ctx).unwrap();
        assert_eq!(outcome, Outcome::next("analyst"));

        let (_client, mut ctx) = ctx_with(&["?", "?", "?"]);
        let (_, outcome) = selector().run(Conversation::new("t"), &mut ctx).unwrap();
        assert_eq!(outcome, Outcome::next("gatherer"));
    }

    #[test]
    fn repeated_speaker_can_be_excluded() {
        let (client, mut ctx) = ctx_with(&["analyst", "gatherer"]);
        let mut conv = Conversation::new("t");
        conv.begin_turn("analyst");

        let (_, outcome) = selector()
            .allow_repeated_speaker(false)
            .run(conv, &mut ctx)
            .unwrap();
        assert_eq!(outcome, Outcome::next("gatherer"));
        assert_eq!(client.requests().len(), 2);
    }

    #[test]
    fn single_candidate_needs_no_model() {
        let mut ctx = Ctx::new();
        let mut conv = Conversation::new("t");
        conv.begin_turn("a");
        let mut sel = SelectorAgent::new(vec![("a".into(), String::new()), ("b".into(), String::new())])
            .allow_repeated_speaker(false);
        let (_, outcome) = sel.run(conv, &mut ctx).unwrap();
        assert_eq!(outcome, Outcome::next("b"));
    }
}
