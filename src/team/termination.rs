use super::conversation::{Conversation, MessageKind};

/// When a team stops. Checked after every step; the first condition that
/// holds supplies the stop reason.
#[derive(Debug, Clone, PartialEq)]
pub enum Termination {
    /// Chat messages, task included, reach the ceiling.
    MaxMessages(usize),
    /// A chat message from the latest turn contains the phrase.
    TextMention(String),
    /// Agent turns reach the ceiling.
    MaxTurns(usize),
    Any(Vec<Termination>),
}

impl Termination {
    pub fn text(phrase: impl Into<String>) -> Self {
        Termination::TextMention(phrase.into())
    }

    /// Combine two conditions; whichever holds first stops the team.
    pub fn or(self, other: Termination) -> Self {
        match (self, other) {
            (Termination::Any(mut a), Termination::Any(b)) => {
                a.extend(b);
                Termination::Any(a)
            }
            (Termination::Any(mut a), other) => {
                a.push(other);
                Termination::Any(a)
            }
            (this, Termination::Any(mut b)) => {
                b.insert(0, this);
                Termination::Any(b)
            }
            (this, other) => Termination::Any(vec![this, other]),
        }
    }

    pub fn check(&self, conv: &Conversation) -> Option<String> {
        match self {
            Termination::MaxMessages(max) => {
                let count = conv.chat_count();
                (count >= *max).then(|| {
                    format!("maximum number of messages {max} reached, current message count: {count}")
                })
            }
            Termination::TextMention(phrase) => conv
                .latest_turn()
                .iter()
                .filter(|m| m.is_chat() && m.kind != MessageKind::Task)
                .any(|m| m.content.contains(phrase.as_str()))
                .then(|| format!("text '{phrase}' mentioned")),
            Termination::MaxTurns(max) => {
                (conv.turns() >= *max).then(|| format!("maximum number of turns {max} reached"))
            }
            Termination::Any(all) => all.iter().find_map(|t| t.check(conv)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::team::Message;

    #[test]
    fn message_ceiling_counts_the_task() {
        let mut conv = Conversation::new("t");
        let cond = Termination::MaxMessages(2);
        assert!(cond.check(&conv).is_none());
        conv.begin_turn("a");
        conv.push(Message::text("a", "hi"));
        assert!(cond.check(&conv).unwrap().contains("maximum number of messages 2"));
    }

    #[test]
    fn mention_only_looks_at_the_latest_turn() {
        let cond = Termination::text("TERMINATE");
        let mut conv = Conversation::new("say TERMINATE when done");
        assert!(cond.check(&conv).is_none());

        conv.begin_turn("a");
        conv.push(Message::text("a", "report ready. TERMINATE"));
        assert!(cond.check(&conv).is_some());

        conv.begin_turn("b");
        conv.push(Message::text("b", "more work"));
        assert!(cond.check(&conv).is_none());
    }

    #[test]
    fn tool_results_do_not_trigger_mentions() {
        let cond = Termination::text("TERMINATE");
        let mut conv = Conversation::new("t");
        conv.begin_turn("a");
        conv.push(Message::tool_result("a", "scrape_website", "TERMINATE", false));
        assert!(cond.check(&conv).is_none());
    }

    #[test]
    fn any_reports_the_first_condition_that_holds() {
        let cond = Termination::MaxTurns(1)
            .or(Termination::text("DONE"))
            .or(Termination::MaxMessages(50));
        assert!(matches!(&cond, Termination::Any(v) if v.len() == 3));

        let mut conv = Conversation::new("t");
        conv.begin_turn("a");
        conv.push(Message::text("a", "DONE"));
        assert_eq!(cond.check(&conv).unwrap(), "maximum number of turns 1 reached");
    }
}
