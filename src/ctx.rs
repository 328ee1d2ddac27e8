use crate::llm::{ChatClient, LlmRequest};
use crate::sandbox::Session;

/// Execution context for agents: the chat client, the analysis session that
/// tool calls share, and a log of tool calls.
pub struct Ctx {
    log: Vec<String>,
    client: Option<Box<dyn ChatClient>>,
    session: Option<Session>,
}

impl Ctx {
    pub fn new() -> Self {
        Self {
            log: vec![],
            client: None,
            session: None,
        }
    }

    /// Attach the chat client used by [`Ctx::llm`] and LLM-backed agents.
    pub fn with_client(mut self, client: impl ChatClient + 'static) -> Self {
        self.client = Some(Box::new(client));
        self
    }

    /// Attach the analysis session the `run_analysis` tool operates on.
    pub fn with_session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    /// Start a one-shot chat request against the configured client.
    pub fn llm(&self) -> LlmRequest<'_> {
        LlmRequest::new(self.client.as_deref())
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut Session> {
        self.session.as_mut()
    }

    pub fn log(&mut self, msg: impl Into<String>) {
        self.log.push(msg.into());
    }

    pub fn logs(&self) -> &[String] {
        &self.log
    }
}

impl Default for Ctx {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatMessage, ScriptedClient};

    #[test]
    fn log_keeps_order() {
        let mut ctx = Ctx::new();
        ctx.log("web_search: ok");
        ctx.log("scrape_website: ok");
        assert_eq!(ctx.logs(), ["web_search: ok", "scrape_website: ok"]);
    }

    #[test]
    fn llm_uses_attached_client() {
        let ctx = Ctx::new().with_client(ScriptedClient::new([ChatMessage::assistant("hi")]));
        assert_eq!(ctx.llm().user("hello").send().unwrap(), "hi");
    }

    #[test]
    fn session_is_absent_until_attached() {
        let mut ctx = Ctx::new();
        assert!(ctx.session().is_none());
        assert!(ctx.session_mut().is_none());
    }
}
