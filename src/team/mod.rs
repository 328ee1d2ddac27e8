//! Teams of LLM agents sharing one conversation.
//!
//! A team is a [`Workflow`] over [`Conversation`] whose routing table encodes
//! the turn-taking rule:
//!
//! - `swarm`: the first agent starts and keeps the turn until it hands off.
//! - `round_robin`: agents speak in order, wrapping around.
//! - `selector`: a [`SelectorAgent`] step picks each next speaker.
//!
//! A [`Termination`] condition is checked after every step.

mod assistant;
mod conversation;
mod selector;
mod termination;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::{Agent, Ctx, Runner, StepError, Workflow, WorkflowError};

pub use assistant::AssistantAgent;
pub use conversation::{Conversation, Message, MessageKind, USER};
pub use selector::{DEFAULT_SELECTOR_PROMPT, SELECTOR, SelectorAgent};
pub use termination::Termination;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamKind {
    #[default]
    Swarm,
    RoundRobin,
    Selector,
}

impl fmt::Display for TeamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TeamKind::Swarm => "swarm",
            TeamKind::RoundRobin => "round_robin",
            TeamKind::Selector => "selector",
        })
    }
}

#[derive(Debug, Error)]
pub enum TeamError {
    #[error("a team needs at least one agent")]
    NoAgents,
    #[error("a selector team needs at least two agents, got {0}")]
    TooFewForSelector(usize),
    #[error("agent '{agent}' hands off to unknown agent '{target}'")]
    UnknownHandoff { agent: String, target: String },
    #[error("agent '{0}' cannot hand off to itself")]
    SelfHandoff(String),
    #[error("'{0}' is reserved for the selector step")]
    ReservedName(String),
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

pub struct TeamBuilder {
    kind: TeamKind,
    agents: Vec<AssistantAgent>,
    selector: Option<SelectorAgent>,
    termination: Option<Termination>,
    max_steps: usize,
}

impl TeamBuilder {
    pub fn agent(mut self, agent: AssistantAgent) -> Self {
        self.agents.push(agent);
        self
    }

    pub fn agents(mut self, agents: impl IntoIterator<Item = AssistantAgent>) -> Self {
        self.agents.extend(agents);
        self
    }

    pub fn termination(mut self, termination: Termination) -> Self {
        self.termination = Some(termination);
        self
    }

    /// Runner step ceiling. Selector steps count too.
    pub fn max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Replace the default selector (built from the agents' descriptions).
    pub fn selector(mut self, selector: SelectorAgent) -> Self {
        self.selector = Some(selector);
        self
    }

    fn validate(&self) -> Result<(), TeamError> {
        if self.agents.is_empty() {
            return Err(TeamError::NoAgents);
        }
        if self.kind == TeamKind::Selector && self.agents.len() < 2 {
            return Err(TeamError::TooFewForSelector(self.agents.len()));
        }
        for agent in &self.agents {
            let name = agent.name();
            if self.kind == TeamKind::Selector && name == SELECTOR {
                return Err(TeamError::ReservedName(name.to_string()));
            }
            for target in agent.handoff_targets() {
                if target == name {
                    return Err(TeamError::SelfHandoff(name.to_string()));
                }
                if !self.agents.iter().any(|a| a.name() == target) {
                    return Err(TeamError::UnknownHandoff {
                        agent: name.to_string(),
                        target: target.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn build(self) -> Result<Team, TeamError> {
        self.validate()?;
        let names: Vec<String> = self.agents.iter().map(|a| a.name().to_string()).collect();
        let participants: Vec<(String, String)> = self
            .agents
            .iter()
            .map(|a| (a.name().to_string(), a.about().to_string()))
            .collect();

        let mut wf = Workflow::builder(self.kind.to_string());
        for agent in self.agents {
            wf = wf.register(agent);
        }
        wf = match self.kind {
            TeamKind::Swarm => names
                .iter()
                .fold(wf.start_at(&names[0]), |wf, n| wf.route(n, n)),
            TeamKind::RoundRobin => names
                .iter()
                .zip(names.iter().cycle().skip(1))
                .fold(wf.start_at(&names[0]), |wf, (from, to)| wf.route(from, to)),
            TeamKind::Selector => {
                let selector = self
                    .selector
                    .unwrap_or_else(|| SelectorAgent::new(participants));
                names
                    .iter()
                    .fold(wf.register(selector).start_at(SELECTOR), |wf, n| {
                        wf.route(n, SELECTOR)
                    })
            }
        };

        let mut runner = Runner::new(wf.build()?)
            .with_max_steps(self.max_steps)
            .stop_at_max_steps()
            .with_tracing();
        if let Some(termination) = self.termination {
            runner = runner.with_termination(move |conv: &Conversation| termination.check(conv));
        }

        Ok(Team {
            kind: self.kind,
            agents: names,
            runner,
        })
    }
}

/// What a finished run hands back.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskResult {
    pub conversation: Conversation,
    pub stop_reason: String,
}

impl TaskResult {
    pub fn messages(&self) -> &[Message] {
        self.conversation.messages()
    }

    /// Content of the last chat message.
    pub fn final_text(&self) -> Option<&str> {
        self.conversation.last_chat().map(|m| m.content.as_str())
    }
}

pub struct Team {
    kind: TeamKind,
    agents: Vec<String>,
    runner: Runner<Conversation>,
}

impl Team {
    pub fn builder(kind: TeamKind) -> TeamBuilder {
        TeamBuilder {
            kind,
            agents: Vec::new(),
            selector: None,
            termination: None,
            max_steps: 100,
        }
    }

    pub fn swarm() -> TeamBuilder {
        Self::builder(TeamKind::Swarm)
    }

    pub fn round_robin() -> TeamBuilder {
        Self::builder(TeamKind::RoundRobin)
    }

    pub fn selector() -> TeamBuilder {
        Self::builder(TeamKind::Selector)
    }

    pub fn kind(&self) -> TeamKind {
        self.kind
    }

    pub fn agent_names(&self) -> &[String] {
        &self.agents
    }

    /// Run a task to completion. Stops when the termination condition holds,
    /// an agent ends the workflow, or the step ceiling is reached.
    pub fn run(&mut self, task: &str, ctx: &mut Ctx) -> Result<TaskResult, StepError> {
        info!(kind = %self.kind, agents = ?self.agents, "team started");
        let conversation = self.runner.run(Conversation::new(task), ctx)?;
        let stop_reason = self
            .runner
            .stop_reason()
            .unwrap_or("finished")
            .to_string();
        info!(
            messages = conversation.chat_count(),
            turns = conversation.turns(),
            reason = %stop_reason,
            "team stopped"
        );
        Ok(TaskResult {
            conversation,
            stop_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatMessage, ScriptedClient};
    use serde_json::json;
    use std::sync::Arc;

    fn ctx_with(replies: Vec<ChatMessage>) -> (Arc<ScriptedClient>, Ctx) {
        let client = Arc::new(ScriptedClient::new(replies));
        let ctx = Ctx::new().with_client(Arc::clone(&client));
        (client, ctx)
    }

    fn speakers(result: &TaskResult) -> Vec<&str> {
        result
            .messages()
            .iter()
            .filter(|m| m.is_chat())
            .map(|m| m.source.as_str())
            .collect()
    }

    #[test]
    fn swarm_keeps_the_turn_until_handoff() {
        let (_client, mut ctx) = ctx_with(vec![
            ChatMessage::assistant("still gathering"),
            ChatMessage::tool_call("transfer_to_writer", json!({})),
            ChatMessage::assistant("Report. TERMINATE"),
        ]);
        let mut team = Team::swarm()
            .agent(AssistantAgent::new("gatherer", "g").handoff("writer"))
            .agent(AssistantAgent::new("writer", "w"))
            .termination(Termination::text("TERMINATE").or(Termination::MaxMessages(20)))
            .build()
            .unwrap();

        let result = team.run("outlook", &mut ctx).unwrap();
        assert_eq!(speakers(&result), ["user", "gatherer", "gatherer", "writer"]);
        assert_eq!(result.stop_reason, "text 'TERMINATE' mentioned");
        assert_eq!(result.final_text(), Some("Report. TERMINATE"));
    }

    #[test]
    fn round_robin_wraps_around() {
        let (_client, mut ctx) = ctx_with(
            ["a1", "b1", "a2"].into_iter().map(ChatMessage::assistant).collect(),
        );
        let mut team = Team::round_robin()
            .agent(AssistantAgent::new("a", "p"))
            .agent(AssistantAgent::new("b", "p"))
            .termination(Termination::MaxTurns(3))
            .build()
            .unwrap();

        let result = team.run("t", &mut ctx).unwrap();
        assert_eq!(speakers(&result), ["user", "a", "b", "a"]);
        assert_eq!(result.stop_reason, "maximum number of turns 3 reached");
    }

    #[test]
    fn selector_team_alternates_selector_and_agents() {
        let (client, mut ctx) = ctx_with(vec![
            ChatMessage::assistant("analyst"),
            ChatMessage::assistant("numbers look fine"),
            ChatMessage::assistant("writer"),
            ChatMessage::assistant("final report"),
        ]);
        let mut team = Team::selector()
            .agent(AssistantAgent::new("analyst", "p").description("analyzes"))
            .agent(AssistantAgent::new("writer", "p").description("writes"))
            .termination(Termination::MaxMessages(3))
            .build()
            .unwrap();

        let result = team.run("t", &mut ctx).unwrap();
        assert_eq!(speakers(&result), ["user", "analyst", "writer"]);
        assert_eq!(client.remaining(), 0);
        assert!(client.requests()[0].messages[0].content.contains("writer: writes"));
    }

    #[test]
    fn step_ceiling_keeps_the_transcript() {
        let (_client, mut ctx) = ctx_with(vec![ChatMessage::assistant("x"); 3]);
        let mut team = Team::swarm()
            .agent(AssistantAgent::new("a", "p"))
            .max_steps(3)
            .build()
            .unwrap();
        let result = team.run("t", &mut ctx).unwrap();
        assert_eq!(speakers(&result), ["user", "a", "a", "a"]);
        assert_eq!(result.stop_reason, "max_steps (3) reached");
    }

    #[test]
    fn build_rejects_bad_tables() {
        assert!(matches!(Team::swarm().build(), Err(TeamError::NoAgents)));
        assert!(matches!(
            Team::selector().agent(AssistantAgent::new("a", "p")).build(),
            Err(TeamError::TooFewForSelector(1))
        ));
        assert!(matches!(
            Team::swarm()
                .agent(AssistantAgent::new("a", "p").handoff("economic_modeler"))
                .build(),
            Err(TeamError::UnknownHandoff { target, .. }) if target == "economic_modeler"
        ));
        assert!(matches!(
            Team::swarm().agent(AssistantAgent::new("a", "p").handoff("a")).build(),
            Err(TeamError::SelfHandoff(_))
        ));
        assert!(matches!(
            Team::round_robin()
                .agent(AssistantAgent::new("a", "p"))
                .agent(AssistantAgent::new("a", "q"))
                .build(),
            Err(TeamError::Workflow(WorkflowError::DuplicateAgent(_)))
        ));
    }

    #[test]
    fn llm_errors_stop_the_team() {
        let (_client, mut ctx) = ctx_with(vec![]);
        let mut team = Team::swarm()
            .agent(AssistantAgent::new("a", "p"))
            .build()
            .unwrap();
        assert!(matches!(team.run("t", &mut ctx), Err(StepError::Other(_))));
    }
}
