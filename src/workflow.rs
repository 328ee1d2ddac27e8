//! The routing table a [`crate::Runner`] executes: named agents, a start
//! agent, and a default route out of each agent for [`Outcome::Continue`].
//!
//! [`Outcome::Continue`]: crate::Outcome::Continue

use std::collections::HashMap;

use thiserror::Error;

use crate::Agent;

#[derive(Debug, Error, PartialEq)]
pub enum WorkflowError {
    #[error("duplicate agent name: {0}")]
    DuplicateAgent(String),
    #[error("unknown step: {0}")]
    UnknownStep(String),
    #[error("workflow missing start step")]
    MissingStart,
}

pub struct WorkflowBuilder<S: Clone + 'static> {
    name: String,
    agents: Vec<Box<dyn Agent<S>>>,
    start: Option<String>,
    routes: Vec<(String, String)>,
}

impl<S: Clone + 'static> WorkflowBuilder<S> {
    /// Add an agent. Unless [`start_at`](Self::start_at) says otherwise, the
    /// first one registered runs first.
    pub fn register<A: Agent<S>>(mut self, agent: A) -> Self {
        self.agents.push(Box::new(agent));
        self
    }

    pub fn start_at(mut self, agent: impl Into<String>) -> Self {
        self.start = Some(agent.into());
        self
    }

    /// Where `from` goes on [`crate::Outcome::Continue`]. A later route out
    /// of the same agent replaces the earlier one; `from == to` is allowed.
    pub fn route(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        let (from, to) = (from.into(), to.into());
        self.routes.retain(|(f, _)| *f != from);
        self.routes.push((from, to));
        self
    }

    pub fn build(self) -> Result<Workflow<S>, WorkflowError> {
        let mut slots = HashMap::with_capacity(self.agents.len());
        for (i, agent) in self.agents.iter().enumerate() {
            let name = agent.name().to_string();
            if slots.insert(name.clone(), i).is_some() {
                return Err(WorkflowError::DuplicateAgent(name));
            }
        }

        let known = |name: &str| -> Result<(), WorkflowError> {
            if slots.contains_key(name) {
                Ok(())
            } else {
                Err(WorkflowError::UnknownStep(name.to_string()))
            }
        };

        let start = match self.start {
            Some(start) => start,
            None => self
                .agents
                .first()
                .map(|a| a.name().to_string())
                .ok_or(WorkflowError::MissingStart)?,
        };
        known(&start)?;
        for (from, to) in &self.routes {
            known(from)?;
            known(to)?;
        }

        Ok(Workflow {
            name: self.name,
            start,
            agents: self.agents,
            slots,
            routes: self.routes.into_iter().collect(),
        })
    }
}

/// A validated routing table. Only [`WorkflowBuilder::build`] makes one.
pub struct Workflow<S: Clone + 'static> {
    name: String,
    start: String,
    agents: Vec<Box<dyn Agent<S>>>,
    slots: HashMap<String, usize>,
    routes: HashMap<String, String>,
}

impl<S: Clone + 'static> Workflow<S> {
    pub fn builder(name: impl Into<String>) -> WorkflowBuilder<S> {
        WorkflowBuilder {
            name: name.into(),
            agents: Vec::new(),
            start: None,
            routes: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start(&self) -> &str {
        &self.start
    }

    /// Agent names in registration order.
    pub fn agent_names(&self) -> impl Iterator<Item = &str> {
        self.agents.iter().map(|a| a.name())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    pub fn route_from(&self, from: &str) -> Option<&str> {
        self.routes.get(from).map(String::as_str)
    }

    pub(crate) fn agent_mut(&mut self, name: &str) -> Option<&mut (dyn Agent<S> + 'static)> {
        let slot = *self.slots.get(name)?;
        self.agents.get_mut(slot).map(|a| a.as_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Ctx, Outcome, StepResult};

    #[derive(Clone)]
    struct Notes;

    struct Member(&'static str);

    impl Agent<Notes> for Member {
        fn name(&self) -> &str {
            self.0
        }
        fn run(&mut self, state: Notes, _ctx: &mut Ctx) -> StepResult<Notes> {
            Ok((state, Outcome::Done))
        }
    }

    fn builder() -> WorkflowBuilder<Notes> {
        Workflow::builder("research")
            .register(Member("data_gatherer"))
            .register(Member("economic_modeler"))
    }

    #[test]
    fn first_registered_agent_starts_by_default() {
        let wf = builder().build().unwrap();
        assert_eq!(wf.name(), "research");
        assert_eq!(wf.start(), "data_gatherer");
        assert_eq!(
            wf.agent_names().collect::<Vec<_>>(),
            ["data_gatherer", "economic_modeler"]
        );
    }

    #[test]
    fn routes_form_a_ring() {
        let wf = builder()
            .start_at("economic_modeler")
            .route("data_gatherer", "economic_modeler")
            .route("economic_modeler", "data_gatherer")
            .build()
            .unwrap();
        assert_eq!(wf.start(), "economic_modeler");
        assert_eq!(wf.route_from("data_gatherer"), Some("economic_modeler"));
        assert_eq!(wf.route_from("economic_modeler"), Some("data_gatherer"));
    }

    #[test]
    fn later_route_replaces_earlier_and_self_routes_are_fine() {
        let wf = builder()
            .route("data_gatherer", "economic_modeler")
            .route("data_gatherer", "data_gatherer")
            .build()
            .unwrap();
        assert_eq!(wf.route_from("data_gatherer"), Some("data_gatherer"));
        assert_eq!(wf.route_from("economic_modeler"), None);
    }

    #[test]
    fn empty_workflow_has_no_start() {
        let err = Workflow::<Notes>::builder("empty").build().err().unwrap();
        assert_eq!(err, WorkflowError::MissingStart);
    }

    #[test]
    fn unknown_names_are_rejected() {
        let err = builder().start_at("synthesis").build().err().unwrap();
        assert_eq!(err, WorkflowError::UnknownStep("synthesis".into()));

        let err = builder().route("ghost", "data_gatherer").build().err().unwrap();
        assert_eq!(err, WorkflowError::UnknownStep("ghost".into()));

        let err = builder().route("data_gatherer", "synthesis").build().err().unwrap();
        assert_eq!(err, WorkflowError::UnknownStep("synthesis".into()));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = builder().register(Member("data_gatherer")).build().err().unwrap();
        assert_eq!(err, WorkflowError::DuplicateAgent("data_gatherer".into()));
    }

    #[test]
    fn agents_are_looked_up_by_name() {
        let mut wf = builder().build().unwrap();
        assert!(wf.contains("economic_modeler"));
        let found = wf.agent_mut("economic_modeler").map(|a| a.name().to_string());
        assert_eq!(found.as_deref(), Some("economic_modeler"));
        assert!(wf.agent_mut("synthesis").is_none());
    }
}
