//! Multi-agent LLM workflows for economic research and financial CSV analysis.
//!
//! Agents are steps in a [`Workflow`] run by a [`Runner`]. They share a
//! context ([`Ctx`]) that holds the chat client and the analysis [`Session`],
//! and steer control flow with outcomes like [`Outcome::Continue`],
//! [`Outcome::Next`], [`Outcome::Retry`], and [`Outcome::Done`].
//!
//! On top of that core:
//!
//! - [`team`] turns LLM-backed agents into swarm, round-robin and selector
//!   teams with termination conditions;
//! - [`data`] loads and normalizes financial CSVs into a time-indexed [`Frame`];
//! - [`sandbox`] runs analysis snippets against that frame;
//! - [`tools`] exposes web search, scraping and the sandbox to agents;
//! - [`config`] reads the agent table and settings from TOML.
//!
//! # Quick start
//!
//! ```rust
//! use econ_swarm::{Agent, Ctx, Outcome, Runner, StepResult, Workflow};
//!
//! #[derive(Clone)]
//! struct State { n: i32 }
//!
//! struct AddOne { name: String }
//! impl Agent<State> for AddOne {
//!     fn name(&self) -> &str { &self.name }
//!     fn run(&mut self, state: State, _ctx: &mut Ctx) -> StepResult<State> {
//!         Ok((State { n: state.n + 1 }, Outcome::Done))
//!     }
//! }
//!
//! let mut ctx = Ctx::new();
//! let wf = Workflow::builder("demo")
//!     .register(AddOne { name: "add_one".into() })
//!     .build()
//!     .unwrap();
//!
//! let result = Runner::new(wf).run(State { n: 0 }, &mut ctx).unwrap();
//! assert_eq!(result.n, 1);
//! ```
//!
//! # Analysis sessions
//!
//! ```rust
//! use econ_swarm::data::read_financial_csv;
//! use econ_swarm::Session;
//!
//! let csv = "Date,Close \n2024-01-02,11\nnot-a-date,0\n2024-01-01,10\n";
//! let mut session = Session::new(read_financial_csv(csv.as_bytes()).unwrap(), ".");
//! session.exec("df['ret'] = df.close.pct_change()").unwrap();
//! assert_eq!(session.exec("round(df.ret.last(), 2)").unwrap(), "0.1\n");
//! ```

mod agent;
pub mod config;
mod ctx;
pub mod data;
pub mod llm;
mod runner;
pub mod sandbox;
pub mod team;
pub mod tools;
mod workflow;

pub use agent::{Agent, Outcome, RetryHint, StepError, StepResult};
pub use config::{Config, ConfigError};
pub use ctx::Ctx;
pub use data::{Frame, LoadError, load_financial_csv};
pub use llm::{ChatClient, ChatMessage, OllamaClient, ScriptedClient};
pub use runner::{ErrorEvent, Runner, StepEvent};
pub use sandbox::{Session, SandboxError};
pub use team::{AssistantAgent, TaskResult, Team, TeamKind, Termination};
pub use tools::{Tool, ToolBox};
pub use workflow::{Workflow, WorkflowBuilder, WorkflowError};
