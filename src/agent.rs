use std::time::Duration;

use thiserror::Error;

use crate::ctx::Ctx;

/// What a step hands back: the new state and where the run goes next.
pub type StepResult<S> = Result<(S, Outcome), StepError>;

/// One participant of a team, or any other step of a [`crate::Workflow`].
///
/// Agents own their names because team members come from a config table
/// at runtime. The state is passed by value and returned, so a failed step
/// leaves the runner holding the state from before it.
pub trait Agent<S>: Send + 'static {
    /// Unique within a workflow; [`Outcome::Next`] targets it.
    fn name(&self) -> &str;

    fn run(&mut self, state: S, ctx: &mut Ctx) -> StepResult<S>;
}

/// Where the runner goes after a step.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Take the default route out of this step (the team's turn-taking rule).
    Continue,
    /// Stop; the current state is the result.
    Done,
    /// Hand the turn to the named agent.
    Next(String),
    /// Run the same agent again. Counts against the retry budget.
    Retry(RetryHint),
    /// Sleep, then run the same agent again. Counts against the retry budget.
    Wait(Duration),
    /// Stop with [`StepError::Failed`].
    Fail(String),
}

impl Outcome {
    pub fn next(agent: impl Into<String>) -> Self {
        Outcome::Next(agent.into())
    }

    pub fn retry(reason: impl Into<String>) -> Self {
        Outcome::Retry(RetryHint::new(reason))
    }

    /// Whether the runner stays on the same agent.
    pub fn repeats(&self) -> bool {
        matches!(self, Outcome::Retry(_) | Outcome::Wait(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryHint {
    pub reason: String,
}

impl RetryHint {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Why a step failed, grouped by what the caller can do about it.
#[derive(Debug, Error)]
pub enum StepError {
    /// Misconfiguration or a broken contract (unknown route, no chat client).
    /// Retrying will not help.
    #[error("invalid: {0}")]
    Invalid(String),
    /// Network trouble or an unreachable model server. The runner retries
    /// these with backoff.
    #[error("transient: {0}")]
    Transient(String),
    /// An agent gave up through [`Outcome::Fail`].
    #[error("failed: {0}")]
    Failed(String),
    #[error("{0}")]
    Other(String),
}

impl StepError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        StepError::Invalid(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        StepError::Other(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        StepError::Transient(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, StepError::Transient(_))
    }
}

impl From<ureq::Error> for StepError {
    fn from(e: ureq::Error) -> Self {
        StepError::Transient(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(StepError::transient("ollama unreachable").is_transient());
        assert!(!StepError::invalid("no chat client configured").is_transient());
        assert!(!StepError::Failed("gave up".into()).is_transient());
        assert!(!StepError::other("scripted replies exhausted").is_transient());
    }

    #[test]
    fn messages_carry_their_category() {
        assert_eq!(StepError::invalid("no route").to_string(), "invalid: no route");
        assert_eq!(
            StepError::transient("connection refused").to_string(),
            "transient: connection refused"
        );
        assert_eq!(StepError::Failed("no data".into()).to_string(), "failed: no data");
        assert_eq!(StepError::other("boom").to_string(), "boom");
    }

    #[test]
    fn http_failures_are_transient() {
        let err: StepError = ureq::Error::StatusCode(503).into();
        assert!(err.is_transient());
    }

    #[test]
    fn outcome_shorthands() {
        assert_eq!(Outcome::next("synthesis"), Outcome::Next("synthesis".into()));
        assert_eq!(
            Outcome::retry("model sent no name"),
            Outcome::Retry(RetryHint::new("model sent no name"))
        );
        assert!(Outcome::Wait(Duration::from_millis(5)).repeats());
        assert!(Outcome::retry("again").repeats());
        assert!(!Outcome::Continue.repeats());
        assert!(!Outcome::next("a").repeats());
    }
}
