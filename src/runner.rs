//! Executes a [`Workflow`] one step at a time.
//!
//! The runner owns the routing loop: it follows [`Outcome`]s, enforces the
//! step ceiling and the retry budget, backs off on transient failures and
//! evaluates the termination predicate after every successful step.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::{Ctx, Outcome, StepError, Workflow};

/// Passed to `on_step` hooks after each successful step.
pub struct StepEvent<'a> {
    pub agent: &'a str,
    pub outcome: &'a Outcome,
    pub duration: Duration,
    pub step_number: usize,
    /// Retries spent on this agent before this step.
    pub retries: usize,
}

/// Passed to `on_error` hooks when a run ends in an error.
pub struct ErrorEvent<'a> {
    pub agent: &'a str,
    pub error: &'a StepError,
    pub step_number: usize,
}

type StepHook = Box<dyn FnMut(&StepEvent)>;
type ErrorHook = Box<dyn FnMut(&ErrorEvent)>;
type Termination<S> = Box<dyn FnMut(&S) -> Option<String>>;

/// Where the loop goes after a step.
enum Flow {
    /// Same agent again, optionally after a pause.
    Stay(Option<Duration>),
    Goto(String),
    Stop,
}

pub struct Runner<S: Clone + 'static> {
    wf: Workflow<S>,
    max_steps: usize,
    max_retries: usize,
    backoff: Duration,
    on_step: Vec<StepHook>,
    on_error: Vec<ErrorHook>,
    termination: Option<Termination<S>>,
    ceiling_stops: bool,
    stop_reason: Option<String>,
}

impl<S: Clone + 'static> Runner<S> {
    pub fn new(wf: Workflow<S>) -> Self {
        Self {
            wf,
            max_steps: 10_000,
            max_retries: 3,
            backoff: Duration::from_millis(500),
            on_step: Vec::new(),
            on_error: Vec::new(),
            termination: None,
            ceiling_stops: false,
            stop_reason: None,
        }
    }

    /// Ceiling on steps per run, retries included. Hitting it is an error
    /// unless [`stop_at_max_steps`](Self::stop_at_max_steps) is set.
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// End the run normally at the step ceiling, keeping the state.
    pub fn stop_at_max_steps(mut self) -> Self {
        self.ceiling_stops = true;
        self
    }

    /// Budget for [`Outcome::Retry`], [`Outcome::Wait`] and transient errors
    /// on one agent. Resets when the turn moves on.
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Base delay before re-running an agent that failed transiently. Doubles
    /// with each further attempt.
    pub fn with_backoff(mut self, base: Duration) -> Self {
        self.backoff = base;
        self
    }

    pub fn on_step(mut self, hook: impl FnMut(&StepEvent) + 'static) -> Self {
        self.on_step.push(Box::new(hook));
        self
    }

    pub fn on_error(mut self, hook: impl FnMut(&ErrorEvent) + 'static) -> Self {
        self.on_error.push(Box::new(hook));
        self
    }

    /// Checked on the new state after every successful step, before routing.
    /// `Some(reason)` ends the run normally.
    pub fn with_termination(mut self, check: impl FnMut(&S) -> Option<String> + 'static) -> Self {
        self.termination = Some(Box::new(check));
        self
    }

    /// Log steps and failures through `tracing`, next to any other hooks.
    pub fn with_tracing(self) -> Self {
        self.on_step(|e| {
            info!(
                step = e.step_number,
                agent = e.agent,
                outcome = ?e.outcome,
                retries = e.retries,
                secs = e.duration.as_secs_f64(),
                "step finished"
            );
        })
        .on_error(|e| {
            warn!(step = e.step_number, agent = e.agent, error = %e.error, "run failed");
        })
    }

    /// Why the last run stopped, when it stopped normally.
    pub fn stop_reason(&self) -> Option<&str> {
        self.stop_reason.as_deref()
    }

    pub fn workflow(&self) -> &Workflow<S> {
        &self.wf
    }

    pub fn run(&mut self, mut state: S, ctx: &mut Ctx) -> Result<S, StepError> {
        let mut current = self.wf.start().to_string();
        let mut retries = 0;
        self.stop_reason = None;

        for step_number in 1..=self.max_steps {
            let Some(agent) = self.wf.agent_mut(&current) else {
                let err = StepError::invalid(format!("unknown step: {current}"));
                return Err(self.fail(&current, err, step_number));
            };

            let started = Instant::now();
            let result = agent.run(state.clone(), ctx);
            let duration = started.elapsed();

            let (next_state, outcome) = match result {
                Ok(step) => step,
                Err(err) if err.is_transient() && retries < self.max_retries => {
                    retries += 1;
                    let delay = self.delay_for(retries);
                    warn!(agent = %current, attempt = retries, ?delay, error = %err, "transient failure, retrying");
                    thread::sleep(delay);
                    continue;
                }
                Err(err) => return Err(self.fail(&current, err, step_number)),
            };

            let event = StepEvent {
                agent: &current,
                outcome: &outcome,
                duration,
                step_number,
                retries,
            };
            for hook in &mut self.on_step {
                hook(&event);
            }

            state = next_state;

            if let Some(check) = &mut self.termination
                && let Some(reason) = check(&state)
            {
                info!(step = step_number, agent = %current, %reason, "termination condition met");
                self.stop_reason = Some(reason);
                return Ok(state);
            }

            match self.flow(&current, outcome, retries) {
                Ok(Flow::Stay(pause)) => {
                    retries += 1;
                    if let Some(pause) = pause {
                        thread::sleep(pause);
                    }
                }
                Ok(Flow::Goto(next)) => {
                    current = next;
                    retries = 0;
                }
                Ok(Flow::Stop) => {
                    self.stop_reason = Some(format!("{current} finished"));
                    return Ok(state);
                }
                Err(err) => return Err(self.fail(&current, err, step_number)),
            }
        }

        if self.ceiling_stops {
            let reason = format!("max_steps ({}) reached", self.max_steps);
            info!(workflow = %self.wf.name(), %reason, "step ceiling reached");
            self.stop_reason = Some(reason);
            return Ok(state);
        }
        let err = StepError::other(format!(
            "max_steps exceeded (possible infinite loop) in workflow {}",
            self.wf.name()
        ));
        Err(self.fail(&current, err, self.max_steps))
    }

    fn flow(&self, current: &str, outcome: Outcome, retries: usize) -> Result<Flow, StepError> {
        match outcome {
            Outcome::Done => Ok(Flow::Stop),
            Outcome::Fail(msg) => Err(StepError::Failed(msg)),
            Outcome::Next(target) if self.wf.contains(&target) => Ok(Flow::Goto(target)),
            Outcome::Next(target) => Err(StepError::invalid(format!(
                "step '{current}' routed to unknown step '{target}'"
            ))),
            Outcome::Continue => self
                .wf
                .route_from(current)
                .map(|to| Flow::Goto(to.to_string()))
                .ok_or_else(|| {
                    StepError::other(format!(
                        "step '{current}' returned Continue but no default next step is configured"
                    ))
                }),
            Outcome::Retry(hint) if retries >= self.max_retries => Err(StepError::other(format!(
                "step '{current}' exceeded max retries ({}): {}",
                self.max_retries, hint.reason
            ))),
            Outcome::Wait(_) if retries >= self.max_retries => Err(StepError::other(format!(
                "step '{current}' exceeded max retries ({}) while waiting",
                self.max_retries
            ))),
            Outcome::Retry(hint) => {
                debug!(agent = current, reason = %hint.reason, "retrying step");
                Ok(Flow::Stay(None))
            }
            Outcome::Wait(pause) => Ok(Flow::Stay(Some(pause))),
        }
    }

    fn delay_for(&self, attempt: usize) -> Duration {
        let doublings = attempt.saturating_sub(1).min(16) as u32;
        self.backoff.saturating_mul(1 << doublings)
    }

    fn fail(&mut self, agent: &str, error: StepError, step_number: usize) -> StepError {
        let event = ErrorEvent {
            agent,
            error: &error,
            step_number,
        };
        for hook in &mut self.on_error {
            hook(&event);
        }
        error
    }
}
