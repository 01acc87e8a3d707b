//! Execution session for one claimed task.
//!
//! Drives the orchestrator state machine: `TaskStarted` on entry, the first
//! prompt is rendered in `Planning`, then agent iterations run in
//! `Execution` until the stop signal appears. Verification either completes
//! the task (moved to `done`) or sends the session back to `Execution` with
//! the failure log in the next prompt.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use minijinja::context;
use tracing::{debug, info, warn};

use crate::checkpoint::Checkpoint;
use crate::core::checkpoint_policy::CheckpointPolicy;
use crate::core::fsm::{Event, State, StateMachine};
use crate::error::FlowError;
use crate::io::atomic::write_atomic;
use crate::io::checkpoint_store::CheckpointStore;
use crate::io::config::ProjectConfig;
use crate::io::executor::AgentExecutor;
use crate::io::task_store::TaskStore;
use crate::io::templates::Templates;
use crate::io::verify::{Verifier, VerifyOutcome};
use crate::task::Task;

/// Bytes of agent output carried into checkpoints and the next prompt.
const OUTPUT_TAIL_BYTES: usize = 4_000;

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub max_iterations: u32,
    pub stop_signal: String,
    pub token_limit: u64,
    pub policy: CheckpointPolicy,
}

impl SessionConfig {
    pub fn from_config(cfg: &ProjectConfig) -> Self {
        Self {
            max_iterations: cfg.agent.max_iterations.max(1),
            stop_signal: cfg.agent.stop_signal.clone(),
            token_limit: cfg.checkpoint.token_limit,
            policy: cfg.checkpoint.policy(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_config(&ProjectConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStop {
    /// Verification passed and the task moved to `done`.
    Completed,
    /// The iteration budget ran out; the task stays in progress.
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub task_id: String,
    pub stop: SessionStop,
    /// Agent invocations made by this session.
    pub iterations: u32,
    /// Highest iteration number reached, including earlier sessions.
    pub last_iteration: u32,
    pub tokens_used: u64,
    pub checkpoints_saved: u32,
    pub verification_failures: u32,
}

/// Collaborators for a session.
pub struct Session<'a> {
    pub store: &'a TaskStore,
    pub checkpoints: &'a CheckpointStore,
    pub executor: &'a dyn AgentExecutor,
    pub verifier: &'a dyn Verifier,
    pub templates: &'a Templates,
    /// Prompts are written to `<sessions_dir>/<task id>/prompt.md`.
    pub sessions_dir: PathBuf,
    pub config: SessionConfig,
}

impl Session<'_> {
    /// Execute `task`, which must already be in progress.
    ///
    /// Resumes from the task's latest checkpoint when one exists. `cancel` is
    /// polled before every agent invocation.
    pub fn run(&self, task: &Task, cancel: &AtomicBool) -> Result<SessionOutcome> {
        let mut fsm = StateMachine::new();
        fsm.fire(Event::TaskStarted)?;

        let resumed = self.checkpoints.load(&task.id)?;
        let (mut iteration, mut tokens_used, mut previous) = match &resumed {
            Some(checkpoint) => {
                info!(task_id = %task.id, iteration = checkpoint.iteration, "resuming from checkpoint");
                (
                    checkpoint.iteration,
                    checkpoint.tokens_used,
                    Some(checkpoint.output.clone()),
                )
            }
            None => (0, 0, None),
        };
        let mut failure: Option<String> = None;
        let mut outcome = SessionOutcome {
            task_id: task.id.clone(),
            stop: SessionStop::Exhausted,
            iterations: 0,
            last_iteration: iteration,
            tokens_used,
            checkpoints_saved: 0,
            verification_failures: 0,
        };

        let mut prompt = self.render_prompt(task, iteration + 1, previous.as_deref(), None)?;
        fsm.fire(Event::PlanApproved)?;

        while outcome.iterations < self.config.max_iterations {
            if cancel.load(Ordering::SeqCst) {
                warn!(task_id = %task.id, iteration, "session cancelled");
                return Err(FlowError::Cancelled.into());
            }
            iteration += 1;
            outcome.iterations += 1;
            debug!(task_id = %task.id, iteration, state = %fsm.state(), "invoking agent");

            let result = self
                .executor
                .execute(&prompt, task)
                .with_context(|| format!("execute task {} iteration {iteration}", task.id))?;
            tokens_used += result.tokens_used;
            let finished = result.exit_ok && result.output.contains(&self.config.stop_signal);
            let output_tail = tail(&result.output, OUTPUT_TAIL_BYTES).to_string();

            if finished
                || self
                    .config
                    .policy
                    .should_checkpoint(tokens_used, self.config.token_limit, iteration)
            {
                let mut checkpoint = Checkpoint::new(&task.id, iteration, self.executor.name());
                checkpoint.tokens_used = tokens_used;
                checkpoint.output = output_tail.clone();
                if finished {
                    checkpoint.criteria_met = task.acceptance.clone();
                    checkpoint.notes = "stop signal observed".to_string();
                } else {
                    checkpoint.criteria_remaining = task.acceptance.clone();
                }
                if !result.exit_ok {
                    checkpoint.notes = "agent exited unsuccessfully".to_string();
                }
                self.checkpoints.save(&checkpoint)?;
                outcome.checkpoints_saved += 1;
            }

            outcome.last_iteration = iteration;
            outcome.tokens_used = tokens_used;

            if finished {
                fsm.fire(Event::WorkCompleted)?;
                match self.verifier.verify(&task.id)? {
                    VerifyOutcome::Pass => {
                        fsm.fire(Event::VerificationPass)?;
                        self.store.complete(&task.id)?;
                        outcome.stop = SessionStop::Completed;
                        info!(task_id = %task.id, iteration, tokens_used, "task completed");
                        return Ok(outcome);
                    }
                    VerifyOutcome::Fail(log) => {
                        fsm.fire(Event::VerificationFail)?;
                        outcome.verification_failures += 1;
                        warn!(task_id = %task.id, iteration, "verification failed; reworking");
                        failure = Some(tail_owned(log));
                    }
                }
            } else if !result.exit_ok {
                warn!(task_id = %task.id, iteration, "agent exited unsuccessfully");
            }

            previous = Some(output_tail);
            prompt = self.render_prompt(task, iteration + 1, previous.as_deref(), failure.as_deref())?;
        }

        debug_assert_eq!(fsm.state(), State::Execution);
        warn!(task_id = %task.id, iterations = outcome.iterations, "iteration budget exhausted");
        Ok(outcome)
    }

    fn render_prompt(
        &self,
        task: &Task,
        iteration: u32,
        previous: Option<&str>,
        failure: Option<&str>,
    ) -> Result<String> {
        let prompt = self.templates.render(
            "prompt",
            context! {
                task => task,
                iteration => iteration,
                max_iterations => self.config.max_iterations,
                previous => previous.map(str::trim).filter(|s| !s.is_empty()),
                failure => failure.map(str::trim).filter(|s| !s.is_empty()),
                stop_signal => &self.config.stop_signal,
            },
        )?;
        let path = self.sessions_dir.join(&task.id).join("prompt.md");
        write_atomic(&path, &prompt).with_context(|| format!("write prompt {}", path.display()))?;
        Ok(prompt)
    }
}

/// Last `max` bytes of `text`, cut on a char boundary.
fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

fn tail_owned(text: String) -> String {
    if text.len() <= OUTPUT_TAIL_BYTES {
        return text;
    }
    tail(&text, OUTPUT_TAIL_BYTES).to_string()
}
