//! Execution phases of one task session.
//!
//! ```text
//! Idle --TaskStarted--> Planning --PlanApproved--> Execution
//! Execution --WorkCompleted--> Verification
//! Verification --VerificationPass--> Done
//! Verification --VerificationFail--> Execution
//! ```
//!
//! Any pair absent from the table is rejected; `Done` is terminal.

use std::fmt;

use crate::error::FlowError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Planning,
    Execution,
    Verification,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    TaskStarted,
    PlanApproved,
    WorkCompleted,
    VerificationPass,
    VerificationFail,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Look up the transition table.
pub fn next_state(state: State, event: Event) -> Result<State, FlowError> {
    let next = match (state, event) {
        (State::Idle, Event::TaskStarted) => State::Planning,
        (State::Planning, Event::PlanApproved) => State::Execution,
        (State::Execution, Event::WorkCompleted) => State::Verification,
        (State::Verification, Event::VerificationPass) => State::Done,
        (State::Verification, Event::VerificationFail) => State::Execution,
        _ => {
            return Err(FlowError::InvalidTransition {
                state: state.to_string(),
                event: event.to_string(),
            });
        }
    };
    Ok(next)
}

/// State machine instance owned by a single execution session.
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: State,
    history: Vec<(State, Event, State)>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Applied transitions, oldest first.
    pub fn history(&self) -> &[(State, Event, State)] {
        &self.history
    }

    /// Apply `event`. On rejection the current state is unchanged.
    pub fn fire(&mut self, event: Event) -> Result<State, FlowError> {
        let next = next_state(self.state, event)?;
        self.history.push((self.state, event, next));
        self.state = next;
        Ok(next)
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }
}
