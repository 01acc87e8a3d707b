//! Classified failures raised by the task lifecycle engine.
//!
//! Functions return `anyhow::Result` and attach path/operation context as the
//! error travels upward. Business-rule violations are raised as a [`FlowError`]
//! so callers can classify them with `err.downcast_ref::<FlowError>()` without
//! string matching.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    /// A task, change, or document that must exist is absent.
    #[error("{what} not found in {location}")]
    NotFound { what: String, location: String },

    /// Duplicate change slug, or an operation that may only run once.
    #[error("{0}")]
    AlreadyExists(String),

    /// Preconditions of a business rule are unmet.
    #[error("{0}")]
    Validation(String),

    /// A persisted document exists but could not be parsed.
    #[error("malformed {path}: {message}")]
    Parse { path: String, message: String },

    /// Orchestrator state machine received an event it does not accept.
    #[error("invalid transition: {event} in state {state}")]
    InvalidTransition { state: String, event: String },

    /// The autopilot observed the cancellation flag.
    #[error("cancelled")]
    Cancelled,

    /// Persisted state cannot make progress (e.g. empty backlog with work still claimed).
    #[error("inconsistent state: {0}")]
    Inconsistent(String),

    /// An agent backend is declared but has no implementation.
    #[error("agent backend '{0}' is not implemented")]
    NotImplemented(String),
}

impl FlowError {
    pub fn not_found(what: impl Into<String>, location: impl Into<String>) -> Self {
        Self::NotFound {
            what: what.into(),
            location: location.into(),
        }
    }
}

/// Return the [`FlowError`] carried by `err`, if any.
pub fn classify(err: &anyhow::Error) -> Option<&FlowError> {
    err.downcast_ref::<FlowError>()
}
