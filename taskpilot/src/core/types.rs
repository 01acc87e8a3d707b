//! Shared deterministic types for core logic.
//!
//! These types are computed fresh on every query and never persisted.

use serde::Serialize;

/// What a readiness check inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckKind {
    Input,
    Spec,
    Scope,
}

impl CheckKind {
    /// Whether a failure of this kind blocks the task.
    ///
    /// Scope is advisory; inputs and specs are prerequisites.
    pub fn is_blocking(self) -> bool {
        match self {
            CheckKind::Input | CheckKind::Spec => true,
            CheckKind::Scope => false,
        }
    }
}

/// One named pass/fail check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadinessCheck {
    pub kind: CheckKind,
    /// The declared path or reference that was checked.
    pub name: String,
    pub passed: bool,
    pub message: String,
}

impl ReadinessCheck {
    pub fn blocking(&self) -> bool {
        !self.passed && self.kind.is_blocking()
    }
}

/// Outcome of evaluating a task's preconditions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadinessResult {
    pub ready: bool,
    pub checks: Vec<ReadinessCheck>,
}

impl ReadinessResult {
    pub fn failures(&self) -> impl Iterator<Item = &ReadinessCheck> {
        self.checks.iter().filter(|check| !check.passed)
    }
}
