//! Readiness gate: evaluate a task's declared prerequisites.
//!
//! Evaluation is pure over a [`ReadinessProbe`]; the filesystem-backed probe
//! lives in `io::probe`.

use crate::core::types::{CheckKind, ReadinessCheck, ReadinessResult};
use crate::task::Task;

/// Answers the questions the readiness gate asks about the outside world.
pub trait ReadinessProbe {
    /// Whether a required input path exists.
    fn input_exists(&self, path: &str) -> bool;
    /// Whether a spec reference resolves. `Err` carries a reason for the check message.
    fn spec_resolves(&self, reference: &str) -> Result<bool, String>;
    /// Whether a scope path is an existing directory.
    fn scope_is_dir(&self, path: &str) -> bool;
}

/// Evaluate inputs, then specs, then scopes, in declaration order.
///
/// `ready` is false iff an input or spec check failed. Scope failures are
/// reported but never block.
pub fn evaluate_readiness<P: ReadinessProbe + ?Sized>(task: &Task, probe: &P) -> ReadinessResult {
    let mut checks = Vec::new();

    for input in &task.inputs {
        let passed = probe.input_exists(input);
        checks.push(ReadinessCheck {
            kind: CheckKind::Input,
            name: input.clone(),
            passed,
            message: if passed {
                format!("input {input} exists")
            } else {
                format!("missing input {input}")
            },
        });
    }

    for spec in &task.specs {
        let (passed, message) = match probe.spec_resolves(spec) {
            Ok(true) => (true, format!("spec {spec} resolved")),
            Ok(false) => (false, format!("spec {spec} not found")),
            Err(reason) => (false, format!("spec {spec} unresolved: {reason}")),
        };
        checks.push(ReadinessCheck {
            kind: CheckKind::Spec,
            name: spec.clone(),
            passed,
            message,
        });
    }

    for scope in &task.scope {
        let passed = probe.scope_is_dir(scope);
        checks.push(ReadinessCheck {
            kind: CheckKind::Scope,
            name: scope.clone(),
            passed,
            message: if passed {
                format!("scope {scope} exists")
            } else {
                format!("scope directory {scope} does not exist (advisory)")
            },
        });
    }

    let ready = !checks.iter().any(ReadinessCheck::blocking);
    ReadinessResult { ready, checks }
}
