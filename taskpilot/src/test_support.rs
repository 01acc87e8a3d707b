//! Test-only helpers: project fixtures and scripted collaborators.

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};

use crate::core::readiness::ReadinessProbe;
use crate::io::context::{ContextGenerator, ContextRecord};
use crate::io::executor::{AgentExecutor, AgentResult};
use crate::io::init::{InitOptions, ProjectPaths, init_project};
use crate::io::task_store::TaskStore;
use crate::io::verify::{Verifier, VerifyOutcome};
use crate::task::{Collection, Task};

/// Initialized project in a temporary directory.
pub struct TestProject {
    _temp: tempfile::TempDir,
    pub paths: ProjectPaths,
}

impl TestProject {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir()?;
        let paths = init_project(temp.path(), &InitOptions { force: false })?;
        Ok(Self { _temp: temp, paths })
    }

    pub fn root(&self) -> &Path {
        &self.paths.root
    }

    pub fn store(&self) -> TaskStore {
        TaskStore::new(&self.paths)
    }

    /// Overwrite the backlog with `tasks`.
    pub fn seed_backlog(&self, tasks: &[Task]) -> Result<()> {
        self.store().save(Collection::Backlog, tasks)
    }
}

/// Pending task with deterministic fields.
pub fn task(id: &str) -> Task {
    Task::new(id, format!("{id} title"))
}

/// Pending task declaring a required input path.
pub fn task_with_input(id: &str, input: &str) -> Task {
    let mut task = task(id);
    task.inputs.push(input.to_string());
    task
}

/// Pending task declaring scope paths.
pub fn task_with_scope(id: &str, scopes: &[&str]) -> Task {
    let mut task = task(id);
    task.scope = scopes.iter().map(|s| (*s).to_string()).collect();
    task
}

/// Executor that replays canned outputs and records every prompt.
pub struct ScriptedExecutor {
    outputs: RefCell<VecDeque<AgentResult>>,
    prompts: RefCell<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new(outputs: Vec<AgentResult>) -> Self {
        Self {
            outputs: RefCell::new(outputs.into()),
            prompts: RefCell::new(Vec::new()),
        }
    }

    /// Successful invocations with the given outputs, 10 tokens each.
    pub fn outputs(outputs: &[&str]) -> Self {
        Self::new(
            outputs
                .iter()
                .map(|output| AgentResult {
                    output: (*output).to_string(),
                    tokens_used: 10,
                    exit_ok: true,
                })
                .collect(),
        )
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }
}

impl AgentExecutor for ScriptedExecutor {
    fn name(&self) -> &str {
        "scripted"
    }

    fn execute(&self, prompt: &str, task: &Task) -> Result<AgentResult> {
        self.prompts.borrow_mut().push(prompt.to_string());
        self.outputs
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted executor exhausted at task {}", task.id))
    }
}

/// Verifier returning canned outcomes in order.
pub struct ScriptedVerifier {
    outcomes: RefCell<VecDeque<VerifyOutcome>>,
}

impl ScriptedVerifier {
    pub fn new(outcomes: Vec<VerifyOutcome>) -> Self {
        Self {
            outcomes: RefCell::new(outcomes.into()),
        }
    }

    /// Passes every time.
    pub fn passing() -> Self {
        Self::new(Vec::new())
    }
}

impl Verifier for ScriptedVerifier {
    fn verify(&self, _task_id: &str) -> Result<VerifyOutcome> {
        Ok(self
            .outcomes
            .borrow_mut()
            .pop_front()
            .unwrap_or(VerifyOutcome::Pass))
    }
}

/// Context generator that records scopes and fails for the configured ones.
#[derive(Default)]
pub struct RecordingContextGenerator {
    pub failing: HashSet<String>,
    calls: RefCell<Vec<String>>,
}

impl RecordingContextGenerator {
    pub fn failing_for(scopes: &[&str]) -> Self {
        Self {
            failing: scopes.iter().map(|s| (*s).to_string()).collect(),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl ContextGenerator for RecordingContextGenerator {
    fn generate(&self, scope: &str) -> Result<ContextRecord> {
        self.calls.borrow_mut().push(scope.to_string());
        if self.failing.contains(scope) {
            return Err(anyhow!("context generation failed for {scope}"));
        }
        Ok(ContextRecord {
            scope: scope.to_string(),
            path: PathBuf::from(format!("context/{scope}.md")),
            files: Vec::new(),
        })
    }
}

/// Probe answering from fixed sets; specs always resolve.
#[derive(Default)]
pub struct StaticProbe {
    pub inputs: HashSet<String>,
    pub scopes: HashSet<String>,
}

impl StaticProbe {
    pub fn with_inputs(inputs: &[&str]) -> Self {
        Self {
            inputs: inputs.iter().map(|s| (*s).to_string()).collect(),
            scopes: HashSet::new(),
        }
    }
}

impl ReadinessProbe for StaticProbe {
    fn input_exists(&self, path: &str) -> bool {
        self.inputs.contains(path)
    }

    fn spec_resolves(&self, _reference: &str) -> Result<bool, String> {
        Ok(true)
    }

    fn scope_is_dir(&self, path: &str) -> bool {
        self.scopes.contains(path)
    }
}
