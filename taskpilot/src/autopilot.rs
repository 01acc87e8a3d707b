//! Autopilot loop: select, claim and prepare backlog tasks.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::core::readiness::{ReadinessProbe, evaluate_readiness};
use crate::core::selector::select_candidate;
use crate::core::types::ReadinessResult;
use crate::error::FlowError;
use crate::io::config::AutopilotSettings;
use crate::io::context::{ContextGenerator, ContextRecord};
use crate::io::task_store::TaskStore;
use crate::task::{Collection, Task};

/// Budget used when the configured one is not positive.
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutopilotOptions {
    /// Non-positive values fall back to [`DEFAULT_MAX_ITERATIONS`].
    pub max_iterations: i64,
    pub dry_run: bool,
    pub owner: String,
}

impl AutopilotOptions {
    pub fn from_settings(settings: &AutopilotSettings) -> Self {
        Self {
            max_iterations: settings.max_iterations,
            dry_run: settings.dry_run,
            owner: settings.owner.clone(),
        }
    }

    pub fn budget(&self) -> u32 {
        if self.max_iterations <= 0 {
            DEFAULT_MAX_ITERATIONS
        } else {
            u32::try_from(self.max_iterations).unwrap_or(u32::MAX)
        }
    }
}

/// Reason why [`run_autopilot`] stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutopilotStop {
    /// The backlog is empty.
    Complete,
    /// Dry run: the task that would have been claimed next.
    DryRun { task_id: String, ready: bool },
    /// The iteration budget ran out with work left in the backlog.
    MaxIterations { max_iterations: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutopilotOutcome {
    pub iterations: u32,
    /// Tasks claimed by this run, in claim order.
    pub claimed: Vec<String>,
    pub stop: AutopilotStop,
}

/// A claimed task handed to the caller for execution.
#[derive(Debug, Clone)]
pub struct ReadyTask {
    pub task: Task,
    pub readiness: ReadinessResult,
    pub contexts: Vec<ContextRecord>,
}

/// Repeatedly claim the next backlog task until the backlog is empty, the
/// budget runs out, or `cancel` is set.
///
/// Candidates are the first fully ready backlog task, else the first backlog
/// task. Claim and context failures are logged and the loop moves on.
/// `on_ready` runs once per claimed task; its errors end the run.
///
/// An empty backlog while any task is still in progress is reported as
/// [`FlowError::Inconsistent`].
/// Callers that want a clean stop must move each claimed task out of
/// in-progress from `on_ready`.
pub fn run_autopilot<P, C, F>(
    store: &TaskStore,
    probe: &P,
    contexts: &C,
    options: &AutopilotOptions,
    cancel: &AtomicBool,
    mut on_ready: F,
) -> Result<AutopilotOutcome>
where
    P: ReadinessProbe + ?Sized,
    C: ContextGenerator + ?Sized,
    F: FnMut(&ReadyTask) -> Result<()>,
{
    let max_iterations = options.budget();
    let mut outcome = AutopilotOutcome {
        iterations: 0,
        claimed: Vec::new(),
        stop: AutopilotStop::MaxIterations { max_iterations },
    };

    while outcome.iterations < max_iterations {
        if cancel.load(Ordering::SeqCst) {
            warn!(iterations = outcome.iterations, "autopilot cancelled");
            return Err(FlowError::Cancelled.into());
        }
        outcome.iterations += 1;

        let backlog = store.load(Collection::Backlog)?;
        let Some(candidate) =
            select_candidate(&backlog, |task| evaluate_readiness(task, probe).ready)
        else {
            ensure_nothing_stranded(store)?;
            info!(iterations = outcome.iterations, claimed = outcome.claimed.len(), "backlog empty");
            outcome.stop = AutopilotStop::Complete;
            return Ok(outcome);
        };
        let readiness = evaluate_readiness(candidate, probe);
        if !readiness.ready {
            let reasons: Vec<&str> = readiness.failures().map(|c| c.message.as_str()).collect();
            warn!(task_id = %candidate.id, ?reasons, "no ready task; falling back to first in backlog");
        }

        if options.dry_run {
            info!(task_id = %candidate.id, ready = readiness.ready, "dry run: next candidate");
            outcome.stop = AutopilotStop::DryRun {
                task_id: candidate.id.clone(),
                ready: readiness.ready,
            };
            return Ok(outcome);
        }

        let task = match store.claim(&candidate.id, &options.owner) {
            Ok(task) => task,
            Err(err) => {
                warn!(task_id = %candidate.id, error = %format!("{err:#}"), "claim failed; continuing");
                continue;
            }
        };

        let mut records = Vec::new();
        for scope in &task.scope {
            match contexts.generate(scope) {
                Ok(record) => records.push(record),
                Err(err) => {
                    warn!(task_id = %task.id, %scope, error = %format!("{err:#}"), "context generation failed");
                }
            }
        }

        outcome.claimed.push(task.id.clone());
        info!(task_id = %task.id, title = %task.title, contexts = records.len(), "task ready for execution");
        on_ready(&ReadyTask {
            task,
            readiness,
            contexts: records,
        })?;
    }

    if store.load(Collection::Backlog)?.is_empty() {
        ensure_nothing_stranded(store)?;
        outcome.stop = AutopilotStop::Complete;
    } else {
        warn!(max_iterations, "autopilot iteration budget exhausted");
    }
    Ok(outcome)
}

fn ensure_nothing_stranded(store: &TaskStore) -> Result<()> {
    let stranded: Vec<String> = store
        .load(Collection::InProgress)?
        .into_iter()
        .map(|task| task.id)
        .collect();
    if stranded.is_empty() {
        return Ok(());
    }
    debug!(?stranded, "in-progress tasks with empty backlog");
    Err(FlowError::Inconsistent(format!(
        "backlog is empty but {} task(s) remain in progress: {}",
        stranded.len(),
        stranded.join(", ")
    ))
    .into())
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::error::classify;
    use crate::task::TaskStatus;
    use crate::test_support::{
        RecordingContextGenerator, StaticProbe, TestProject, task, task_with_input, task_with_scope,
    };

    fn options(max_iterations: i64) -> AutopilotOptions {
        AutopilotOptions {
            max_iterations,
            dry_run: false,
            owner: "autopilot".to_string(),
        }
    }

    #[test]
    fn claims_every_task_then_completes() {
        let project = TestProject::new().expect("project");
        project
            .seed_backlog(&[task("T1"), task("T2")])
            .expect("seed");
        let store = project.store();
        let mut seen = Vec::new();

        let outcome = run_autopilot(
            &store,
            &StaticProbe::default(),
            &RecordingContextGenerator::default(),
            &options(10),
            &AtomicBool::new(false),
            |ready| {
                assert_eq!(ready.task.owner, "autopilot");
                seen.push(ready.task.id.clone());
                store.complete(&ready.task.id).map(|_| ())
            },
        )
        .expect("autopilot");

        assert_eq!(outcome.stop, AutopilotStop::Complete);
        assert_eq!(outcome.iterations, 3);
        assert_eq!(outcome.claimed, vec!["T1", "T2"]);
        assert_eq!(seen, outcome.claimed);
        assert_eq!(store.load(Collection::Done).expect("load").len(), 2);
    }

    #[test]
    fn claimed_work_left_in_progress_is_inconsistent() {
        let project = TestProject::new().expect("project");
        project.seed_backlog(&[task("T1")]).expect("seed");

        let err = run_autopilot(
            &project.store(),
            &StaticProbe::default(),
            &RecordingContextGenerator::default(),
            &options(10),
            &AtomicBool::new(false),
            |_| Ok(()),
        )
        .unwrap_err();

        assert!(matches!(classify(&err), Some(FlowError::Inconsistent(_))));
        let in_progress = project.store().load(Collection::InProgress).expect("load");
        assert_eq!(in_progress.len(), 1);
    }

    #[test]
    fn prefers_ready_task_over_backlog_order() {
        let project = TestProject::new().expect("project");
        project
            .seed_backlog(&[task_with_input("T1", "missing.txt"), task("T2")])
            .expect("seed");
        let mut opts = options(10);
        opts.dry_run = true;

        let outcome = run_autopilot(
            &project.store(),
            &StaticProbe::default(),
            &RecordingContextGenerator::default(),
            &opts,
            &AtomicBool::new(false),
            |_| Ok(()),
        )
        .expect("autopilot");

        assert_eq!(
            outcome.stop,
            AutopilotStop::DryRun {
                task_id: "T2".to_string(),
                ready: true
            }
        );
        assert!(outcome.claimed.is_empty());
        assert_eq!(project.store().load(Collection::Backlog).expect("load").len(), 2);
    }

    #[test]
    fn falls_back_to_first_task_when_none_ready() {
        let project = TestProject::new().expect("project");
        project
            .seed_backlog(&[task_with_input("T1", "a"), task_with_input("T2", "b")])
            .expect("seed");

        let outcome = run_autopilot(
            &project.store(),
            &StaticProbe::default(),
            &RecordingContextGenerator::default(),
            &options(1),
            &AtomicBool::new(false),
            |_| Ok(()),
        )
        .expect("autopilot");

        assert_eq!(outcome.claimed, vec!["T1"]);
        assert_eq!(outcome.stop, AutopilotStop::MaxIterations { max_iterations: 1 });
    }

    #[test]
    fn context_failures_do_not_stop_the_run() {
        let project = TestProject::new().expect("project");
        project
            .seed_backlog(&[task_with_scope("T1", &["src", "web"])])
            .expect("seed");
        let contexts = RecordingContextGenerator::failing_for(&["src"]);
        let store = project.store();
        let mut records = 0;

        let outcome = run_autopilot(
            &store,
            &StaticProbe::default(),
            &contexts,
            &options(5),
            &AtomicBool::new(false),
            |ready| {
                records = ready.contexts.len();
                store.complete(&ready.task.id).map(|_| ())
            },
        )
        .expect("autopilot");

        assert_eq!(outcome.stop, AutopilotStop::Complete);
        assert_eq!(contexts.calls(), vec!["src", "web"]);
        assert_eq!(records, 1);
    }

    #[test]
    fn satisfied_inputs_make_a_task_ready() {
        let project = TestProject::new().expect("project");
        project
            .seed_backlog(&[task_with_input("T1", "missing.txt"), task_with_input("T2", "in.txt")])
            .expect("seed");
        let mut opts = options(10);
        opts.dry_run = true;

        let outcome = run_autopilot(
            &project.store(),
            &StaticProbe::with_inputs(&["in.txt"]),
            &RecordingContextGenerator::default(),
            &opts,
            &AtomicBool::new(false),
            |_| Ok(()),
        )
        .expect("autopilot");

        assert_eq!(
            outcome.stop,
            AutopilotStop::DryRun {
                task_id: "T2".to_string(),
                ready: true
            }
        );
    }

    /// Removes the first task it is asked about from the backlog, so the
    /// following claim finds nothing.
    struct VanishingProbe {
        store: TaskStore,
        fired: Cell<bool>,
    }

    impl ReadinessProbe for VanishingProbe {
        fn input_exists(&self, _path: &str) -> bool {
            if !self.fired.replace(true) {
                let mut backlog = self.store.load(Collection::Backlog).expect("load");
                backlog.remove(0);
                self.store.save(Collection::Backlog, &backlog).expect("save");
            }
            true
        }

        fn spec_resolves(&self, _reference: &str) -> Result<bool, String> {
            Ok(true)
        }

        fn scope_is_dir(&self, _path: &str) -> bool {
            true
        }
    }

    #[test]
    fn claim_failure_consumes_an_iteration_and_continues() {
        let project = TestProject::new().expect("project");
        project
            .seed_backlog(&[task_with_input("T1", "a"), task("T2")])
            .expect("seed");
        let store = project.store();
        let probe = VanishingProbe {
            store: project.store(),
            fired: Cell::new(false),
        };

        let outcome = run_autopilot(
            &store,
            &probe,
            &RecordingContextGenerator::default(),
            &options(10),
            &AtomicBool::new(false),
            |ready| store.complete(&ready.task.id).map(|_| ()),
        )
        .expect("autopilot");

        assert_eq!(outcome.claimed, vec!["T2"]);
        assert_eq!(outcome.iterations, 3);
        assert_eq!(outcome.stop, AutopilotStop::Complete);
    }

    #[test]
    fn claim_failure_still_spends_budget() {
        let project = TestProject::new().expect("project");
        project
            .seed_backlog(&[task_with_input("T1", "a"), task("T2")])
            .expect("seed");
        let store = project.store();
        let probe = VanishingProbe {
            store: project.store(),
            fired: Cell::new(false),
        };

        let outcome = run_autopilot(
            &store,
            &probe,
            &RecordingContextGenerator::default(),
            &options(1),
            &AtomicBool::new(false),
            |_| panic!("nothing should be claimed"),
        )
        .expect("autopilot");

        assert!(outcome.claimed.is_empty());
        assert_eq!(outcome.stop, AutopilotStop::MaxIterations { max_iterations: 1 });
        assert_eq!(store.load(Collection::Backlog).expect("load"), vec![task("T2")]);
    }

    #[test]
    fn cancellation_is_checked_first() {
        let project = TestProject::new().expect("project");
        project.seed_backlog(&[task("T1")]).expect("seed");

        let err = run_autopilot(
            &project.store(),
            &StaticProbe::default(),
            &RecordingContextGenerator::default(),
            &options(5),
            &AtomicBool::new(true),
            |_| Ok(()),
        )
        .unwrap_err();

        assert_eq!(classify(&err), Some(&FlowError::Cancelled));
        assert_eq!(project.store().load(Collection::Backlog).expect("load").len(), 1);
    }

    #[test]
    fn empty_backlog_with_stranded_work_is_inconsistent() {
        let project = TestProject::new().expect("project");
        let stranded = Task {
            status: TaskStatus::InProgress,
            ..task("T9")
        };
        project
            .store()
            .save(Collection::InProgress, &[stranded])
            .expect("seed");

        let err = run_autopilot(
            &project.store(),
            &StaticProbe::default(),
            &RecordingContextGenerator::default(),
            &options(5),
            &AtomicBool::new(false),
            |_| Ok(()),
        )
        .unwrap_err();

        assert!(matches!(classify(&err), Some(FlowError::Inconsistent(_))));
    }

    #[test]
    fn non_positive_budget_uses_default() {
        assert_eq!(options(0).budget(), DEFAULT_MAX_ITERATIONS);
        assert_eq!(options(-3).budget(), DEFAULT_MAX_ITERATIONS);
        assert_eq!(options(4).budget(), 4);
    }
}
