//! Task collections (`backlog`, `in-progress`, `done`) and the claim protocol.
//!
//! Each collection is one TOML document holding `[[tasks]]`, read and
//! rewritten wholesale on every mutation. A move touches two documents, so it
//! is bracketed by a journal entry (`state/move.json`) that [`TaskStore::recover`]
//! replays after an interrupted move.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::atomic::{read_optional, remove_if_exists, write_atomic, write_json};
use super::init::ProjectPaths;
use crate::core::invariants::validate_collections;
use crate::error::FlowError;
use crate::task::{Collection, Task, TaskStatus};

#[derive(Debug, Default, Serialize, Deserialize)]
struct CollectionDoc {
    #[serde(default)]
    tasks: Vec<Task>,
}

/// Load a collection document. A missing document is an empty collection.
pub fn load_collection(path: &Path) -> Result<Vec<Task>> {
    let Some(contents) = read_optional(path)? else {
        return Ok(Vec::new());
    };
    let doc: CollectionDoc = toml::from_str(&contents).map_err(|err| FlowError::Parse {
        path: path.display().to_string(),
        message: err.to_string(),
    })?;
    Ok(doc.tasks)
}

/// Overwrite a collection document wholesale.
pub fn write_collection(path: &Path, tasks: &[Task]) -> Result<()> {
    let doc = CollectionDoc {
        tasks: tasks.to_vec(),
    };
    let buf = toml::to_string_pretty(&doc).context("serialize task collection")?;
    write_atomic(path, &buf)
}

/// In-flight move, written before the first collection write and removed after the last.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MoveJournal {
    pub task_id: String,
    pub from: Collection,
    pub to: Collection,
    /// The task as it must appear in `to`.
    pub task: Task,
}

/// What [`TaskStore::recover`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Task id of a replayed move, if a journal was found.
    pub replayed: Option<String>,
    /// Invariant violations remaining after recovery.
    pub violations: Vec<String>,
}

/// Per-collection task counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    pub backlog: usize,
    pub in_progress: usize,
    pub done: usize,
}

/// Filesystem-backed task store for one project.
#[derive(Debug, Clone)]
pub struct TaskStore {
    tasks_dir: PathBuf,
    journal_path: PathBuf,
}

impl TaskStore {
    pub fn new(paths: &ProjectPaths) -> Self {
        Self {
            tasks_dir: paths.tasks_dir.clone(),
            journal_path: paths.journal_path.clone(),
        }
    }

    fn path(&self, collection: Collection) -> PathBuf {
        self.tasks_dir.join(format!("{}.toml", collection.name()))
    }

    pub fn load(&self, collection: Collection) -> Result<Vec<Task>> {
        let path = self.path(collection);
        load_collection(&path).with_context(|| format!("load {collection} collection"))
    }

    pub fn save(&self, collection: Collection, tasks: &[Task]) -> Result<()> {
        debug!(%collection, count = tasks.len(), "saving collection");
        write_collection(&self.path(collection), tasks)
            .with_context(|| format!("save {collection} collection"))
    }

    /// Create a pending task at the end of the backlog.
    ///
    /// Ids are `T<yyyymmddHHMMSS>` with a numeric suffix when that id is taken
    /// anywhere in the store, so several tasks created within one second
    /// stay distinct.
    pub fn create_task(&self, title: &str) -> Result<Task> {
        let mut backlog = self.load(Collection::Backlog)?;
        let mut taken = self.all_ids()?;
        for task in &backlog {
            collect_ids(task, &mut taken);
        }

        let base = format!("T{}", Utc::now().format("%Y%m%d%H%M%S"));
        let mut id = base.clone();
        let mut suffix = 1u32;
        while taken.iter().any(|existing| existing == &id) {
            suffix += 1;
            id = format!("{base}-{suffix}");
        }

        let task = Task {
            status: TaskStatus::Pending,
            ..Task::new(id, title.trim())
        };
        backlog.push(task.clone());
        self.save(Collection::Backlog, &backlog)?;
        info!(task_id = %task.id, title = %task.title, "task created");
        Ok(task)
    }

    /// Replace the task with the same id in `collection`.
    pub fn update(&self, collection: Collection, task: &Task) -> Result<()> {
        let mut tasks = self.load(collection)?;
        let slot = tasks
            .iter_mut()
            .find(|existing| existing.id == task.id)
            .ok_or_else(|| FlowError::not_found(format!("task {}", task.id), collection.name()))?;
        *slot = task.clone();
        self.save(collection, &tasks)
    }

    /// Move a task from the backlog to in-progress and record its owner.
    pub fn claim(&self, id: &str, owner: &str) -> Result<Task> {
        let task = self.relocate(id, Collection::Backlog, Collection::InProgress, |task| {
            task.status = TaskStatus::InProgress;
            task.owner = owner.to_string();
        })?;
        info!(task_id = %id, %owner, "task claimed");
        Ok(task)
    }

    /// Move a task from in-progress to done.
    pub fn complete(&self, id: &str) -> Result<Task> {
        let task = self.move_task(id, Collection::InProgress, Collection::Done, TaskStatus::Done)?;
        info!(task_id = %id, "task completed");
        Ok(task)
    }

    /// Move a task between collections, setting `status`. Every other field is preserved.
    pub fn move_task(
        &self,
        id: &str,
        from: Collection,
        to: Collection,
        status: TaskStatus,
    ) -> Result<Task> {
        self.relocate(id, from, to, |task| task.status = status)
    }

    fn relocate<F>(&self, id: &str, from: Collection, to: Collection, mutate: F) -> Result<Task>
    where
        F: FnOnce(&mut Task),
    {
        let mut source = self.load(from)?;
        let index = source
            .iter()
            .position(|task| task.id == id)
            .ok_or_else(|| FlowError::not_found(format!("task {id}"), from.name()))?;
        if from != to && self.load(to)?.iter().any(|existing| existing.id == id) {
            warn!(task_id = %id, %from, %to, "refusing move onto a duplicate id");
            return Err(FlowError::AlreadyExists(format!("task {id} is already in {to}")).into());
        }
        let mut task = source.remove(index);
        mutate(&mut task);

        let journal = MoveJournal {
            task_id: id.to_string(),
            from,
            to,
            task: task.clone(),
        };
        write_json(&self.journal_path, &journal).context("write move journal")?;

        self.save(from, &source)?;
        let mut target = self.load(to)?;
        target.push(task.clone());
        self.save(to, &target)?;

        remove_if_exists(&self.journal_path).context("clear move journal")?;
        debug!(task_id = %id, %from, %to, status = %task.status, "task moved");
        Ok(task)
    }

    /// Find a task (or sub-task) by id, scanning backlog, in-progress, then done.
    pub fn find(&self, id: &str) -> Result<Option<(Task, Collection)>> {
        for collection in Collection::ALL {
            for task in self.load(collection)? {
                if let Some(found) = task.find(id) {
                    return Ok(Some((found.clone(), collection)));
                }
            }
        }
        Ok(None)
    }

    pub fn summary(&self) -> Result<StatusSummary> {
        Ok(StatusSummary {
            backlog: self.load(Collection::Backlog)?.len(),
            in_progress: self.load(Collection::InProgress)?.len(),
            done: self.load(Collection::Done)?.len(),
        })
    }

    /// Report duplicate ids and status/collection disagreement. Never repairs.
    pub fn check_invariants(&self) -> Result<Vec<String>> {
        let backlog = self.load(Collection::Backlog)?;
        let in_progress = self.load(Collection::InProgress)?;
        let done = self.load(Collection::Done)?;
        Ok(validate_collections(&[
            (Collection::Backlog, backlog.as_slice()),
            (Collection::InProgress, in_progress.as_slice()),
            (Collection::Done, done.as_slice()),
        ]))
    }

    /// Finish a move interrupted between its two writes, then re-check invariants.
    pub fn recover(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        if let Some(contents) = read_optional(&self.journal_path)? {
            let journal: MoveJournal = serde_json::from_str(&contents).map_err(|err| {
                FlowError::Parse {
                    path: self.journal_path.display().to_string(),
                    message: err.to_string(),
                }
            })?;
            warn!(task_id = %journal.task_id, from = %journal.from, to = %journal.to, "replaying interrupted move");

            let mut source = self.load(journal.from)?;
            let before = source.len();
            source.retain(|task| task.id != journal.task_id);
            if source.len() != before {
                self.save(journal.from, &source)?;
            }

            let mut target = self.load(journal.to)?;
            if !target.iter().any(|task| task.id == journal.task_id) {
                target.push(journal.task.clone());
                self.save(journal.to, &target)?;
            }

            remove_if_exists(&self.journal_path).context("clear move journal")?;
            report.replayed = Some(journal.task_id);
        }
        report.violations = self.check_invariants()?;
        for violation in &report.violations {
            warn!(%violation, "task store invariant violated");
        }
        Ok(report)
    }

    fn all_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for collection in [Collection::InProgress, Collection::Done] {
            for task in self.load(collection)? {
                collect_ids(&task, &mut ids);
            }
        }
        Ok(ids)
    }
}

fn collect_ids(task: &Task, ids: &mut Vec<String>) {
    ids.push(task.id.clone());
    for sub in &task.subtasks {
        collect_ids(sub, ids);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::classify;
    use crate::io::init::{InitOptions, init_project};
    use std::fs;

    fn store() -> (tempfile::TempDir, TaskStore, ProjectPaths) {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_project(temp.path(), &InitOptions { force: false }).expect("init");
        (temp, TaskStore::new(&paths), paths)
    }

    #[test]
    fn missing_document_is_empty_collection() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tasks = load_collection(&temp.path().join("nope.toml")).expect("load");
        assert!(tasks.is_empty());
    }

    #[test]
    fn malformed_document_is_parse_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("backlog.toml");
        fs::write(&path, "[[tasks]]\nid = \n").expect("write");

        let err = load_collection(&path).unwrap_err();
        assert!(matches!(classify(&err), Some(FlowError::Parse { .. })));
    }

    #[test]
    fn create_task_generates_unique_ids() {
        let (_temp, store, _) = store();
        let a = store.create_task("first").expect("create");
        let b = store.create_task("second").expect("create");
        let c = store.create_task("third").expect("create");

        assert_ne!(a.id, b.id);
        assert_ne!(b.id, c.id);
        assert_ne!(a.id, c.id);
        let backlog = store.load(Collection::Backlog).expect("load");
        assert_eq!(backlog.len(), 3);
        assert!(backlog.iter().all(|t| t.status == TaskStatus::Pending));
    }

    #[test]
    fn claim_moves_task_and_preserves_fields() {
        let (_temp, store, _) = store();
        let mut task = store.create_task("claim me").expect("create");
        task.description = "details".to_string();
        task.scope = vec!["src".to_string()];
        task.acceptance = vec!["works".to_string()];
        store.update(Collection::Backlog, &task).expect("update");

        let claimed = store.claim(&task.id, "alice").expect("claim");

        assert!(store.load(Collection::Backlog).expect("load").is_empty());
        let in_progress = store.load(Collection::InProgress).expect("load");
        assert_eq!(in_progress, vec![claimed.clone()]);
        assert_eq!(claimed.status, TaskStatus::InProgress);
        assert_eq!(claimed.owner, "alice");
        let expected = Task {
            status: TaskStatus::InProgress,
            owner: "alice".to_string(),
            ..task
        };
        assert_eq!(claimed, expected);
    }

    #[test]
    fn claim_outside_backlog_errors() {
        let (_temp, store, _) = store();
        let task = store.create_task("t").expect("create");
        store.claim(&task.id, "a").expect("claim");

        let err = store.claim(&task.id, "b").unwrap_err();
        assert!(err.to_string().contains("not found in backlog"));
    }

    #[test]
    fn move_onto_duplicate_id_is_refused_and_nothing_is_written() {
        let (_temp, store, paths) = store();
        let queued = Task::new("T1", "queued");
        let running = Task {
            status: TaskStatus::InProgress,
            owner: "bob".to_string(),
            ..Task::new("T1", "running")
        };
        store.save(Collection::Backlog, &[queued.clone()]).expect("seed backlog");
        store
            .save(Collection::InProgress, &[running.clone()])
            .expect("seed in-progress");

        let err = store.claim("T1", "alice").unwrap_err();

        assert!(matches!(classify(&err), Some(FlowError::AlreadyExists(_))));
        assert_eq!(store.load(Collection::Backlog).expect("load"), vec![queued]);
        assert_eq!(store.load(Collection::InProgress).expect("load"), vec![running]);
        assert!(!paths.journal_path.exists());
        assert_eq!(store.check_invariants().expect("invariants").len(), 1);
    }

    #[test]
    fn move_there_and_back_round_trips() {
        let (_temp, store, _) = store();
        let original = store.create_task("round trip").expect("create");

        store
            .move_task(&original.id, Collection::Backlog, Collection::Done, TaskStatus::Done)
            .expect("move");
        let back = store
            .move_task(&original.id, Collection::Done, Collection::Backlog, TaskStatus::Pending)
            .expect("move back");

        assert_eq!(back, original);
        let err = store
            .move_task(&original.id, Collection::Done, Collection::Backlog, TaskStatus::Pending)
            .unwrap_err();
        assert!(err.to_string().contains("not found in done"));
    }

    #[test]
    fn find_reports_collection_and_subtasks() {
        let (_temp, store, _) = store();
        let mut parent = store.create_task("parent").expect("create");
        parent.subtasks.push(Task::new("sub-1", "child"));
        store.update(Collection::Backlog, &parent).expect("update");
        store.claim(&parent.id, "me").expect("claim");

        let (found, collection) = store.find("sub-1").expect("find").expect("present");
        assert_eq!(found.title, "child");
        assert_eq!(collection, Collection::InProgress);
        assert!(store.find("missing").expect("find").is_none());
    }

    #[test]
    fn recover_finishes_move_lost_between_writes() {
        let (_temp, store, paths) = store();
        let task = store.create_task("lost").expect("create");
        // Simulate a crash after the backlog write: journal present, task in neither collection.
        let claimed = Task {
            status: TaskStatus::InProgress,
            owner: "bob".to_string(),
            ..task.clone()
        };
        write_json(
            &paths.journal_path,
            &MoveJournal {
                task_id: task.id.clone(),
                from: Collection::Backlog,
                to: Collection::InProgress,
                task: claimed.clone(),
            },
        )
        .expect("journal");
        store.save(Collection::Backlog, &[]).expect("save");

        let report = store.recover().expect("recover");

        assert_eq!(report.replayed.as_deref(), Some(task.id.as_str()));
        assert!(report.violations.is_empty());
        assert_eq!(store.load(Collection::InProgress).expect("load"), vec![claimed]);
        assert!(!paths.journal_path.exists());
    }

    #[test]
    fn recover_removes_duplicate_left_in_source() {
        let (_temp, store, paths) = store();
        let task = store.create_task("dup").expect("create");
        let done = Task {
            status: TaskStatus::Done,
            ..task.clone()
        };
        write_json(
            &paths.journal_path,
            &MoveJournal {
                task_id: task.id.clone(),
                from: Collection::Backlog,
                to: Collection::Done,
                task: done.clone(),
            },
        )
        .expect("journal");
        store.save(Collection::Done, &[done]).expect("save");

        let report = store.recover().expect("recover");

        assert!(report.violations.is_empty(), "{:?}", report.violations);
        assert!(store.load(Collection::Backlog).expect("load").is_empty());
        assert_eq!(store.summary().expect("summary").done, 1);
    }
}
