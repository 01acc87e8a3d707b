//! Change lifecycle: externally-authored proposals imported into the backlog.
//!
//! A change lives in `.taskpilot/changes/<slug>/` and moves through
//! `draft -> imported -> implemented -> archived`. "Implementing" is never
//! stored; [`ChangeProgress::phase`] derives it from the linked tasks.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use minijinja::context;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::slug::slugify;
use crate::core::task_detail::{TaskDetail, parse_task_detail};
use crate::core::task_list::{TaskEntry, parse_task_list, scan_entries};
use crate::error::FlowError;
use crate::io::atomic::{read_optional, write_atomic};
use crate::io::change_store::{Change, ChangeStatus, ChangeStore};
use crate::io::init::ProjectPaths;
use crate::io::task_store::TaskStore;
use crate::io::templates::Templates;
use crate::task::{Collection, Task};

const PROPOSAL: &str = "proposal.md";
const TASK_LIST: &str = "tasks.md";
const TASK_FILES_DIR: &str = "tasks";
const MARKER: &str = "IMPLEMENTED.md";

/// Result of importing one change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub change_id: String,
    pub task_ids: Vec<String>,
    /// Non-fatal problems, such as a referenced detail file that is missing.
    pub warnings: Vec<String>,
}

/// Result of [`ChangeLifecycle::sync`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub imported: Vec<ImportReport>,
    /// Draft changes whose task list has no entries yet.
    pub skipped: Vec<String>,
    /// `<change>: <error>` for each change whose import failed.
    pub failures: Vec<String>,
}

impl SyncReport {
    pub fn tasks_created(&self) -> usize {
        self.imported.iter().map(|report| report.task_ids.len()).sum()
    }
}

/// Linked task counts by the collection currently holding each task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeProgress {
    pub change_id: String,
    pub status: ChangeStatus,
    pub linked: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub done: usize,
}

impl ChangeProgress {
    /// Stored status, or "implementing" once an imported change has work underway.
    pub fn phase(&self) -> &'static str {
        if self.status == ChangeStatus::Imported && self.in_progress + self.done > 0 {
            "implementing"
        } else {
            self.status.as_str()
        }
    }

    pub fn percent_done(&self) -> f64 {
        if self.linked == 0 {
            return 0.0;
        }
        self.done as f64 / self.linked as f64 * 100.0
    }
}

/// Change operations for one project.
pub struct ChangeLifecycle {
    paths: ProjectPaths,
    tasks: TaskStore,
    changes: ChangeStore,
    templates: Templates,
}

impl ChangeLifecycle {
    pub fn new(paths: &ProjectPaths) -> Result<Self> {
        Ok(Self {
            paths: paths.clone(),
            tasks: TaskStore::new(paths),
            changes: ChangeStore::new(paths),
            templates: Templates::new()?,
        })
    }

    pub fn list(&self) -> Result<Vec<Change>> {
        self.changes.list()
    }

    pub fn get(&self, id: &str) -> Result<Change> {
        self.changes.get(id)
    }

    /// Directory holding the change's documents, following it into the archive.
    pub fn dir_of(&self, change: &Change) -> PathBuf {
        match &change.archived_to {
            Some(archived) => self.paths.root.join(archived),
            None => self.changes.change_dir(&change.id),
        }
    }

    /// Create a draft change with proposal and task-list documents.
    ///
    /// `source`, when given, seeds the proposal body.
    pub fn init(&self, name: &str, source: Option<&Path>) -> Result<Change> {
        let id = slugify(name);
        if id.is_empty() {
            return Err(FlowError::Validation(format!(
                "change name '{name}' has no letters or digits"
            ))
            .into());
        }
        let dir = self.changes.change_dir(&id);
        if self.changes.registry()?.get(&id).is_some() || dir.exists() {
            return Err(FlowError::AlreadyExists(format!("change {id} already exists")).into());
        }

        let source_text = match source {
            Some(path) => Some(
                fs::read_to_string(path)
                    .with_context(|| format!("read source {}", path.display()))?,
            ),
            None => None,
        };
        let name = name.trim();
        let proposal = self.templates.render(
            "proposal",
            context! { name => name, source => source_text.as_deref().map(str::trim) },
        )?;
        let task_list = self.templates.render("tasks", context! { name => name })?;

        fs::create_dir_all(&dir).with_context(|| format!("create directory {}", dir.display()))?;
        write_atomic(&dir.join(PROPOSAL), &proposal)?;
        write_atomic(&dir.join(TASK_LIST), &task_list)?;

        let mut change = Change::new(&id, name);
        change.source = source.map(|path| self.paths.relative(path));
        self.changes.insert(&change)?;
        info!(change = %id, "change initialized");
        Ok(change)
    }

    /// Create one backlog task per task-list entry and mark the change imported.
    ///
    /// Rejected unless the change is a draft.
    pub fn import(&self, id: &str) -> Result<ImportReport> {
        let mut change = self.changes.get(id)?;
        if change.status != ChangeStatus::Draft {
            return Err(FlowError::AlreadyExists(format!(
                "change {id} is already {}; only draft changes can be imported",
                change.status
            ))
            .into());
        }
        let dir = self.dir_of(&change);
        let list_path = dir.join(TASK_LIST);
        let doc = read_optional(&list_path)?.ok_or_else(|| {
            FlowError::not_found(TASK_LIST.to_string(), self.paths.relative(&dir))
        })?;
        let entries =
            parse_task_list(&doc).with_context(|| format!("parse {}", list_path.display()))?;

        let proposal_ref = self.paths.relative(&dir.join(PROPOSAL));
        let mut report = ImportReport {
            change_id: id.to_string(),
            ..ImportReport::default()
        };
        // Resolve every detail document before the first task is written.
        let details: Vec<Option<TaskDetail>> = entries
            .iter()
            .map(|entry| self.load_detail(id, &dir, entry, &mut report.warnings))
            .collect();
        for (entry, detail) in entries.iter().zip(details) {
            let task = self.import_entry(id, &proposal_ref, entry, detail)?;
            report.task_ids.push(task.id);
        }

        change.tasks.extend(report.task_ids.iter().cloned());
        change.advance_to(ChangeStatus::Imported)?;
        self.changes.save(&change)?;
        info!(change = %id, tasks = report.task_ids.len(), "change imported");
        Ok(report)
    }

    /// Read and parse the entry's detail document.
    ///
    /// A missing or unreadable document is a warning; the entry is then
    /// imported with its title only.
    fn load_detail(
        &self,
        change_id: &str,
        dir: &Path,
        entry: &TaskEntry,
        warnings: &mut Vec<String>,
    ) -> Option<TaskDetail> {
        let file = entry.file.as_ref()?;
        let path = dir.join(file);
        let problem = match fs::read_to_string(&path) {
            Ok(doc) => {
                let detail = parse_task_detail(&doc);
                if !detail.unknown_sections.is_empty() {
                    debug!(file = %file, sections = ?detail.unknown_sections, "ignored unknown sections");
                }
                return Some(detail);
            }
            Err(err) if err.kind() == ErrorKind::NotFound => "not found".to_string(),
            Err(err) => format!("unreadable ({err})"),
        };
        let message = format!(
            "task detail {} for '{}' {problem}; imported title only",
            self.paths.relative(&path),
            entry.title
        );
        warn!(change = %change_id, "{message}");
        warnings.push(message);
        None
    }

    fn import_entry(
        &self,
        change_id: &str,
        proposal_ref: &str,
        entry: &TaskEntry,
        detail: Option<TaskDetail>,
    ) -> Result<Task> {
        let mut task = self.tasks.create_task(&entry.title)?;
        task.change = Some(change_id.to_string());
        task.specs = vec![proposal_ref.to_string()];
        if let Some(detail) = detail {
            task.description = detail.merged_description();
            task.acceptance = detail.acceptance;
        }
        self.tasks.update(Collection::Backlog, &task)?;
        Ok(task)
    }

    /// Import every draft change whose task list has entries.
    ///
    /// Failures are collected per change; safe to re-run.
    pub fn sync(&self) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        for change in self.changes.list()? {
            if change.status != ChangeStatus::Draft {
                continue;
            }
            let list_path = self.dir_of(&change).join(TASK_LIST);
            let entries = match read_optional(&list_path) {
                Ok(Some(doc)) => scan_entries(&doc),
                Ok(None) => Vec::new(),
                Err(err) => {
                    report.failures.push(format!("{}: {err:#}", change.id));
                    continue;
                }
            };
            if entries.is_empty() {
                debug!(change = %change.id, "task list empty; skipping");
                report.skipped.push(change.id);
                continue;
            }
            match self.import(&change.id) {
                Ok(imported) => report.imported.push(imported),
                Err(err) => {
                    warn!(change = %change.id, error = %format!("{err:#}"), "import failed");
                    report.failures.push(format!("{}: {err:#}", change.id));
                }
            }
        }
        info!(
            imported = report.imported.len(),
            tasks = report.tasks_created(),
            skipped = report.skipped.len(),
            failed = report.failures.len(),
            "changes synced"
        );
        Ok(report)
    }

    /// Count linked tasks by collection. Tasks found nowhere are not counted.
    pub fn progress(&self, id: &str) -> Result<ChangeProgress> {
        let change = self.changes.get(id)?;
        let mut progress = ChangeProgress {
            change_id: change.id.clone(),
            status: change.status,
            linked: change.tasks.len(),
            pending: 0,
            in_progress: 0,
            done: 0,
        };
        let mut collections = Vec::with_capacity(Collection::ALL.len());
        for collection in Collection::ALL {
            collections.push((collection, self.tasks.load(collection)?));
        }

        for task_id in &change.tasks {
            let holder = collections.iter().find(|(_, tasks)| {
                tasks.iter().any(|task| task.find(task_id).is_some())
            });
            match holder.map(|(collection, _)| *collection) {
                Some(Collection::Backlog) => progress.pending += 1,
                Some(Collection::InProgress) => progress.in_progress += 1,
                Some(Collection::Done) => progress.done += 1,
                None => debug!(change = %id, %task_id, "linked task not found"),
            }
        }
        Ok(progress)
    }

    /// Mark an imported change implemented once every linked task is done.
    pub fn complete(&self, id: &str) -> Result<Change> {
        let progress = self.progress(id)?;
        let unfinished = progress.pending + progress.in_progress;
        if unfinished > 0 {
            return Err(FlowError::Validation(format!(
                "change {id} has {unfinished} unfinished task(s) ({} pending, {} in progress)",
                progress.pending, progress.in_progress
            ))
            .into());
        }
        if progress.done == 0 {
            return Err(
                FlowError::Validation(format!("change {id} has no completed tasks")).into(),
            );
        }

        let mut change = self.changes.get(id)?;
        change.advance_to(ChangeStatus::Implemented)?;
        let marker = self.templates.render(
            "implemented",
            context! {
                name => &change.name,
                completed_at => Utc::now().to_rfc3339(),
                tasks => &change.tasks,
            },
        )?;
        write_atomic(&self.dir_of(&change).join(MARKER), &marker)?;
        self.changes.save(&change)?;
        info!(change = %id, tasks = progress.done, "change implemented");
        Ok(change)
    }

    /// Move an implemented change into `changes/archive/<date>-<slug>/`.
    pub fn archive(&self, id: &str) -> Result<Change> {
        let mut change = self.changes.get(id)?;
        if change.status == ChangeStatus::Archived {
            return Err(FlowError::AlreadyExists(format!("change {id} is already archived")).into());
        }
        let dir = self.dir_of(&change);
        if !dir.join(MARKER).is_file() {
            return Err(FlowError::Validation(format!(
                "change {id} has no {MARKER}; complete it before archiving"
            ))
            .into());
        }

        let dest = self
            .paths
            .archive_dir
            .join(format!("{}-{id}", Utc::now().format("%Y-%m-%d")));
        if dest.exists() {
            return Err(FlowError::AlreadyExists(format!(
                "archive directory {} already exists",
                self.paths.relative(&dest)
            ))
            .into());
        }
        fs::create_dir_all(&self.paths.archive_dir).with_context(|| {
            format!("create directory {}", self.paths.archive_dir.display())
        })?;
        fs::rename(&dir, &dest)
            .with_context(|| format!("move {} to {}", dir.display(), dest.display()))?;

        change.archived_to = Some(self.paths.relative(&dest));
        change.advance_to(ChangeStatus::Archived)?;
        self.changes.save(&change)?;
        info!(change = %id, to = %self.paths.relative(&dest), "change archived");
        Ok(change)
    }

    /// Write `tasks/NN-<slug>.md` detail documents, numbered in input order.
    ///
    /// Existing files are left untouched. Returns every path, written or not.
    pub fn scaffold_task_files(&self, id: &str, titles: &[String]) -> Result<Vec<PathBuf>> {
        let change = self.changes.get(id)?;
        if change.status == ChangeStatus::Archived {
            return Err(FlowError::Validation(format!("change {id} is archived")).into());
        }
        let dir = self.dir_of(&change).join(TASK_FILES_DIR);
        let mut written = Vec::new();
        for (index, title) in titles.iter().enumerate() {
            let number = index + 1;
            let slug = slugify(title);
            let slug = if slug.is_empty() { "task".to_string() } else { slug };
            let path = dir.join(format!("{number:02}-{slug}.md"));
            if path.exists() {
                debug!(path = %path.display(), "task file exists; leaving it");
            } else {
                let doc = self.templates.render(
                    "task_detail",
                    context! { index => number, title => title.trim() },
                )?;
                write_atomic(&path, &doc)?;
            }
            written.push(path);
        }
        info!(change = %id, files = written.len(), "task files scaffolded");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::classify;
    use crate::io::init::{InitOptions, init_project};
    use crate::task::TaskStatus;

    fn project() -> (tempfile::TempDir, ProjectPaths, ChangeLifecycle) {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_project(temp.path(), &InitOptions { force: false }).expect("init");
        let lifecycle = ChangeLifecycle::new(&paths).expect("lifecycle");
        (temp, paths, lifecycle)
    }

    fn write_list(lifecycle: &ChangeLifecycle, id: &str, doc: &str) {
        let dir = lifecycle.changes.change_dir(id);
        fs::write(dir.join(TASK_LIST), doc).expect("write tasks.md");
    }

    #[test]
    fn init_renders_documents_and_rejects_duplicates() {
        let (temp, _paths, lifecycle) = project();
        let source = temp.path().join("idea.md");
        fs::write(&source, "Users cannot log in.\n").expect("write");

        let change = lifecycle.init("Add Login!", Some(&source)).expect("init");

        assert_eq!(change.id, "add-login");
        assert_eq!(change.source.as_deref(), Some("idea.md"));
        let dir = lifecycle.changes.change_dir("add-login");
        let proposal = fs::read_to_string(dir.join(PROPOSAL)).expect("read");
        assert!(proposal.contains("Users cannot log in."));
        assert!(dir.join(TASK_LIST).is_file());

        let err = lifecycle.init("add login", None).unwrap_err();
        assert!(matches!(classify(&err), Some(FlowError::AlreadyExists(_))));
    }

    #[test]
    fn import_merges_detail_documents() {
        let (_temp, paths, lifecycle) = project();
        lifecycle.init("Parser", None).expect("init");
        let dir = lifecycle.changes.change_dir("parser");
        fs::create_dir_all(dir.join("tasks")).expect("mkdir");
        fs::write(
            dir.join("tasks/01-tokenizer.md"),
            "# Tokenizer\n\n## Description\nSplit lines.\n\n## Acceptance Criteria\n- classifies headings\n* classifies lists\n\n## Technical Notes\nNo regex.\n",
        )
        .expect("write");
        write_list(
            &lifecycle,
            "parser",
            "1. **Tokenizer** (ver [detail](tasks/01-tokenizer.md))\n2. Accumulator (ver [detail](tasks/02-missing.md))\n",
        );

        let report = lifecycle.import("parser").expect("import");

        assert_eq!(report.task_ids.len(), 2);
        assert_eq!(report.warnings.len(), 1);
        let store = TaskStore::new(&paths);
        let backlog = store.load(Collection::Backlog).expect("load");
        let first = &backlog[0];
        assert_eq!(first.title, "Tokenizer");
        assert_eq!(first.status, TaskStatus::Pending);
        assert_eq!(first.change.as_deref(), Some("parser"));
        assert_eq!(first.specs, vec![".taskpilot/changes/parser/proposal.md"]);
        assert_eq!(first.acceptance, vec!["classifies headings", "classifies lists"]);
        assert_eq!(first.description, "Split lines.\n\nTechnical Notes:\nNo regex.");
        assert_eq!(backlog[1].title, "Accumulator");
        assert!(backlog[1].description.is_empty());

        let change = lifecycle.get("parser").expect("get");
        assert_eq!(change.status, ChangeStatus::Imported);
        assert_eq!(change.tasks, report.task_ids);
    }

    #[test]
    fn unreadable_detail_imports_title_only_and_sync_stays_idempotent() {
        let (_temp, paths, lifecycle) = project();
        lifecycle.init("Bad Detail", None).expect("init");
        let dir = lifecycle.changes.change_dir("bad-detail");
        fs::create_dir_all(dir.join("tasks/03")).expect("mkdir");
        fs::write(dir.join("tasks/02.md"), [0xff, 0xfe, 0x00]).expect("write");
        write_list(
            &lifecycle,
            "bad-detail",
            "1. First\n2. Second (ver [d](tasks/02.md))\n3. Third (see [d](tasks/03))\n",
        );

        let first = lifecycle.sync().expect("sync");
        let store = TaskStore::new(&paths);
        let after_first = store.load(Collection::Backlog).expect("load");
        let second = lifecycle.sync().expect("sync again");

        assert!(first.failures.is_empty());
        assert_eq!(first.imported[0].warnings.len(), 2);
        assert!(first.imported[0].warnings[0].contains("unreadable"));
        assert_eq!(after_first.len(), 3);
        assert!(after_first[1].description.is_empty());
        assert_eq!(second.tasks_created(), 0);
        assert_eq!(store.load(Collection::Backlog).expect("load"), after_first);
        assert_eq!(
            lifecycle.get("bad-detail").expect("get").status,
            ChangeStatus::Imported
        );
    }

    #[test]
    fn reimport_is_rejected_without_creating_tasks() {
        let (_temp, paths, lifecycle) = project();
        lifecycle.init("Once", None).expect("init");
        write_list(&lifecycle, "once", "- [ ] only task\n");
        lifecycle.import("once").expect("import");

        let err = lifecycle.import("once").unwrap_err();

        assert!(matches!(classify(&err), Some(FlowError::AlreadyExists(_))));
        let backlog = TaskStore::new(&paths).load(Collection::Backlog).expect("load");
        assert_eq!(backlog.len(), 1);
    }

    #[test]
    fn import_of_template_only_list_errors() {
        let (_temp, _paths, lifecycle) = project();
        lifecycle.init("Empty", None).expect("init");
        let err = lifecycle.import("empty").unwrap_err();
        assert!(matches!(classify(&err), Some(FlowError::Validation(_))));
        assert_eq!(lifecycle.get("empty").expect("get").status, ChangeStatus::Draft);
    }

    #[test]
    fn sync_skips_empty_lists_and_is_idempotent() {
        let (_temp, paths, lifecycle) = project();
        lifecycle.init("Ready", None).expect("init");
        lifecycle.init("Later", None).expect("init");
        write_list(&lifecycle, "ready", "1. First\n2. Second\n");

        let first = lifecycle.sync().expect("sync");
        let store = TaskStore::new(&paths);
        let after_first = store.load(Collection::Backlog).expect("load");
        let second = lifecycle.sync().expect("sync again");

        assert_eq!(first.tasks_created(), 2);
        assert_eq!(first.skipped, vec!["later"]);
        assert_eq!(second.tasks_created(), 0);
        assert_eq!(store.load(Collection::Backlog).expect("load"), after_first);
    }

    #[test]
    fn complete_requires_all_tasks_done() {
        let (_temp, paths, lifecycle) = project();
        lifecycle.init("Ship", None).expect("init");
        write_list(&lifecycle, "ship", "1. Build\n");
        let report = lifecycle.import("ship").expect("import");
        let task_id = &report.task_ids[0];
        let store = TaskStore::new(&paths);

        let err = lifecycle.complete("ship").unwrap_err();
        assert!(err.to_string().contains("1 pending"));

        store.claim(task_id, "me").expect("claim");
        let progress = lifecycle.progress("ship").expect("progress");
        assert_eq!(progress.phase(), "implementing");
        assert!(lifecycle.complete("ship").is_err());

        store.complete(task_id).expect("complete task");
        let change = lifecycle.complete("ship").expect("complete change");
        assert_eq!(change.status, ChangeStatus::Implemented);
        assert!(lifecycle.changes.change_dir("ship").join(MARKER).is_file());
        assert_eq!(lifecycle.progress("ship").expect("progress").percent_done(), 100.0);
    }

    #[test]
    fn complete_with_no_tasks_errors() {
        let (_temp, _paths, lifecycle) = project();
        lifecycle.init("Nothing", None).expect("init");
        let err = lifecycle.complete("nothing").unwrap_err();
        assert!(err.to_string().contains("no completed tasks"));
    }

    #[test]
    fn archive_requires_marker_and_relocates() {
        let (_temp, paths, lifecycle) = project();
        lifecycle.init("Old", None).expect("init");

        let err = lifecycle.archive("old").unwrap_err();
        assert!(matches!(classify(&err), Some(FlowError::Validation(_))));

        let dir = lifecycle.changes.change_dir("old");
        fs::write(dir.join(MARKER), "done\n").expect("marker");
        let change = lifecycle.archive("old").expect("archive");

        assert_eq!(change.status, ChangeStatus::Archived);
        assert!(!dir.exists());
        let archived = lifecycle.dir_of(&change);
        assert!(archived.starts_with(&paths.archive_dir));
        assert!(archived.join("change.toml").is_file());
        assert!(lifecycle.archive("old").is_err());
    }

    #[test]
    fn scaffold_numbers_files_and_keeps_existing() {
        let (_temp, _paths, lifecycle) = project();
        lifecycle.init("Docs", None).expect("init");
        let titles = vec!["Write intro".to_string(), "Add examples".to_string()];

        let paths = lifecycle.scaffold_task_files("docs", &titles).expect("scaffold");
        assert!(paths[0].ends_with("tasks/01-write-intro.md"));
        assert!(paths[1].ends_with("tasks/02-add-examples.md"));

        fs::write(&paths[0], "custom\n").expect("edit");
        lifecycle.scaffold_task_files("docs", &titles).expect("scaffold again");
        assert_eq!(fs::read_to_string(&paths[0]).expect("read"), "custom\n");
    }
}
