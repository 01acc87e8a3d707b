//! Initialization helpers for `.taskpilot/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::atomic::write_atomic;
use super::change_store::{Registry, write_registry};
use super::config::{ProjectConfig, write_config};
use super::task_store::write_collection;
use crate::task::Collection;

/// All canonical paths within `.taskpilot/` for a project root.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub root: PathBuf,
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub tasks_dir: PathBuf,
    pub journal_path: PathBuf,
    pub checkpoints_dir: PathBuf,
    pub changes_dir: PathBuf,
    pub registry_path: PathBuf,
    pub archive_dir: PathBuf,
    pub context_dir: PathBuf,
    pub sessions_dir: PathBuf,
    pub gitignore_path: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let base = root.join(".taskpilot");
        let changes_dir = base.join("changes");
        let state_dir = base.join("state");
        Self {
            root: root.clone(),
            config_path: base.join("config.toml"),
            tasks_dir: base.join("tasks"),
            journal_path: state_dir.join("move.json"),
            state_dir,
            checkpoints_dir: base.join("checkpoints"),
            registry_path: changes_dir.join("registry.toml"),
            archive_dir: changes_dir.join("archive"),
            changes_dir,
            context_dir: base.join("context"),
            sessions_dir: base.join("sessions"),
            gitignore_path: base.join(".gitignore"),
        }
    }

    pub fn base_dir(&self) -> PathBuf {
        self.root.join(".taskpilot")
    }

    pub fn collection_path(&self, collection: Collection) -> PathBuf {
        self.tasks_dir.join(format!("{}.toml", collection.name()))
    }

    /// Render `path` relative to the project root when it lives under it.
    pub fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

/// Options for `init_project`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing scaffold files.
    pub force: bool,
}

/// Create `.taskpilot/` scaffolding in `root`.
///
/// Fails if `.taskpilot/` already exists unless `options.force` is set. Forcing
/// rewrites config and ignore files but never truncates task collections, the
/// registry, checkpoints or change directories.
pub fn init_project(root: &Path, options: &InitOptions) -> Result<ProjectPaths> {
    let paths = ProjectPaths::new(root);
    let base = paths.base_dir();
    if base.exists() && !options.force {
        return Err(anyhow!(
            "taskpilot init: .taskpilot already exists (use --force to overwrite)"
        ));
    }
    if base.exists() && !base.is_dir() {
        return Err(anyhow!(
            "taskpilot init: .taskpilot exists but is not a directory"
        ));
    }

    for dir in [
        &paths.state_dir,
        &paths.tasks_dir,
        &paths.checkpoints_dir,
        &paths.changes_dir,
        &paths.archive_dir,
        &paths.context_dir,
        &paths.sessions_dir,
    ] {
        fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
    }

    write_atomic(&paths.gitignore_path, GITIGNORE)?;
    write_config(&paths.config_path, &ProjectConfig::default())?;
    for collection in Collection::ALL {
        let path = paths.collection_path(collection);
        if !path.exists() {
            write_collection(&path, &[])?;
        }
    }
    if !paths.registry_path.exists() {
        write_registry(&paths.registry_path, &Registry::default())?;
    }

    Ok(paths)
}

const GITIGNORE: &str = "context/\nsessions/\nstate/\n";
