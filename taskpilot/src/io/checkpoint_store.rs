//! Checkpoint persistence under `.taskpilot/checkpoints/`.
//!
//! One JSON document per `(task, iteration)` named `<task>-<iter:04>.json`,
//! plus `<task>-latest.json` mirroring the highest iteration saved.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use super::atomic::{read_optional, remove_if_exists, write_json};
use crate::checkpoint::Checkpoint;
use crate::error::FlowError;

const LATEST: &str = "latest";

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn iteration_path(&self, task_id: &str, iteration: u32) -> PathBuf {
        self.dir.join(format!("{task_id}-{iteration:04}.json"))
    }

    fn latest_path(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("{task_id}-{LATEST}.json"))
    }

    /// Write the iteration document and refresh the latest pointer.
    ///
    /// The latest pointer is only replaced when `checkpoint` is at least as
    /// recent as the one it currently mirrors.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<PathBuf> {
        let path = self.iteration_path(&checkpoint.task_id, checkpoint.iteration);
        write_json(&path, checkpoint)
            .with_context(|| format!("save checkpoint {}", path.display()))?;

        let latest_path = self.latest_path(&checkpoint.task_id);
        let newer = match read_checkpoint(&latest_path)? {
            Some(latest) => checkpoint.iteration >= latest.iteration,
            None => true,
        };
        if newer {
            write_json(&latest_path, checkpoint)
                .with_context(|| format!("save checkpoint {}", latest_path.display()))?;
        }
        debug!(task_id = %checkpoint.task_id, iteration = checkpoint.iteration, latest = newer, "checkpoint saved");
        Ok(path)
    }

    /// Latest checkpoint for `task_id`, if any.
    pub fn load(&self, task_id: &str) -> Result<Option<Checkpoint>> {
        read_checkpoint(&self.latest_path(task_id))
    }

    pub fn load_iteration(&self, task_id: &str, iteration: u32) -> Result<Option<Checkpoint>> {
        read_checkpoint(&self.iteration_path(task_id, iteration))
    }

    /// Every iteration document for `task_id`, ordered by iteration. Excludes the latest pointer.
    pub fn list(&self, task_id: &str) -> Result<Vec<Checkpoint>> {
        let mut checkpoints = Vec::new();
        for (_, path) in self.iteration_files(task_id)? {
            if let Some(checkpoint) = read_checkpoint(&path)? {
                checkpoints.push(checkpoint);
            }
        }
        Ok(checkpoints)
    }

    /// Remove one iteration document. Missing documents are not an error.
    pub fn delete(&self, task_id: &str, iteration: u32) -> Result<bool> {
        remove_if_exists(&self.iteration_path(task_id, iteration))
    }

    /// Remove every document for `task_id`, including the latest pointer.
    pub fn delete_all(&self, task_id: &str) -> Result<usize> {
        let mut removed = 0;
        for (_, path) in self.iteration_files(task_id)? {
            if remove_if_exists(&path)? {
                removed += 1;
            }
        }
        if remove_if_exists(&self.latest_path(task_id))? {
            removed += 1;
        }
        debug!(%task_id, removed, "checkpoints deleted");
        Ok(removed)
    }

    fn iteration_files(&self, task_id: &str) -> Result<Vec<(u32, PathBuf)>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("read dir {}", self.dir.display()));
            }
        };
        let prefix = format!("{task_id}-");
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("read dir {}", self.dir.display()))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let iteration = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".json"))
                .filter(|digits| digits.chars().all(|c| c.is_ascii_digit()))
                .and_then(|digits| digits.parse::<u32>().ok());
            if let Some(iteration) = iteration {
                files.push((iteration, entry.path()));
            }
        }
        files.sort_by_key(|(iteration, _)| *iteration);
        Ok(files)
    }
}

fn read_checkpoint(path: &Path) -> Result<Option<Checkpoint>> {
    let Some(contents) = read_optional(path)? else {
        return Ok(None);
    };
    let checkpoint = serde_json::from_str(&contents).map_err(|err| FlowError::Parse {
        path: path.display().to_string(),
        message: err.to_string(),
    })?;
    Ok(Some(checkpoint))
}
