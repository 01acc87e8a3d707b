//! Change registry (`changes/registry.toml`) and per-change metadata.
//!
//! The registry is the ordered list of every change; each change directory
//! also carries a `change.toml` mirroring its registry entry. Both are
//! rewritten together by [`ChangeStore::save`].

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::atomic::{read_optional, write_atomic};
use super::init::ProjectPaths;
use crate::error::FlowError;

/// Stored lifecycle status. Ordered; a change only ever advances.
///
/// "implementing" is not stored: it is derived from task progress.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    #[default]
    Draft,
    Imported,
    Implemented,
    Archived,
}

impl ChangeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeStatus::Draft => "draft",
            ChangeStatus::Imported => "imported",
            ChangeStatus::Implemented => "implemented",
            ChangeStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Change {
    /// Kebab-case slug of `name`.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: ChangeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Ids of the tasks created by import, in task-list order.
    #[serde(default)]
    pub tasks: Vec<String>,
    /// Archive directory, relative to the project root, once archived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_to: Option<String>,
}

impl Change {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: ChangeStatus::Draft,
            source: None,
            created_at: Utc::now(),
            tasks: Vec::new(),
            archived_to: None,
        }
    }

    /// Move to `next`, refusing to go backwards.
    pub fn advance_to(&mut self, next: ChangeStatus) -> Result<(), FlowError> {
        if next < self.status {
            return Err(FlowError::Validation(format!(
                "change {} cannot go from {} back to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Registry {
    #[serde(default)]
    pub changes: Vec<Change>,
}

impl Registry {
    pub fn get(&self, id: &str) -> Option<&Change> {
        self.changes.iter().find(|change| change.id == id)
    }
}

pub fn load_registry(path: &Path) -> Result<Registry> {
    let Some(contents) = read_optional(path)? else {
        return Ok(Registry::default());
    };
    let registry = toml::from_str(&contents).map_err(|err| FlowError::Parse {
        path: path.display().to_string(),
        message: err.to_string(),
    })?;
    Ok(registry)
}

pub fn write_registry(path: &Path, registry: &Registry) -> Result<()> {
    let buf = toml::to_string_pretty(registry).context("serialize change registry")?;
    write_atomic(path, &buf)
}

/// Filesystem-backed change registry for one project.
#[derive(Debug, Clone)]
pub struct ChangeStore {
    root: PathBuf,
    changes_dir: PathBuf,
    registry_path: PathBuf,
}

impl ChangeStore {
    pub fn new(paths: &ProjectPaths) -> Self {
        Self {
            root: paths.root.clone(),
            changes_dir: paths.changes_dir.clone(),
            registry_path: paths.registry_path.clone(),
        }
    }

    pub fn change_dir(&self, id: &str) -> PathBuf {
        self.changes_dir.join(id)
    }

    pub fn registry(&self) -> Result<Registry> {
        load_registry(&self.registry_path).context("load change registry")
    }

    pub fn list(&self) -> Result<Vec<Change>> {
        Ok(self.registry()?.changes)
    }

    pub fn get(&self, id: &str) -> Result<Change> {
        self.registry()?
            .changes
            .into_iter()
            .find(|change| change.id == id)
            .ok_or_else(|| FlowError::not_found(format!("change {id}"), "registry").into())
    }

    /// Register a new change. Fails when the slug is taken.
    pub fn insert(&self, change: &Change) -> Result<()> {
        let mut registry = self.registry()?;
        if registry.get(&change.id).is_some() {
            return Err(FlowError::AlreadyExists(format!("change {} already exists", change.id)).into());
        }
        registry.changes.push(change.clone());
        self.write(&registry, change)
    }

    /// Replace the registry entry for `change.id` and its metadata mirror.
    pub fn save(&self, change: &Change) -> Result<()> {
        let mut registry = self.registry()?;
        let slot = registry
            .changes
            .iter_mut()
            .find(|existing| existing.id == change.id)
            .ok_or_else(|| FlowError::not_found(format!("change {}", change.id), "registry"))?;
        *slot = change.clone();
        self.write(&registry, change)
    }

    fn write(&self, registry: &Registry, change: &Change) -> Result<()> {
        write_registry(&self.registry_path, registry).context("save change registry")?;
        let dir = match &change.archived_to {
            Some(archived) => self.root.join(archived),
            None => self.change_dir(&change.id),
        };
        if dir.is_dir() {
            let meta = dir.join("change.toml");
            let buf = toml::to_string_pretty(change).context("serialize change metadata")?;
            write_atomic(&meta, &buf).with_context(|| format!("write {}", meta.display()))?;
        }
        debug!(change = %change.id, status = %change.status, "change saved");
        Ok(())
    }
}
