use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a task. Must agree with the collection holding it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Done,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Done => "done",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "pending" => Ok(TaskStatus::Pending),
            "in-progress" => Ok(TaskStatus::InProgress),
            "done" => Ok(TaskStatus::Done),
            other => Err(anyhow!("unknown task status '{other}'")),
        }
    }
}

/// Named task collections, each persisted as one document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Collection {
    Backlog,
    InProgress,
    Done,
}

impl Collection {
    /// Scan order used by lookups.
    pub const ALL: [Collection; 3] = [Collection::Backlog, Collection::InProgress, Collection::Done];

    pub fn name(self) -> &'static str {
        match self {
            Collection::Backlog => "backlog",
            Collection::InProgress => "in-progress",
            Collection::Done => "done",
        }
    }

    /// Status a task must carry while it resides in this collection.
    pub fn status(self) -> TaskStatus {
        match self {
            Collection::Backlog => TaskStatus::Pending,
            Collection::InProgress => TaskStatus::InProgress,
            Collection::Done => TaskStatus::Done,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Collection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "backlog" => Ok(Collection::Backlog),
            "in-progress" => Ok(Collection::InProgress),
            "done" => Ok(Collection::Done),
            other => Err(anyhow!(
                "unknown collection '{other}' (expected backlog, in-progress or done)"
            )),
        }
    }
}

/// A unit of work tracked through backlog, in-progress and done.
///
/// Every descriptive field is carried verbatim across moves; only `status`
/// and `owner` are written by the claim protocol.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner: String,
    /// Directories where the work will likely happen. Advisory.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scope: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub specs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skills: Vec<String>,
    /// Paths that must exist before the task can start.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub acceptance: Vec<String>,
    /// Slug of the change this task was imported from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subtasks: Vec<Task>,
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            ..Task::default()
        }
    }

    /// Depth-first search over this task and its sub-tasks.
    pub fn find(&self, id: &str) -> Option<&Task> {
        if self.id == id {
            return Some(self);
        }
        self.subtasks.iter().find_map(|sub| sub.find(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_names_round_trip_through_from_str() {
        for collection in Collection::ALL {
            let parsed: Collection = collection.name().parse().expect("parse");
            assert_eq!(parsed, collection);
        }
        assert!("archive".parse::<Collection>().is_err());
    }

    #[test]
    fn find_descends_into_subtasks() {
        let mut parent = Task::new("T1", "parent");
        parent.subtasks.push(Task::new("T1.1", "child"));

        assert_eq!(parent.find("T1.1").map(|t| t.title.as_str()), Some("child"));
        assert!(parent.find("T2").is_none());
    }

    #[test]
    fn status_serializes_kebab_case() {
        let task = Task {
            status: TaskStatus::InProgress,
            ..Task::new("T1", "title")
        };
        let text = toml::to_string(&task).expect("serialize");
        assert!(text.contains("status = \"in-progress\""));
        assert!(!text.contains("owner"));
    }
}
