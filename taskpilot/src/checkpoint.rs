use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time snapshot of one task's execution at one iteration.
///
/// Identity is `(task_id, iteration)`. Checkpoints are append-only; the
/// store keeps a separate "latest" copy per task.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub task_id: String,
    pub iteration: u32,
    /// Cumulative tokens consumed up to and including this iteration.
    pub tokens_used: u64,
    pub created_at: DateTime<Utc>,
    pub agent: String,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub criteria_met: Vec<String>,
    #[serde(default)]
    pub criteria_remaining: Vec<String>,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default)]
    pub learnings: String,
    #[serde(default)]
    pub notes: String,
}

impl Checkpoint {
    pub fn new(task_id: impl Into<String>, iteration: u32, agent: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            iteration,
            tokens_used: 0,
            created_at: Utc::now(),
            agent: agent.into(),
            output: String::new(),
            criteria_met: Vec::new(),
            criteria_remaining: Vec::new(),
            files_modified: Vec::new(),
            learnings: String::new(),
            notes: String::new(),
        }
    }
}
