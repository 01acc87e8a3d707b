//! Project configuration stored under `.taskpilot/config.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use super::atomic::write_atomic;
use crate::core::checkpoint_policy::CheckpointPolicy;

/// Project configuration (TOML).
///
/// Intended to be edited by humans. Missing fields default to the values
/// below; a missing file is equivalent to an empty one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ProjectConfig {
    pub autopilot: AutopilotSettings,
    pub checkpoint: CheckpointSettings,
    pub specs: SpecSettings,
    pub agent: AgentSettings,
    pub verify: VerifySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AutopilotSettings {
    /// Iteration budget; non-positive values fall back to the default.
    pub max_iterations: i64,
    /// Report the next candidate without claiming it.
    pub dry_run: bool,
    /// Owner recorded on claimed tasks.
    pub owner: String,
}

impl Default for AutopilotSettings {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            dry_run: false,
            owner: "autopilot".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CheckpointSettings {
    pub iteration_interval: u32,
    /// Token ratios in (0, 1] that trigger a checkpoint.
    pub thresholds: Vec<f64>,
    /// Token budget the thresholds are measured against.
    pub token_limit: u64,
}

impl Default for CheckpointSettings {
    fn default() -> Self {
        let policy = CheckpointPolicy::default();
        Self {
            iteration_interval: policy.iteration_interval,
            thresholds: policy.thresholds,
            token_limit: 200_000,
        }
    }
}

impl CheckpointSettings {
    pub fn policy(&self) -> CheckpointPolicy {
        CheckpointPolicy {
            iteration_interval: self.iteration_interval,
            thresholds: self.thresholds.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SpecSettings {
    /// Directories (relative to the project root) searched for spec references.
    pub search_paths: Vec<String>,
}

impl Default for SpecSettings {
    fn default() -> Self {
        Self {
            search_paths: vec!["docs".to_string(), "specs".to_string()],
        }
    }
}

/// Agent backends the executor factory knows about.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentBackend {
    /// Arbitrary argv from `agent.command`; prompt on stdin.
    Command,
    Claude,
    Codex,
    Gemini,
    Opencode,
}

impl AgentBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentBackend::Command => "command",
            AgentBackend::Claude => "claude",
            AgentBackend::Codex => "codex",
            AgentBackend::Gemini => "gemini",
            AgentBackend::Opencode => "opencode",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentSettings {
    pub backend: AgentBackend,
    pub command: Vec<String>,
    /// Per-invocation wall-clock budget in seconds.
    pub timeout_secs: u64,
    /// Truncate captured agent output beyond this many bytes.
    pub output_limit_bytes: usize,
    /// Execution iterations per task session.
    pub max_iterations: u32,
    /// Marker the agent prints when the work is complete.
    pub stop_signal: String,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            backend: AgentBackend::Claude,
            command: Vec::new(),
            timeout_secs: 30 * 60,
            output_limit_bytes: 1_000_000,
            max_iterations: 10,
            stop_signal: "<promise>DONE</promise>".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VerifySettings {
    /// Command run after the agent declares completion. Empty passes.
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for VerifySettings {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 30 * 60,
        }
    }
}

impl ProjectConfig {
    pub fn validate(&self) -> Result<()> {
        if self.checkpoint.iteration_interval == 0 {
            return Err(anyhow!("checkpoint.iteration_interval must be > 0"));
        }
        if let Some(bad) = self
            .checkpoint
            .thresholds
            .iter()
            .find(|t| !(**t > 0.0 && **t <= 1.0))
        {
            return Err(anyhow!("checkpoint.thresholds must be in (0, 1] (got {bad})"));
        }
        if self.checkpoint.token_limit == 0 {
            return Err(anyhow!("checkpoint.token_limit must be > 0"));
        }
        if self.agent.backend == AgentBackend::Command
            && self.agent.command.first().is_none_or(|c| c.trim().is_empty())
        {
            return Err(anyhow!(
                "agent.command must be a non-empty array when agent.backend = \"command\""
            ));
        }
        if self.agent.stop_signal.trim().is_empty() {
            return Err(anyhow!("agent.stop_signal must not be empty"));
        }
        if self.agent.timeout_secs == 0 || self.verify.timeout_secs == 0 {
            return Err(anyhow!("timeouts must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ProjectConfig::default()`.
pub fn load_config(path: &Path) -> Result<ProjectConfig> {
    if !path.exists() {
        let cfg = ProjectConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ProjectConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk.
pub fn write_config(path: &Path, cfg: &ProjectConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    if !buf.ends_with('\n') {
        buf.push('\n');
    }
    write_atomic(path, &buf)
}
