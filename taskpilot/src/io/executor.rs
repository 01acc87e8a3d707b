//! Agent executor abstraction.
//!
//! The [`AgentExecutor`] trait decouples the execution session from the
//! agent backend. Every backend that exists today is a child process fed the
//! prompt on stdin; tests use scripted executors that never spawn.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use super::atomic::write_atomic;
use super::config::{AgentBackend, AgentSettings};
use super::process::run_command_with_timeout;
use crate::error::FlowError;
use crate::task::Task;

/// Uniform result of one agent invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentResult {
    pub output: String,
    /// Tokens consumed by this invocation (reported or estimated).
    pub tokens_used: u64,
    /// False when the agent exited non-zero or timed out.
    pub exit_ok: bool,
}

pub trait AgentExecutor {
    /// Identifier recorded on checkpoints.
    fn name(&self) -> &str;
    fn execute(&self, prompt: &str, task: &Task) -> Result<AgentResult>;
}

/// Runs an argv with the prompt on stdin.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    name: String,
    argv: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
    /// When set, each invocation writes `<log_dir>/<task id>/agent.log`.
    log_dir: Option<PathBuf>,
}

impl CommandExecutor {
    pub fn new(name: impl Into<String>, argv: Vec<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            argv,
            workdir: workdir.into(),
            timeout: Duration::from_secs(30 * 60),
            output_limit_bytes: 1_000_000,
            log_dir: None,
        }
    }

    pub fn with_limits(mut self, timeout: Duration, output_limit_bytes: usize) -> Self {
        self.timeout = timeout;
        self.output_limit_bytes = output_limit_bytes;
        self
    }

    pub fn with_log_dir(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(log_dir.into());
        self
    }
}

impl AgentExecutor for CommandExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip_all, fields(agent = %self.name, task_id = %task.id, timeout_secs = self.timeout.as_secs()))]
    fn execute(&self, prompt: &str, task: &Task) -> Result<AgentResult> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| anyhow!("agent {} has an empty command", self.name))?;
        info!(%program, "starting agent");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&self.workdir)
            .env("TASKPILOT_TASK_ID", &task.id);
        let output = run_command_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run agent {}", self.name))?;

        if let Some(dir) = &self.log_dir {
            let path = dir.join(&task.id).join("agent.log");
            write_atomic(&path, &output.render_log("agent", self.output_limit_bytes))
                .with_context(|| format!("write agent log {}", path.display()))?;
        }

        let exit_ok = output.status.success() && !output.timed_out;
        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "agent timed out");
        } else if !exit_ok {
            warn!(exit_code = ?output.status.code(), "agent failed");
        }

        let stdout = output.stdout_lossy();
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tokens_used = parse_token_count(&stdout)
            .or_else(|| parse_token_count(&stderr))
            .unwrap_or_else(|| estimate_tokens(prompt) + estimate_tokens(&stdout));
        debug!(tokens_used, exit_ok, "agent finished");
        Ok(AgentResult {
            output: stdout,
            tokens_used,
            exit_ok,
        })
    }
}

/// Build the executor for the configured backend.
pub fn build_executor(
    settings: &AgentSettings,
    workdir: &Path,
    log_dir: &Path,
) -> Result<Box<dyn AgentExecutor>> {
    let argv: Vec<String> = match settings.backend {
        AgentBackend::Command => settings.command.clone(),
        AgentBackend::Claude => ["claude", "--print", "--permission-mode", "acceptEdits"]
            .map(str::to_string)
            .to_vec(),
        AgentBackend::Codex => ["codex", "exec", "--skip-git-repo-check", "-"]
            .map(str::to_string)
            .to_vec(),
        AgentBackend::Gemini | AgentBackend::Opencode => {
            return Err(FlowError::NotImplemented(settings.backend.as_str().to_string()).into());
        }
    };
    if argv.is_empty() {
        return Err(anyhow!("agent.command is empty"));
    }
    let executor = CommandExecutor::new(settings.backend.as_str(), argv, workdir)
        .with_limits(
            Duration::from_secs(settings.timeout_secs),
            settings.output_limit_bytes,
        )
        .with_log_dir(log_dir);
    Ok(Box::new(executor))
}

/// Find a reported count such as `tokens used: 12,345` or `tokens_used=900`.
///
/// The last report wins.
pub fn parse_token_count(text: &str) -> Option<u64> {
    let mut found = None;
    let mut lines = text.lines().peekable();
    while let Some(line) = lines.next() {
        let lower = line.to_ascii_lowercase();
        let Some(at) = lower.find("tokens used").or_else(|| lower.find("tokens_used")) else {
            continue;
        };
        let rest = &line[at + "tokens used".len()..];
        let digits = leading_number(rest).or_else(|| lines.peek().and_then(|next| leading_number(next)));
        if let Some(count) = digits {
            found = Some(count);
        }
    }
    found
}

fn leading_number(text: &str) -> Option<u64> {
    let trimmed = text.trim_start_matches(|c: char| c == ':' || c == '=' || c.is_whitespace());
    let digits: String = trimmed
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ',')
        .filter(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// Rough token estimate: one token per four bytes.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}
