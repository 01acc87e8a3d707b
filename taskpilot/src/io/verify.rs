//! Verification command run after the agent declares completion.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{info, warn};

use super::atomic::write_atomic;
use super::config::VerifySettings;
use super::process::run_command_with_timeout;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Pass,
    /// Carries the captured log, fed back to the agent on rework.
    Fail(String),
}

pub trait Verifier {
    fn verify(&self, task_id: &str) -> Result<VerifyOutcome>;
}

/// Runs `verify.command` in the project root. An empty command always passes.
#[derive(Debug, Clone)]
pub struct CommandVerifier {
    argv: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
    log_dir: PathBuf,
}

impl CommandVerifier {
    pub fn new(
        settings: &VerifySettings,
        workdir: impl Into<PathBuf>,
        log_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            argv: settings.command.clone(),
            workdir: workdir.into(),
            timeout: Duration::from_secs(settings.timeout_secs),
            output_limit_bytes: 1_000_000,
            log_dir: log_dir.into(),
        }
    }
}

impl Verifier for CommandVerifier {
    fn verify(&self, task_id: &str) -> Result<VerifyOutcome> {
        let Some((program, args)) = self.argv.split_first() else {
            return Ok(VerifyOutcome::Pass);
        };
        if program.trim().is_empty() {
            return Err(anyhow!("verify.command has an empty program"));
        }

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&self.workdir)
            .env("TASKPILOT_TASK_ID", task_id);
        let output = run_command_with_timeout(cmd, None, self.timeout, self.output_limit_bytes)
            .with_context(|| format!("run verify command {program}"))?;

        let log = output.render_log("verify", self.output_limit_bytes);
        let path = self.log_dir.join(task_id).join("verify.log");
        write_atomic(&path, &log).with_context(|| format!("write verify log {}", path.display()))?;

        if output.status.success() && !output.timed_out {
            info!(%task_id, "verification passed");
            Ok(VerifyOutcome::Pass)
        } else {
            warn!(%task_id, exit_code = ?output.status.code(), timed_out = output.timed_out, "verification failed");
            Ok(VerifyOutcome::Fail(log))
        }
    }
}
