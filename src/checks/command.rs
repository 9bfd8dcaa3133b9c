//! Shell-command adapter for external checks.
//!
//! The command runs under `sh -c` with the check context in the environment:
//! `PHASEGUARD_ISSUE`, `PHASEGUARD_PHASE` (0-5), `PHASEGUARD_PHASE_NAME`, and
//! `PHASEGUARD_CHECK`. Exit code 0 passes; anything else fails, with stderr
//! (or stdout) as the failure message.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use super::{CheckContext, CheckOutcome, ExternalCheck};

/// `[checks.<name>]` section of `phaseguard.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckCommandConfig {
    /// Shell command to run
    pub command: String,
    /// Per-check timeout; falls back to `[engine] check_timeout_secs`
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Working directory, relative to the project directory
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub description: Option<String>,
}

pub struct CommandCheck {
    name: String,
    command: String,
    working_dir: PathBuf,
}

impl CommandCheck {
    pub fn new(
        name: &str,
        command: &str,
        working_dir: Option<&Path>,
        project_dir: &Path,
    ) -> Self {
        let working_dir = match working_dir {
            Some(p) if p.is_absolute() => p.to_path_buf(),
            Some(p) => project_dir.join(p),
            None => project_dir.to_path_buf(),
        };
        Self {
            name: name.to_string(),
            command: command.to_string(),
            working_dir,
        }
    }
}

#[async_trait]
impl ExternalCheck for CommandCheck {
    async fn run(&self, ctx: &CheckContext) -> Result<CheckOutcome> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("PHASEGUARD_ISSUE", ctx.issue_id.as_str())
            .env("PHASEGUARD_PHASE", ctx.phase.index().to_string())
            .env("PHASEGUARD_PHASE_NAME", ctx.phase.name())
            .env("PHASEGUARD_CHECK", &self.name)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to spawn check command: {}", self.command))?;

        if output.status.success() {
            return Ok(CheckOutcome::pass());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let detail = if !stderr.trim().is_empty() {
            stderr.trim().to_string()
        } else if !stdout.trim().is_empty() {
            stdout.trim().to_string()
        } else {
            format!("exit code {}", output.status.code().unwrap_or(-1))
        };

        Ok(CheckOutcome::fail(format!(
            "external check '{}' failed: {}",
            self.name, detail
        )))
    }
}
