//! Shell-command specialist.
//!
//! The command runs under `sh -c`. It receives the [`ConsultRequest`] as JSON
//! on stdin plus `PHASEGUARD_ISSUE`, `PHASEGUARD_PHASE`, `PHASEGUARD_PHASE_NAME`
//! and `PHASEGUARD_SPECIALIST` in the environment. If stdout contains a JSON
//! object with a `summary` field it is parsed as [`Advice`]; otherwise the
//! trimmed stdout becomes the summary.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{Advice, ConsultRequest, Specialist};

/// `[specialists.<name>]` section of `phaseguard.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpecialistCommandConfig {
    pub command: String,
    /// Falls back to `[engine] consult_timeout_secs`
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub description: Option<String>,
}

pub struct CommandSpecialist {
    command: String,
    working_dir: PathBuf,
}

impl CommandSpecialist {
    pub fn new(command: &str, working_dir: Option<&Path>, project_dir: &Path) -> Self {
        let working_dir = match working_dir {
            Some(p) if p.is_absolute() => p.to_path_buf(),
            Some(p) => project_dir.join(p),
            None => project_dir.to_path_buf(),
        };
        Self {
            command: command.to_string(),
            working_dir,
        }
    }
}

#[async_trait]
impl Specialist for CommandSpecialist {
    async fn consult(&self, request: &ConsultRequest) -> Result<Advice> {
        let payload = serde_json::to_vec(request).context("Failed to serialize consult request")?;

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("PHASEGUARD_ISSUE", request.issue_id.as_str())
            .env("PHASEGUARD_PHASE", request.phase.index().to_string())
            .env("PHASEGUARD_PHASE_NAME", &request.phase_name)
            .env("PHASEGUARD_SPECIALIST", &request.specialist)
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn specialist command: {}", self.command))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A specialist that ignores stdin may exit before reading it.
            if let Err(e) = stdin.write_all(&payload).await
                && e.kind() != std::io::ErrorKind::BrokenPipe
            {
                return Err(e).context("Failed to write consult request to stdin");
            }
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .context("Failed to wait for specialist process")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "specialist '{}' exited with code {}{}",
                request.specialist,
                output.status.code().unwrap_or(-1),
                if stderr.trim().is_empty() {
                    String::new()
                } else {
                    format!(": {}", stderr.trim())
                }
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_advice(&stdout)
            .with_context(|| format!("specialist '{}' produced no advice", request.specialist))
    }
}

/// Parse specialist stdout. Prefers an embedded JSON object with a `summary`,
/// falls back to the text itself.
pub fn parse_advice(stdout: &str) -> Option<Advice> {
    if let Some(json) = find_json_object(stdout)
        && let Ok(advice) = serde_json::from_str::<Advice>(json)
    {
        return Some(advice);
    }

    let text = stdout.trim();
    if text.is_empty() {
        None
    } else {
        Some(Advice::summary(text))
    }
}

/// The first balanced `{...}` span in `text`. Braces inside JSON strings are ignored.
fn find_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
