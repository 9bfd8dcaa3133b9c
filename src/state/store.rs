use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::types::{IssueId, WorkflowState};
use crate::errors::{EnforcementError, Result};

/// Shape identifier written into every state file.
pub const STATE_SCHEMA: &str = "phaseguard/workflow-state";
/// Current state file version. Files with any other version are rejected, never guessed at.
pub const STATE_VERSION: u32 = 1;

const FILE_PREFIX: &str = "issue-";
const FILE_EXTENSION: &str = "json";

#[derive(Serialize)]
struct StateFileRef<'a> {
    schema: &'static str,
    version: u32,
    #[serde(flatten)]
    state: &'a WorkflowState,
}

#[derive(Deserialize)]
struct StateFileHeader {
    schema: Option<String>,
    version: Option<u32>,
}

/// Loads and saves one JSON state file per issue under a directory.
///
/// The store does no locking. Callers keep at most one writer per issue.
#[derive(Debug, Clone)]
pub struct StateStore {
    state_dir: PathBuf,
}

impl StateStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn path_for(&self, issue_id: &IssueId) -> PathBuf {
        self.state_dir
            .join(format!("{}{}.{}", FILE_PREFIX, issue_id, FILE_EXTENSION))
    }

    pub fn exists(&self, issue_id: &IssueId) -> bool {
        self.path_for(issue_id).exists()
    }

    /// Load the state for `issue_id`, or a fresh zero-state if no file exists.
    ///
    /// A file that exists but cannot be read back faithfully is reported as
    /// `StateCorruption`; nothing is discarded or repaired.
    pub fn load(&self, issue_id: &IssueId) -> Result<WorkflowState> {
        let path = self.path_for(issue_id);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(WorkflowState::new(issue_id.clone(), Utc::now()));
            }
            Err(e) => {
                return Err(EnforcementError::StateCorruption {
                    path,
                    reason: format!("unreadable: {}", e),
                });
            }
        };

        let state = parse_state_file(&content).map_err(|reason| {
            EnforcementError::StateCorruption {
                path: path.clone(),
                reason,
            }
        })?;

        if &state.issue_id != issue_id {
            return Err(EnforcementError::StateCorruption {
                path,
                reason: format!(
                    "file belongs to issue '{}', expected '{}'",
                    state.issue_id, issue_id
                ),
            });
        }

        Ok(state)
    }

    /// Persist `state` atomically: write a temp file, sync it, then rename over the target.
    pub fn save(&self, state: &WorkflowState) -> Result<()> {
        fs::create_dir_all(&self.state_dir).map_err(|source| EnforcementError::Io {
            path: self.state_dir.clone(),
            source,
        })?;

        let path = self.path_for(&state.issue_id);
        let mut content = serde_json::to_string_pretty(&StateFileRef {
            schema: STATE_SCHEMA,
            version: STATE_VERSION,
            state,
        })
        .map_err(|e| anyhow::anyhow!("Failed to serialize state for issue {}: {}", state.issue_id, e))?;
        content.push('\n');

        let temp_path = path.with_extension(format!("{}.tmp", FILE_EXTENSION));
        let io_err = |source: std::io::Error| EnforcementError::Io {
            path: temp_path.clone(),
            source,
        };
        let mut file = fs::File::create(&temp_path).map_err(io_err)?;
        file.write_all(content.as_bytes()).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);

        fs::rename(&temp_path, &path).map_err(|source| EnforcementError::Io {
            path: path.clone(),
            source,
        })?;

        tracing::debug!(issue = %state.issue_id, path = %path.display(), "state saved");
        Ok(())
    }

    /// Move the issue's state file aside so the next load starts fresh.
    ///
    /// The old file is renamed to `<name>.reset-<timestamp>`, never deleted.
    /// Returns the backup path, or `None` if there was no state file.
    pub fn reset(&self, issue_id: &IssueId) -> Result<Option<PathBuf>> {
        let path = self.path_for(issue_id);
        if !path.exists() {
            return Ok(None);
        }

        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let backup = path.with_file_name(format!("{}.reset-{}", file_name, stamp));

        fs::rename(&path, &backup).map_err(|source| EnforcementError::Io {
            path: path.clone(),
            source,
        })?;

        tracing::info!(issue = %issue_id, backup = %backup.display(), "state reset");
        Ok(Some(backup))
    }

    /// Issue ids with a state file, sorted.
    pub fn list_issues(&self) -> Result<Vec<IssueId>> {
        if !self.state_dir.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.state_dir).map_err(|source| EnforcementError::Io {
            path: self.state_dir.clone(),
            source,
        })?;

        let mut issues: Vec<IssueId> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                let stem = name
                    .strip_prefix(FILE_PREFIX)?
                    .strip_suffix(&format!(".{}", FILE_EXTENSION))?
                    .to_string();
                IssueId::new(stem).ok()
            })
            .collect();

        issues.sort();
        Ok(issues)
    }
}

fn parse_state_file(content: &str) -> std::result::Result<WorkflowState, String> {
    let header: StateFileHeader =
        serde_json::from_str(content).map_err(|e| format!("invalid JSON: {}", e))?;

    match header.schema.as_deref() {
        Some(STATE_SCHEMA) => {}
        Some(other) => return Err(format!("unknown schema '{}'", other)),
        None => return Err("missing schema identifier".to_string()),
    }
    match header.version {
        Some(STATE_VERSION) => {}
        Some(other) => {
            return Err(format!(
                "unsupported version {} (this build reads version {})",
                other, STATE_VERSION
            ));
        }
        None => return Err("missing version".to_string()),
    }

    let state: WorkflowState =
        serde_json::from_str(content).map_err(|e| format!("invalid state record: {}", e))?;
    match state.invariant_violation() {
        Some(reason) => Err(reason),
        None => Ok(state),
    }
}
