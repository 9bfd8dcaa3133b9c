//! Typed error hierarchy for the phase enforcement engine.
//!
//! Every variant except `StateCorruption` is recoverable by the caller:
//! - `PrerequisiteNotMet`: satisfy the listed conditions and start again
//! - `OutputValidation`: redo the phase work and resubmit outputs
//! - `ConcurrentExecution`: wait until the active attempt's timeout elapses
//! - `StaleHandle`: call `enforce_start` again for a fresh handle
//!
//! `StateCorruption` is fatal and needs an explicit operator reset. The engine
//! never retries anything itself.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use thiserror::Error;

use crate::exit_codes;
use crate::phase::Phase;

#[derive(Debug, Error)]
pub enum EnforcementError {
    #[error("Cannot start phase {phase} for issue {issue_id}: {} unmet prerequisite(s)", .errors.len())]
    PrerequisiteNotMet {
        issue_id: String,
        phase: Phase,
        errors: Vec<String>,
    },

    #[error("Phase {phase} for issue {issue_id} produced insufficient outputs: {} problem(s)", .errors.len())]
    OutputValidation {
        issue_id: String,
        phase: Phase,
        errors: Vec<String>,
    },

    #[error("Phase {phase} for issue {issue_id} already has an active attempt started at {started_at} (timeout {timeout_secs}s)")]
    ConcurrentExecution {
        issue_id: String,
        phase: Phase,
        started_at: DateTime<Utc>,
        timeout_secs: u64,
    },

    #[error("Handle for phase {phase} of issue {issue_id} is stale: {reason}")]
    StaleHandle {
        issue_id: String,
        phase: Phase,
        reason: String,
    },

    #[error("State file {path} is corrupt: {reason}")]
    StateCorruption { path: PathBuf, reason: String },

    #[error("Invalid issue id '{0}': use 1-128 characters from [A-Za-z0-9._-]")]
    InvalidIssueId(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EnforcementError {
    /// The complete diagnostic list for validation failures, empty otherwise.
    pub fn errors(&self) -> &[String] {
        match self {
            Self::PrerequisiteNotMet { errors, .. } | Self::OutputValidation { errors, .. } => {
                errors.as_slice()
            }
            _ => &[],
        }
    }

    /// Short machine-readable kind, used in the CLI's JSON error report.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PrerequisiteNotMet { .. } => "prerequisite_not_met",
            Self::OutputValidation { .. } => "output_validation",
            Self::ConcurrentExecution { .. } => "concurrent_execution",
            Self::StaleHandle { .. } => "stale_handle",
            Self::StateCorruption { .. } => "state_corruption",
            Self::InvalidIssueId(_) => "invalid_issue_id",
            Self::Io { .. } => "io",
            Self::Other(_) => "other",
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::PrerequisiteNotMet { .. } | Self::OutputValidation { .. } => {
                exit_codes::VALIDATION
            }
            Self::ConcurrentExecution { .. } | Self::StaleHandle { .. } => exit_codes::CONFLICT,
            Self::StateCorruption { .. } => exit_codes::CORRUPTION,
            Self::InvalidIssueId(_) | Self::Io { .. } | Self::Other(_) => exit_codes::FAILURE,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::StateCorruption { .. })
    }

    /// JSON report printed on stdout by the CLI.
    pub fn report(&self) -> serde_json::Value {
        let mut report = serde_json::json!({
            "error": self.kind(),
            "message": self.to_string(),
            "errors": self.errors(),
        });
        match self {
            Self::PrerequisiteNotMet { issue_id, phase, .. }
            | Self::OutputValidation { issue_id, phase, .. }
            | Self::StaleHandle { issue_id, phase, .. } => {
                report["issue_id"] = issue_id.as_str().into();
                report["phase"] = phase.index().into();
            }
            Self::ConcurrentExecution {
                issue_id,
                phase,
                started_at,
                timeout_secs,
            } => {
                report["issue_id"] = issue_id.as_str().into();
                report["phase"] = phase.index().into();
                report["started_at"] = started_at.to_rfc3339().into();
                report["timeout_secs"] = (*timeout_secs).into();
            }
            Self::StateCorruption { path, .. } | Self::Io { path, .. } => {
                report["path"] = path.display().to_string().into();
            }
            Self::InvalidIssueId(_) | Self::Other(_) => {}
        }
        report
    }
}

pub type Result<T, E = EnforcementError> = std::result::Result<T, E>;
