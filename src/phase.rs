//! The six pipeline phases and the status a phase attempt can be in.
//!
//! Phases form a closed, ordered set indexed 0-5. Everything that refers to a
//! phase (records, definitions, CLI arguments) goes through [`Phase`] so there
//! are no stringly-typed phase names anywhere in the engine.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One stage of the issue-resolution pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Phase {
    Investigation,
    Planning,
    Implementation,
    Validation,
    Delivery,
    Monitoring,
}

/// Number of phases in the pipeline. `current_phase == PHASE_COUNT` means finished.
pub const PHASE_COUNT: u8 = 6;

impl Phase {
    /// All phases in pipeline order.
    pub const ALL: [Phase; 6] = [
        Phase::Investigation,
        Phase::Planning,
        Phase::Implementation,
        Phase::Validation,
        Phase::Delivery,
        Phase::Monitoring,
    ];

    /// Zero-based position in the pipeline.
    pub fn index(self) -> u8 {
        match self {
            Phase::Investigation => 0,
            Phase::Planning => 1,
            Phase::Implementation => 2,
            Phase::Validation => 3,
            Phase::Delivery => 4,
            Phase::Monitoring => 5,
        }
    }

    pub fn from_index(index: u8) -> Option<Phase> {
        Self::ALL.get(index as usize).copied()
    }

    /// Human-readable name, as shown in status tables.
    pub fn name(self) -> &'static str {
        match self {
            Phase::Investigation => "Investigation",
            Phase::Planning => "Planning",
            Phase::Implementation => "Implementation",
            Phase::Validation => "Validation",
            Phase::Delivery => "Delivery",
            Phase::Monitoring => "Monitoring",
        }
    }

    /// Lowercase key used for `[phases.<key>]` config sections.
    pub fn config_key(self) -> &'static str {
        match self {
            Phase::Investigation => "investigation",
            Phase::Planning => "planning",
            Phase::Implementation => "implementation",
            Phase::Validation => "validation",
            Phase::Delivery => "delivery",
            Phase::Monitoring => "monitoring",
        }
    }

    /// The phase that must be completed or skipped before this one may start.
    pub fn previous(self) -> Option<Phase> {
        self.index().checked_sub(1).and_then(Phase::from_index)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.index(), self.name())
    }
}

impl From<Phase> for u8 {
    fn from(phase: Phase) -> u8 {
        phase.index()
    }
}

impl TryFrom<u8> for Phase {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        Phase::from_index(value)
            .ok_or_else(|| format!("phase index {} out of range 0-{}", value, PHASE_COUNT - 1))
    }
}

impl FromStr for Phase {
    type Err = anyhow::Error;

    /// Accepts a phase number (`"3"`, `"03"`) or a case-insensitive name (`"validation"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(index) = trimmed.parse::<u8>() {
            return Phase::try_from(index).map_err(|e| anyhow::anyhow!(e));
        }
        let lower = trimmed.to_lowercase();
        Phase::ALL
            .into_iter()
            .find(|p| p.config_key() == lower)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Invalid phase '{}'. Valid values: 0-5 or investigation, planning, implementation, validation, delivery, monitoring",
                    s
                )
            })
    }
}

/// Status of a single phase attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl PhaseStatus {
    /// Completed or skipped: the phase no longer blocks its successor.
    pub fn is_satisfied(self) -> bool {
        matches!(self, PhaseStatus::Completed | PhaseStatus::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PhaseStatus::NotStarted => "not_started",
            PhaseStatus::InProgress => "in_progress",
            PhaseStatus::Completed => "completed",
            PhaseStatus::Failed => "failed",
            PhaseStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
