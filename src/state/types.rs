//! Persisted per-issue workflow state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::errors::EnforcementError;
use crate::phase::{PHASE_COUNT, Phase, PhaseStatus};

/// Outputs reported by an agent when completing a phase.
pub type PhaseOutputs = BTreeMap<String, serde_json::Value>;

const MAX_ISSUE_ID_LEN: usize = 128;

/// Opaque issue identifier. Also names the state file, so the character set is restricted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IssueId(String);

impl IssueId {
    pub fn new(raw: impl Into<String>) -> Result<Self, EnforcementError> {
        let raw = raw.into();
        let valid = !raw.is_empty()
            && raw.len() <= MAX_ISSUE_ID_LEN
            && !raw.starts_with('.')
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if valid {
            Ok(Self(raw))
        } else {
            Err(EnforcementError::InvalidIssueId(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IssueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for IssueId {
    type Err = EnforcementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.trim())
    }
}

impl TryFrom<String> for IssueId {
    type Error = EnforcementError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<IssueId> for String {
    fn from(id: IssueId) -> String {
        id.0
    }
}

impl From<u64> for IssueId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

/// One attempt at a phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: Phase,
    /// Free-form label of the agent that ran the attempt.
    pub agent_type: String,
    pub status: PhaseStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub outputs: PhaseOutputs,
    #[serde(default)]
    pub validation_errors: Vec<String>,
}

impl PhaseRecord {
    pub fn started(phase: Phase, agent_type: &str, now: DateTime<Utc>) -> Self {
        Self {
            phase,
            agent_type: agent_type.to_string(),
            status: PhaseStatus::InProgress,
            started_at: now,
            completed_at: None,
            outputs: PhaseOutputs::new(),
            validation_errors: Vec::new(),
        }
    }

    pub fn skipped(phase: Phase, agent_type: &str, now: DateTime<Utc>) -> Self {
        Self {
            status: PhaseStatus::Skipped,
            completed_at: Some(now),
            ..Self::started(phase, agent_type, now)
        }
    }

    /// Seconds since the attempt started. Negative clock skew counts as zero.
    pub fn age_secs(&self, now: DateTime<Utc>) -> u64 {
        (now - self.started_at).num_seconds().max(0) as u64
    }

    /// An in-progress attempt younger than `timeout_secs`. Such an attempt blocks new starts.
    pub fn is_active(&self, now: DateTime<Utc>, timeout_secs: u64) -> bool {
        self.status == PhaseStatus::InProgress && self.age_secs(now) < timeout_secs
    }

    /// A record the next attempt may overwrite instead of appending after.
    pub fn is_rewritable(&self) -> bool {
        matches!(self.status, PhaseStatus::InProgress | PhaseStatus::Failed)
    }
}

/// The full phase history of one issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub issue_id: IssueId,
    /// Next phase expected to start; `PHASE_COUNT` once the pipeline is finished.
    pub current_phase: u8,
    #[serde(default)]
    pub phase_records: Vec<PhaseRecord>,
    pub created_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new(issue_id: IssueId, now: DateTime<Utc>) -> Self {
        Self {
            issue_id,
            current_phase: 0,
            phase_records: Vec::new(),
            created_at: now,
            last_modified_at: now,
        }
    }

    /// The most recent record for `phase`.
    pub fn latest_record(&self, phase: Phase) -> Option<&PhaseRecord> {
        self.phase_records.iter().rev().find(|r| r.phase == phase)
    }

    pub fn latest_record_mut(&mut self, phase: Phase) -> Option<&mut PhaseRecord> {
        self.phase_records.iter_mut().rev().find(|r| r.phase == phase)
    }

    /// Any record of `phase` is completed or skipped.
    pub fn is_satisfied(&self, phase: Phase) -> bool {
        self.phase_records
            .iter()
            .any(|r| r.phase == phase && r.status.is_satisfied())
    }

    /// The completed record for `phase`, if any.
    pub fn completed_record(&self, phase: Phase) -> Option<&PhaseRecord> {
        self.phase_records
            .iter()
            .find(|r| r.phase == phase && r.status == PhaseStatus::Completed)
    }

    /// Lowest phase without a completed or skipped record.
    pub fn next_phase_to_run(&self) -> Option<Phase> {
        Phase::ALL.into_iter().find(|p| !self.is_satisfied(*p))
    }

    /// One past the highest completed or skipped phase.
    pub fn derived_current_phase(&self) -> u8 {
        self.phase_records
            .iter()
            .filter(|r| r.status.is_satisfied())
            .map(|r| r.phase.index() + 1)
            .max()
            .unwrap_or(0)
            .min(PHASE_COUNT)
    }

    pub fn recompute_current_phase(&mut self) {
        self.current_phase = self.derived_current_phase();
    }

    /// Record a new attempt, rewriting the phase's latest in-progress or failed record.
    pub fn upsert_attempt(&mut self, record: PhaseRecord) {
        match self.latest_record_mut(record.phase) {
            Some(existing) if existing.is_rewritable() => *existing = record,
            _ => self.phase_records.push(record),
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_modified_at = now;
    }

    /// Whether the pipeline has run all six phases.
    pub fn is_finished(&self) -> bool {
        self.next_phase_to_run().is_none()
    }

    /// First structural invariant the state breaks, if any.
    ///
    /// The engine never writes such a state; a loaded one means the file was
    /// edited or damaged outside the engine.
    pub fn invariant_violation(&self) -> Option<String> {
        if self.current_phase > PHASE_COUNT {
            return Some(format!(
                "current_phase {} out of range 0-{}",
                self.current_phase, PHASE_COUNT
            ));
        }

        for phase in Phase::ALL {
            let completed = self
                .phase_records
                .iter()
                .filter(|r| r.phase == phase && r.status == PhaseStatus::Completed)
                .count();
            if completed > 1 {
                return Some(format!("phase {} has {} completed records", phase, completed));
            }
        }

        let in_flight = self
            .phase_records
            .iter()
            .any(|r| r.status == PhaseStatus::InProgress);
        let derived = self.derived_current_phase();
        if !in_flight && self.current_phase != derived {
            return Some(format!(
                "current_phase {} does not match recorded progress ({})",
                self.current_phase, derived
            ));
        }

        None
    }
}
