//! Phase entry and exit enforcement.
//!
//! [`PhaseEnforcer`] sequences validator calls with state mutation. Every
//! operation is load-mutate-save against the issue's state file:
//!
//! 1. `enforce_start` loads state, rejects a concurrent attempt, evaluates
//!    external checks and prerequisites, then records `in_progress` and
//!    returns a [`Handle`].
//! 2. The agent does its work elsewhere.
//! 3. `complete_phase` reloads state, verifies the handle still matches the
//!    active attempt, checks outputs, and persists `completed` or `failed`.
//!
//! A killed agent leaves its attempt `in_progress`; once the phase timeout
//! elapses the next `enforce_start` supersedes it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::catalog::PhaseCatalog;
use crate::checks::{CheckContext, CheckRegistry, ExternalCheckResults};
use crate::errors::{EnforcementError, Result};
use crate::phase::{Phase, PhaseStatus};
use crate::state::{IssueId, PhaseOutputs, PhaseRecord, StateStore, WorkflowState};
use crate::validator::{check_outputs, check_prerequisites};

/// Agent label recorded when the caller gives none.
pub const DEFAULT_AGENT_TYPE: &str = "agent";

/// Parameters for [`PhaseEnforcer::enforce_start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    pub agent_type: String,
    /// Mark the phase skipped instead of starting it. Only skippable phases accept this.
    pub skip: bool,
}

impl Default for StartRequest {
    fn default() -> Self {
        Self::run(DEFAULT_AGENT_TYPE)
    }
}

impl StartRequest {
    pub fn run(agent_type: &str) -> Self {
        Self {
            agent_type: agent_type.to_string(),
            skip: false,
        }
    }

    pub fn skip(agent_type: &str) -> Self {
        Self {
            agent_type: agent_type.to_string(),
            skip: true,
        }
    }
}

/// Proof of a started attempt, presented again at completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handle {
    pub issue_id: IssueId,
    pub phase: Phase,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    Started(Handle),
    Skipped(WorkflowState),
}

impl StartOutcome {
    pub fn handle(&self) -> Option<&Handle> {
        match self {
            Self::Started(handle) => Some(handle),
            Self::Skipped(_) => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }
}

/// Enforces the phase state machine for any number of issues.
pub struct PhaseEnforcer {
    store: StateStore,
    catalog: PhaseCatalog,
}

impl PhaseEnforcer {
    pub fn new(store: StateStore, catalog: PhaseCatalog) -> Self {
        Self { store, catalog }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn catalog(&self) -> &PhaseCatalog {
        &self.catalog
    }

    /// Start (or skip) `phase` for `issue_id`.
    ///
    /// Fails without touching state when the phase is already done, another
    /// attempt is still fresh, or any prerequisite is unmet.
    pub async fn enforce_start(
        &self,
        issue_id: &IssueId,
        phase: Phase,
        request: &StartRequest,
        checks: &CheckRegistry,
    ) -> Result<StartOutcome> {
        let mut state = self.store.load(issue_id)?;
        let definition = self.catalog.definition_for(phase);
        let now = Utc::now();

        if state.is_satisfied(phase) {
            let status = state
                .phase_records
                .iter()
                .find(|r| r.phase == phase && r.status.is_satisfied())
                .map(|r| r.status)
                .unwrap_or(PhaseStatus::Completed);
            return Err(self.reject(
                issue_id,
                phase,
                vec![format!("phase {} is already {}", phase, status)],
            ));
        }

        let superseded = match state.latest_record(phase) {
            Some(record) if record.is_active(now, definition.timeout_secs) => {
                tracing::warn!(
                    issue = %issue_id,
                    phase = phase.index(),
                    started_at = %record.started_at,
                    "rejected start: attempt still active"
                );
                return Err(EnforcementError::ConcurrentExecution {
                    issue_id: issue_id.to_string(),
                    phase,
                    started_at: record.started_at,
                    timeout_secs: definition.timeout_secs,
                });
            }
            Some(record) if record.status == PhaseStatus::InProgress => Some(record.started_at),
            _ => None,
        };

        if request.skip {
            if !definition.skippable {
                return Err(self.reject(
                    issue_id,
                    phase,
                    vec![format!("phase {} is not skippable", phase)],
                ));
            }
            state.upsert_attempt(PhaseRecord::skipped(phase, &request.agent_type, now));
            state.recompute_current_phase();
            state.touch(now);
            self.store.save(&state)?;
            tracing::info!(
                issue = %issue_id,
                phase = phase.index(),
                current_phase = state.current_phase,
                "phase skipped"
            );
            return Ok(StartOutcome::Skipped(state));
        }

        let check_names = definition.external_check_names();
        let external = if check_names.is_empty() {
            ExternalCheckResults::new()
        } else {
            let ctx = CheckContext {
                issue_id: issue_id.clone(),
                phase,
            };
            checks.evaluate(&check_names, &ctx).await
        };

        let report = check_prerequisites(&state, definition, now, &external);
        if !report.is_ok() {
            return Err(self.reject(issue_id, phase, report.errors));
        }

        if let Some(stale_started_at) = superseded {
            tracing::info!(
                issue = %issue_id,
                phase = phase.index(),
                stale_started_at = %stale_started_at,
                "superseding timed-out attempt"
            );
        }

        let started_at = Utc::now();
        state.upsert_attempt(PhaseRecord::started(phase, &request.agent_type, started_at));
        state.touch(started_at);
        self.store.save(&state)?;

        tracing::info!(
            issue = %issue_id,
            phase = phase.index(),
            agent = %request.agent_type,
            "phase started"
        );

        Ok(StartOutcome::Started(Handle {
            issue_id: issue_id.clone(),
            phase,
            started_at,
        }))
    }

    /// Finish the attempt identified by `handle` with `outputs`.
    ///
    /// On insufficient outputs the attempt is persisted as `failed` with its
    /// validation errors and `OutputValidation` is returned; earlier phases and
    /// `current_phase` are untouched, so the phase can simply be retried.
    pub fn complete_phase(&self, handle: &Handle, outputs: PhaseOutputs) -> Result<WorkflowState> {
        let mut state = self.store.load(&handle.issue_id)?;
        let definition = self.catalog.definition_for(handle.phase);
        let report = check_outputs(definition, &outputs);
        let now = Utc::now();

        {
            let record = state
                .latest_record_mut(handle.phase)
                .ok_or_else(|| self.stale(handle, "no attempt is recorded for this phase".into()))?;

            if record.status != PhaseStatus::InProgress {
                return Err(self.stale(
                    handle,
                    format!("latest attempt is {}, not in_progress", record.status),
                ));
            }
            if record.started_at != handle.started_at {
                return Err(self.stale(
                    handle,
                    format!(
                        "attempt started at {} was superseded by one started at {}",
                        handle.started_at, record.started_at
                    ),
                ));
            }

            record.outputs = outputs;
            if report.is_ok() {
                record.status = PhaseStatus::Completed;
                record.completed_at = Some(now);
                record.validation_errors.clear();
            } else {
                record.status = PhaseStatus::Failed;
                record.validation_errors = report.errors.clone();
            }
        }

        state.recompute_current_phase();
        state.touch(now);
        self.store.save(&state)?;

        if !report.is_ok() {
            tracing::warn!(
                issue = %handle.issue_id,
                phase = handle.phase.index(),
                errors = report.errors.len(),
                "phase outputs rejected"
            );
            return Err(EnforcementError::OutputValidation {
                issue_id: handle.issue_id.to_string(),
                phase: handle.phase,
                errors: report.errors,
            });
        }

        tracing::info!(
            issue = %handle.issue_id,
            phase = handle.phase.index(),
            current_phase = state.current_phase,
            "phase completed"
        );
        Ok(state)
    }

    /// Lowest phase not yet completed or skipped; `None` once all six are done.
    pub fn resume(&self, issue_id: &IssueId) -> Result<Option<Phase>> {
        Ok(self.store.load(issue_id)?.next_phase_to_run())
    }

    /// Read-only view of the issue's state.
    pub fn status(&self, issue_id: &IssueId) -> Result<WorkflowState> {
        self.store.load(issue_id)
    }

    /// Handle for the phase's current in-progress attempt, if there is one.
    pub fn active_handle(&self, issue_id: &IssueId, phase: Phase) -> Result<Option<Handle>> {
        let state = self.store.load(issue_id)?;
        Ok(state
            .latest_record(phase)
            .filter(|r| r.status == PhaseStatus::InProgress)
            .map(|r| Handle {
                issue_id: issue_id.clone(),
                phase,
                started_at: r.started_at,
            }))
    }

    /// Operator recovery: move the issue's state file aside.
    pub fn reset(&self, issue_id: &IssueId) -> Result<Option<PathBuf>> {
        self.store.reset(issue_id)
    }

    fn reject(&self, issue_id: &IssueId, phase: Phase, errors: Vec<String>) -> EnforcementError {
        tracing::warn!(
            issue = %issue_id,
            phase = phase.index(),
            errors = errors.len(),
            "phase start rejected"
        );
        EnforcementError::PrerequisiteNotMet {
            issue_id: issue_id.to_string(),
            phase,
            errors,
        }
    }

    fn stale(&self, handle: &Handle, reason: String) -> EnforcementError {
        EnforcementError::StaleHandle {
            issue_id: handle.issue_id.to_string(),
            phase: handle.phase,
            reason,
        }
    }
}
