//! Pure prerequisite and output checks.
//!
//! Nothing here performs I/O or reads the clock: the caller supplies the
//! current state, the time, and the already-evaluated external check results.
//! Every failing condition is collected so a caller can fix all gaps at once.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::catalog::{PhaseDefinition, PrerequisiteCheck};
use crate::checks::ExternalCheckResults;
use crate::phase::PhaseStatus;
use crate::state::{PhaseOutputs, WorkflowState};

/// Collected validation failures. Empty means the check passed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    fn push(&mut self, error: String) {
        self.errors.push(error);
    }
}

/// Check whether `definition.phase` may start given `state`.
///
/// Evaluates the ordering rule first (the preceding phase must be completed
/// or skipped), then every configured prerequisite check in order.
pub fn check_prerequisites(
    state: &WorkflowState,
    definition: &PhaseDefinition,
    now: DateTime<Utc>,
    external: &ExternalCheckResults,
) -> ValidationReport {
    let mut report = ValidationReport::default();
    let phase = definition.phase;

    if let Some(prior) = definition.required_prior_phase
        && !state.is_satisfied(prior)
    {
        let status = state
            .latest_record(prior)
            .map(|r| r.status)
            .unwrap_or(PhaseStatus::NotStarted);
        report.push(format!(
            "phase {} must be completed or skipped before phase {} can start (current status: {})",
            prior, phase, status
        ));
    }

    for check in &definition.prerequisite_checks {
        match check {
            PrerequisiteCheck::NoActiveAttempt => {
                let active = state
                    .phase_records
                    .iter()
                    .filter(|r| r.phase == phase)
                    .find(|r| r.is_active(now, definition.timeout_secs));
                if let Some(record) = active {
                    report.push(format!(
                        "phase {} has an active attempt by '{}' started {}s ago (timeout {}s)",
                        phase,
                        record.agent_type,
                        record.age_secs(now),
                        definition.timeout_secs
                    ));
                }
            }
            PrerequisiteCheck::PriorOutput { phase: source, key } => {
                match state.completed_record(*source) {
                    None => report.push(format!(
                        "output '{}' of phase {} is required, but that phase has not completed",
                        key, source
                    )),
                    Some(record) if !record.outputs.get(key).is_some_and(is_truthy) => {
                        report.push(format!(
                            "output '{}' of phase {} is required, but it is missing or empty",
                            key, source
                        ));
                    }
                    Some(_) => {}
                }
            }
            PrerequisiteCheck::External { name } => match external.get(name) {
                None => report.push(format!("external check '{}' was not evaluated", name)),
                Some(outcome) if !outcome.passed => report.push(
                    outcome
                        .message
                        .clone()
                        .unwrap_or_else(|| format!("external check '{}' failed", name)),
                ),
                Some(_) => {}
            },
        }
    }

    report
}

/// Check that `outputs` satisfies the phase's output contract.
///
/// Presence and truthiness only; whether a claim is factually true is not verified.
pub fn check_outputs(definition: &PhaseDefinition, outputs: &PhaseOutputs) -> ValidationReport {
    let mut report = ValidationReport::default();

    for key in &definition.required_output_keys {
        match outputs.get(key) {
            None => report.push(format!(
                "missing required output '{}' for phase {}",
                key, definition.phase
            )),
            Some(value) if !is_truthy(value) => report.push(format!(
                "required output '{}' for phase {} is empty or false",
                key, definition.phase
            )),
            Some(_) => {}
        }
    }

    report
}

/// Falsy: null, false, zero, empty string, empty array, empty object.
pub fn is_truthy(value: &serde_json::Value) -> bool {
    use serde_json::Value;
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
