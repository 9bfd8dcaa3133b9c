//! Phase definitions: prerequisites, output contracts, skip rules, and timeouts.
//!
//! The catalog is a closed array of six [`PhaseDefinition`]s indexed by
//! [`Phase`]. It is built once per process from the built-in defaults plus any
//! `[phases.<name>]` overrides in `phaseguard.toml`, and is immutable afterwards.
//!
//! ```toml
//! [phases.validation]
//! timeout_secs = 1200
//! required_outputs = ["testsPassed", "coverageReport"]
//! prerequisites = [
//!     { kind = "no_active_attempt" },
//!     { kind = "external", name = "ci_green" },
//! ]
//! ```

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::phase::Phase;

/// A condition evaluated before a phase may start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PrerequisiteCheck {
    /// No attempt of this phase is in progress and younger than the phase timeout.
    NoActiveAttempt,
    /// An earlier phase completed with a truthy value under `key`.
    PriorOutput { phase: Phase, key: String },
    /// A named check from the external-check registry passed.
    External { name: String },
}

impl PrerequisiteCheck {
    pub fn external(name: &str) -> Self {
        Self::External {
            name: name.to_string(),
        }
    }

    pub fn prior_output(phase: Phase, key: &str) -> Self {
        Self::PriorOutput {
            phase,
            key: key.to_string(),
        }
    }

    /// Name of the external check this prerequisite consults, if any.
    pub fn external_name(&self) -> Option<&str> {
        match self {
            Self::External { name } => Some(name),
            _ => None,
        }
    }
}

/// Static definition of one phase.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseDefinition {
    pub phase: Phase,
    pub name: String,
    pub required_prior_phase: Option<Phase>,
    pub skippable: bool,
    pub prerequisite_checks: Vec<PrerequisiteCheck>,
    pub required_output_keys: BTreeSet<String>,
    pub timeout_secs: u64,
}

impl PhaseDefinition {
    fn builtin(phase: Phase, outputs: &[&str], extra: Vec<PrerequisiteCheck>, timeout_secs: u64) -> Self {
        let mut prerequisite_checks = vec![PrerequisiteCheck::NoActiveAttempt];
        prerequisite_checks.extend(extra);
        Self {
            phase,
            name: phase.name().to_string(),
            required_prior_phase: phase.previous(),
            skippable: phase == Phase::Investigation,
            prerequisite_checks,
            required_output_keys: outputs.iter().map(|s| s.to_string()).collect(),
            timeout_secs,
        }
    }

    /// Names of external checks this phase needs evaluated before it can start.
    pub fn external_check_names(&self) -> Vec<&str> {
        self.prerequisite_checks
            .iter()
            .filter_map(|c| c.external_name())
            .collect()
    }

    fn apply(&mut self, ov: &PhaseOverride) {
        if let Some(timeout) = ov.timeout_secs {
            self.timeout_secs = timeout;
        }
        if let Some(ref outputs) = ov.required_outputs {
            self.required_output_keys = outputs.iter().cloned().collect();
        }
        if let Some(ref checks) = ov.prerequisites {
            self.prerequisite_checks = checks.clone();
        }
    }
}

/// Per-phase settings a config file may override. Skippability is fixed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PhaseOverride {
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub required_outputs: Option<Vec<String>>,
    #[serde(default)]
    pub prerequisites: Option<Vec<PrerequisiteCheck>>,
}

/// Severity of a catalog configuration problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueLevel {
    Warning,
    Error,
}

/// A problem found by [`PhaseCatalog::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogIssue {
    pub level: IssueLevel,
    pub phase: Phase,
    pub message: String,
}

/// The six phase definitions, indexed by phase.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseCatalog {
    definitions: [PhaseDefinition; 6],
}

impl Default for PhaseCatalog {
    fn default() -> Self {
        Self {
            definitions: [
                PhaseDefinition::builtin(Phase::Investigation, &["findings"], vec![], 60),
                PhaseDefinition::builtin(Phase::Planning, &["plan"], vec![], 90),
                PhaseDefinition::builtin(
                    Phase::Implementation,
                    &["branchName", "commitsMade"],
                    vec![],
                    300,
                ),
                // Full test and CI runs take minutes; the other phases are sub-minute to a few.
                PhaseDefinition::builtin(Phase::Validation, &["testsPassed"], vec![], 900),
                PhaseDefinition::builtin(
                    Phase::Delivery,
                    &["prUrl"],
                    vec![PrerequisiteCheck::prior_output(Phase::Implementation, "branchName")],
                    120,
                ),
                PhaseDefinition::builtin(Phase::Monitoring, &["monitoringComplete"], vec![], 60),
            ],
        }
    }
}

impl PhaseCatalog {
    /// Build the catalog from defaults plus overrides keyed by phase config key or number.
    pub fn with_overrides(overrides: &BTreeMap<String, PhaseOverride>) -> Result<Self> {
        let mut catalog = Self::default();
        for (key, ov) in overrides {
            let phase: Phase = match key.parse() {
                Ok(phase) => phase,
                Err(_) => bail!(
                    "Unknown phase '{}' in [phases] configuration. Valid keys: investigation, planning, implementation, validation, delivery, monitoring",
                    key
                ),
            };
            catalog.definitions[phase.index() as usize].apply(ov);
        }
        Ok(catalog)
    }

    pub fn definition_for(&self, phase: Phase) -> &PhaseDefinition {
        &self.definitions[phase.index() as usize]
    }

    pub fn definitions(&self) -> &[PhaseDefinition] {
        &self.definitions
    }

    /// Report configuration problems. `registered_checks` are the names the
    /// external-check registry can actually run.
    pub fn validate(&self, registered_checks: &BTreeSet<String>) -> Vec<CatalogIssue> {
        let mut issues = Vec::new();

        for def in &self.definitions {
            if def.timeout_secs == 0 {
                issues.push(CatalogIssue {
                    level: IssueLevel::Error,
                    phase: def.phase,
                    message: "timeout_secs must be greater than zero".to_string(),
                });
            }

            if def.required_output_keys.is_empty() {
                issues.push(CatalogIssue {
                    level: IssueLevel::Warning,
                    phase: def.phase,
                    message: "no required outputs; any completion will be accepted".to_string(),
                });
            }

            if !def
                .prerequisite_checks
                .contains(&PrerequisiteCheck::NoActiveAttempt)
            {
                issues.push(CatalogIssue {
                    level: IssueLevel::Warning,
                    phase: def.phase,
                    message: "no_active_attempt prerequisite removed; concurrent attempts are still rejected at start".to_string(),
                });
            }

            for check in &def.prerequisite_checks {
                match check {
                    PrerequisiteCheck::PriorOutput { phase, key } if *phase >= def.phase => {
                        issues.push(CatalogIssue {
                            level: IssueLevel::Error,
                            phase: def.phase,
                            message: format!(
                                "prior_output check on '{}' refers to phase {}, which does not precede this phase",
                                key, phase
                            ),
                        });
                    }
                    PrerequisiteCheck::External { name } if !registered_checks.contains(name) => {
                        issues.push(CatalogIssue {
                            level: IssueLevel::Error,
                            phase: def.phase,
                            message: format!("external check '{}' is not registered", name),
                        });
                    }
                    _ => {}
                }
            }
        }

        issues
    }
}
