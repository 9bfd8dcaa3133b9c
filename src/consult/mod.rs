//! Advisory specialist consultations.
//!
//! A [`ConsultantBridge`] runs named specialists for an issue and phase and
//! returns what they said as [`AdviceBundle`]s. The bridge never touches
//! workflow state: the phase's own agent decides what to keep, folds it into
//! its outputs with [`fold_advice`], and commits through
//! `PhaseEnforcer::complete_phase` like any other output.
//!
//! Consultation never fails the phase. An unknown specialist, a spawn
//! error, a non-zero exit, or a timeout all produce a degraded bundle with
//! `available: false` and a reason.
//!
//! ## Usage
//!
//! ```no_run
//! use phaseguard::consult::{ConsultantBridge, SpecialistTask, fold_advice};
//! use phaseguard::phase::Phase;
//! use phaseguard::state::{IssueId, PhaseOutputs};
//!
//! # async fn example(bridge: ConsultantBridge) -> anyhow::Result<()> {
//! let issue = IssueId::new("42")?;
//! let tasks = vec![
//!     SpecialistTask::new("security").with_question("Is the new endpoint authenticated?"),
//!     SpecialistTask::new("performance"),
//! ];
//! let bundles = bridge.consult_all(&issue, Phase::Validation, &tasks).await;
//!
//! let mut outputs = PhaseOutputs::new();
//! outputs.insert("testsPassed".into(), true.into());
//! fold_advice(&mut outputs, &bundles)?;
//! # Ok(())
//! # }
//! ```

pub mod command;

use anyhow::{Result, bail};
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::phase::Phase;
use crate::state::{IssueId, PhaseOutputs};

pub use command::{CommandSpecialist, SpecialistCommandConfig};

/// Default timeout for a single consultation.
pub const DEFAULT_CONSULT_TIMEOUT_SECS: u64 = 120;

/// Output key under which [`fold_advice`] records advice.
pub const ADVICE_OUTPUT_KEY: &str = "advice";

/// One specialist to consult, and what to ask it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialistTask {
    pub specialist: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    /// Extra context passed through to the specialist verbatim.
    #[serde(default, skip_serializing_if = "PhaseOutputs::is_empty")]
    pub context: PhaseOutputs,
}

impl SpecialistTask {
    pub fn new(specialist: &str) -> Self {
        Self {
            specialist: specialist.to_string(),
            question: None,
            context: PhaseOutputs::new(),
        }
    }

    pub fn with_question(mut self, question: &str) -> Self {
        self.question = Some(question.to_string());
        self
    }

    pub fn with_context(mut self, key: &str, value: serde_json::Value) -> Self {
        self.context.insert(key.to_string(), value);
        self
    }
}

/// The request a specialist receives.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsultRequest {
    pub issue_id: IssueId,
    pub phase: Phase,
    pub phase_name: String,
    pub specialist: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(skip_serializing_if = "PhaseOutputs::is_empty")]
    pub context: PhaseOutputs,
}

impl ConsultRequest {
    pub fn new(issue_id: &IssueId, phase: Phase, task: &SpecialistTask) -> Self {
        Self {
            issue_id: issue_id.clone(),
            phase,
            phase_name: phase.name().to_string(),
            specialist: task.specialist.clone(),
            question: task.question.clone(),
            context: task.context.clone(),
        }
    }
}

/// What a specialist had to say.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Advice {
    pub summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommendations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Advice {
    pub fn summary(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            ..Default::default()
        }
    }
}

/// Result of one consultation, available or degraded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdviceBundle {
    pub specialist: String,
    pub phase: Phase,
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advice: Option<Advice>,
    /// Why the consultation degraded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub duration_ms: u64,
}

impl AdviceBundle {
    pub fn available(specialist: &str, phase: Phase, advice: Advice, duration: Duration) -> Self {
        Self {
            specialist: specialist.to_string(),
            phase,
            available: true,
            advice: Some(advice),
            reason: None,
            duration_ms: duration.as_millis() as u64,
        }
    }

    pub fn degraded(specialist: &str, phase: Phase, reason: String, duration: Duration) -> Self {
        Self {
            specialist: specialist.to_string(),
            phase,
            available: false,
            advice: None,
            reason: Some(reason),
            duration_ms: duration.as_millis() as u64,
        }
    }
}

/// An advisory participant. It receives a request and returns advice; it has
/// no access to workflow state.
#[async_trait]
pub trait Specialist: Send + Sync {
    async fn consult(&self, request: &ConsultRequest) -> Result<Advice>;
}

struct RegisteredSpecialist {
    specialist: Arc<dyn Specialist>,
    timeout: Duration,
}

/// Registry and runner for named specialists.
pub struct ConsultantBridge {
    specialists: HashMap<String, RegisteredSpecialist>,
    default_timeout: Duration,
}

impl Default for ConsultantBridge {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_CONSULT_TIMEOUT_SECS))
    }
}

impl ConsultantBridge {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            specialists: HashMap::new(),
            default_timeout,
        }
    }

    pub fn register(&mut self, name: &str, specialist: impl Specialist + 'static) -> &mut Self {
        let timeout = self.default_timeout;
        self.register_with_timeout(name, specialist, timeout)
    }

    pub fn register_with_timeout(
        &mut self,
        name: &str,
        specialist: impl Specialist + 'static,
        timeout: Duration,
    ) -> &mut Self {
        self.specialists.insert(
            name.to_string(),
            RegisteredSpecialist {
                specialist: Arc::new(specialist),
                timeout,
            },
        );
        self
    }

    /// Build a bridge from `[specialists.<name>]` command definitions.
    pub fn from_commands(
        commands: &BTreeMap<String, SpecialistCommandConfig>,
        project_dir: &Path,
        default_timeout: Duration,
    ) -> Self {
        let mut bridge = Self::new(default_timeout);
        for (name, cfg) in commands {
            let timeout = cfg
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(default_timeout);
            bridge.register_with_timeout(
                name,
                CommandSpecialist::new(&cfg.command, cfg.working_dir.as_deref(), project_dir),
                timeout,
            );
        }
        bridge
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.specialists.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.specialists.contains_key(name)
    }

    /// Consult one specialist. Never fails; problems yield a degraded bundle.
    pub async fn consult(
        &self,
        issue_id: &IssueId,
        phase: Phase,
        task: &SpecialistTask,
    ) -> AdviceBundle {
        let start = Instant::now();
        let name = task.specialist.as_str();

        let Some(registered) = self.specialists.get(name) else {
            return self.degrade(
                issue_id,
                name,
                phase,
                format!("specialist '{}' is not registered", name),
                start,
            );
        };

        let request = ConsultRequest::new(issue_id, phase, task);
        match tokio::time::timeout(registered.timeout, registered.specialist.consult(&request)).await
        {
            Ok(Ok(advice)) => {
                tracing::info!(
                    issue = %issue_id,
                    phase = phase.index(),
                    specialist = name,
                    recommendations = advice.recommendations.len(),
                    "consultation completed"
                );
                AdviceBundle::available(name, phase, advice, start.elapsed())
            }
            Ok(Err(e)) => self.degrade(issue_id, name, phase, format!("{:#}", e), start),
            Err(_) => self.degrade(
                issue_id,
                name,
                phase,
                format!(
                    "specialist '{}' timed out after {}s",
                    name,
                    registered.timeout.as_secs()
                ),
                start,
            ),
        }
    }

    /// Consult several specialists concurrently. Bundles come back in task order.
    pub async fn consult_all(
        &self,
        issue_id: &IssueId,
        phase: Phase,
        tasks: &[SpecialistTask],
    ) -> Vec<AdviceBundle> {
        let futures: Vec<_> = tasks
            .iter()
            .map(|task| self.consult(issue_id, phase, task))
            .collect();
        join_all(futures).await
    }

    fn degrade(
        &self,
        issue_id: &IssueId,
        name: &str,
        phase: Phase,
        reason: String,
        start: Instant,
    ) -> AdviceBundle {
        tracing::warn!(
            issue = %issue_id,
            phase = phase.index(),
            specialist = name,
            reason = %reason,
            "consultation degraded"
        );
        AdviceBundle::degraded(name, phase, reason, start.elapsed())
    }
}

/// Record `bundles` under `outputs["advice"]`, keyed by specialist name.
///
/// Existing entries for other specialists are kept; a later bundle for the
/// same specialist replaces the earlier one. Degraded bundles are recorded
/// too, so the phase history shows which consultations were unavailable.
///
/// Fails without touching `outputs` if `outputs["advice"]` already holds
/// something other than an object.
pub fn fold_advice(outputs: &mut PhaseOutputs, bundles: &[AdviceBundle]) -> Result<()> {
    if bundles.is_empty() {
        return Ok(());
    }

    let entry = outputs
        .entry(ADVICE_OUTPUT_KEY.to_string())
        .or_insert_with(|| serde_json::Value::Object(Default::default()));

    let serde_json::Value::Object(map) = entry else {
        bail!(
            "output '{}' already holds a non-object value; refusing to overwrite it",
            ADVICE_OUTPUT_KEY
        );
    };
    for bundle in bundles {
        let mut folded = serde_json::json!({ "available": bundle.available });
        if let Some(ref advice) = bundle.advice {
            folded["summary"] = advice.summary.clone().into();
            folded["recommendations"] = advice.recommendations.clone().into();
            if let Some(ref data) = advice.data {
                folded["data"] = data.clone();
            }
        }
        if let Some(ref reason) = bundle.reason {
            folded["reason"] = reason.clone().into();
        }
        map.insert(bundle.specialist.clone(), folded);
    }
    Ok(())
}
