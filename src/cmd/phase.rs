//! Phase lifecycle commands: start, skip, complete, resume, reset.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;

use phaseguard::consult::{AdviceBundle, fold_advice};
use phaseguard::enforcer::{Handle, StartOutcome, StartRequest};
use phaseguard::errors::EnforcementError;
use phaseguard::phase::Phase;
use phaseguard::state::{IssueId, PhaseOutputs, WorkflowState};

use super::super::Cli;
use super::{engine_config, print_json};

pub async fn cmd_start(
    project_dir: &Path,
    cli: &Cli,
    issue: &IssueId,
    phase: Phase,
    agent: &str,
    skip: bool,
) -> Result<()> {
    let config = engine_config(project_dir, cli)?;
    let enforcer = config.enforcer()?;
    let checks = config.check_registry();

    let request = if skip {
        StartRequest::skip(agent)
    } else {
        StartRequest::run(agent)
    };

    match enforcer.enforce_start(issue, phase, &request, &checks).await? {
        StartOutcome::Started(handle) => print_json(&handle),
        StartOutcome::Skipped(state) => print_json(&transition_summary(&state, phase, "skipped")),
    }
}

#[allow(clippy::too_many_arguments)]
pub fn cmd_complete(
    project_dir: &Path,
    cli: &Cli,
    issue: &IssueId,
    phase: Phase,
    started_at: Option<DateTime<Utc>>,
    outputs: Option<&str>,
    outputs_file: Option<&Path>,
    advice_file: Option<&Path>,
) -> Result<()> {
    let mut outputs = read_outputs(outputs, outputs_file)?;
    if let Some(path) = advice_file {
        fold_advice(&mut outputs, &read_advice(path)?)?;
    }

    let config = engine_config(project_dir, cli)?;
    let enforcer = config.enforcer()?;

    let handle = match started_at {
        Some(started_at) => Handle {
            issue_id: issue.clone(),
            phase,
            started_at,
        },
        None => enforcer
            .active_handle(issue, phase)?
            .ok_or_else(|| EnforcementError::StaleHandle {
                issue_id: issue.to_string(),
                phase,
                reason: "no attempt is in progress".to_string(),
            })?,
    };

    let state = enforcer.complete_phase(&handle, outputs)?;
    print_json(&transition_summary(&state, phase, "completed"))
}

pub fn cmd_resume(project_dir: &Path, cli: &Cli, issue: &IssueId) -> Result<()> {
    let enforcer = engine_config(project_dir, cli)?.enforcer()?;
    match enforcer.resume(issue)? {
        Some(phase) => println!("{} {}", phase.index(), phase.name()),
        None => println!("done"),
    }
    Ok(())
}

pub fn cmd_reset(project_dir: &Path, cli: &Cli, issue: &IssueId, force: bool) -> Result<()> {
    use dialoguer::Confirm;

    let enforcer = engine_config(project_dir, cli)?.enforcer()?;

    if !force {
        let confirm = Confirm::new()
            .with_prompt(format!(
                "This will discard all phase progress for issue {}. Are you sure?",
                issue
            ))
            .default(false)
            .interact()
            .unwrap_or(false);

        if !confirm {
            println!("Reset cancelled");
            return Ok(());
        }
    }

    match enforcer.reset(issue)? {
        Some(moved) => println!("Reset issue {}: state moved to {}", issue, moved.display()),
        None => println!("No state recorded for issue {}", issue),
    }
    Ok(())
}

fn transition_summary(state: &WorkflowState, phase: Phase, status: &str) -> serde_json::Value {
    serde_json::json!({
        "issue_id": state.issue_id,
        "phase": phase,
        "status": status,
        "current_phase": state.current_phase,
        "next_phase": state.next_phase_to_run(),
    })
}

fn read_outputs(inline: Option<&str>, file: Option<&Path>) -> Result<PhaseOutputs> {
    let (content, source) = match (inline, file) {
        (Some(json), _) => (json.to_string(), "--outputs".to_string()),
        (None, Some(path)) => (
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read outputs file: {}", path.display()))?,
            path.display().to_string(),
        ),
        (None, None) => return Ok(PhaseOutputs::new()),
    };
    serde_json::from_str(&content)
        .with_context(|| format!("Outputs in {} must be a JSON object", source))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AdviceInput {
    One(AdviceBundle),
    Many(Vec<AdviceBundle>),
}

fn read_advice(path: &Path) -> Result<Vec<AdviceBundle>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read advice file: {}", path.display()))?;
    let input: AdviceInput = serde_json::from_str(&content).with_context(|| {
        format!(
            "Advice file {} must hold an advice bundle or an array of them",
            path.display()
        )
    })?;
    Ok(match input {
        AdviceInput::One(bundle) => vec![bundle],
        AdviceInput::Many(bundles) => bundles,
    })
}
