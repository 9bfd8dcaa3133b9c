//! Read-only views: per-issue status and the effective phase catalog.

use anyhow::Result;
use console::style;
use std::path::Path;

use phaseguard::catalog::{PhaseCatalog, PrerequisiteCheck};
use phaseguard::phase::{PHASE_COUNT, Phase, PhaseStatus};
use phaseguard::state::{IssueId, StateStore, WorkflowState};

use super::super::Cli;
use super::{engine_config, print_json};

pub fn cmd_status(project_dir: &Path, cli: &Cli, issue: Option<&IssueId>, json: bool) -> Result<()> {
    let config = engine_config(project_dir, cli)?;
    let store = config.store();

    match issue {
        Some(issue) => {
            let state = store.load(issue)?;
            if json {
                return print_json(&state);
            }
            print_issue(&state);
        }
        None => print_all(&store, json)?,
    }
    Ok(())
}

fn print_issue(state: &WorkflowState) {
    println!();
    println!("Issue {}", style(&state.issue_id).bold());
    println!("  Current phase: {}", current_label(state.current_phase));
    match state.next_phase_to_run() {
        Some(next) => println!("  Next to run:   {}", next),
        None => println!("  Next to run:   {}", style("done").green()),
    }
    println!(
        "  Last modified: {}",
        state.last_modified_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!();
    println!(
        "{:<20} {:<12} {:<14} {:<20} Completed",
        "Phase", "Status", "Agent", "Started"
    );
    println!(
        "{:<20} {:<12} {:<14} {:<20} ---------",
        "-----", "------", "-----", "-------"
    );

    for phase in Phase::ALL {
        match state.latest_record(phase) {
            Some(record) => {
                println!(
                    "{:<20} {:<12} {:<14} {:<20} {}",
                    phase.to_string(),
                    styled_status(record.status),
                    record.agent_type,
                    record.started_at.format("%Y-%m-%d %H:%M:%S"),
                    record
                        .completed_at
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| "-".to_string())
                );
                for error in &record.validation_errors {
                    println!("    {} {}", style("!").red(), error);
                }
            }
            None => println!(
                "{:<20} {:<12}",
                phase.to_string(),
                styled_status(PhaseStatus::NotStarted)
            ),
        }
    }
    println!();
}

fn print_all(store: &StateStore, json: bool) -> Result<()> {
    let issues = store.list_issues()?;

    if json {
        let mut rows = Vec::new();
        for issue in &issues {
            rows.push(match store.load(issue) {
                Ok(state) => serde_json::json!({
                    "issue_id": issue,
                    "current_phase": state.current_phase,
                    "next_phase": state.next_phase_to_run(),
                    "last_modified_at": state.last_modified_at,
                }),
                Err(e) => serde_json::json!({ "issue_id": issue, "error": e.to_string() }),
            });
        }
        return print_json(&rows);
    }

    if issues.is_empty() {
        println!();
        println!("No workflow state found in {}", store.state_dir().display());
        println!();
        return Ok(());
    }

    println!();
    println!("{:<24} {:<20} {:<20} Last modified", "Issue", "Current", "Next");
    println!("{:<24} {:<20} {:<20} -------------", "-----", "-------", "----");
    for issue in &issues {
        match store.load(issue) {
            Ok(state) => println!(
                "{:<24} {:<20} {:<20} {}",
                issue.as_str(),
                current_label(state.current_phase),
                state
                    .next_phase_to_run()
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "done".to_string()),
                state.last_modified_at.format("%Y-%m-%d %H:%M:%S")
            ),
            Err(e) => println!("{:<24} {}", issue.as_str(), style(e.to_string()).red()),
        }
    }
    println!();
    Ok(())
}

pub fn cmd_phases(project_dir: &Path, cli: &Cli, json: bool) -> Result<()> {
    let catalog = engine_config(project_dir, cli)?.catalog()?;
    if json {
        return print_json(catalog.definitions());
    }
    print_catalog(&catalog);
    Ok(())
}

fn print_catalog(catalog: &PhaseCatalog) {
    println!();
    println!(
        "{:<20} {:<9} {:<9} {:<32} Prerequisites",
        "Phase", "Skippable", "Timeout", "Required outputs"
    );
    println!(
        "{:<20} {:<9} {:<9} {:<32} -------------",
        "-----", "---------", "-------", "----------------"
    );
    for def in catalog.definitions() {
        let outputs: Vec<&str> = def.required_output_keys.iter().map(String::as_str).collect();
        let prereqs: Vec<String> = def.prerequisite_checks.iter().map(describe_check).collect();
        println!(
            "{:<20} {:<9} {:<9} {:<32} {}",
            def.phase.to_string(),
            if def.skippable { "yes" } else { "no" },
            format!("{}s", def.timeout_secs),
            outputs.join(", "),
            prereqs.join(", ")
        );
    }
    println!();
}

fn describe_check(check: &PrerequisiteCheck) -> String {
    match check {
        PrerequisiteCheck::NoActiveAttempt => "no active attempt".to_string(),
        PrerequisiteCheck::PriorOutput { phase, key } => format!("{}.{}", phase.name(), key),
        PrerequisiteCheck::External { name } => format!("check:{}", name),
    }
}

fn current_label(current_phase: u8) -> String {
    match Phase::from_index(current_phase) {
        Some(phase) => phase.to_string(),
        None if current_phase >= PHASE_COUNT => "finished".to_string(),
        None => current_phase.to_string(),
    }
}

fn styled_status(status: PhaseStatus) -> String {
    let text = format!("{:<12}", status.as_str());
    match status {
        PhaseStatus::Completed => style(text).green().to_string(),
        PhaseStatus::Skipped => style(text).cyan().to_string(),
        PhaseStatus::InProgress => style(text).yellow().to_string(),
        PhaseStatus::Failed => style(text).red().to_string(),
        PhaseStatus::NotStarted => style(text).dim().to_string(),
    }
}
