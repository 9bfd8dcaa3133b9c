//! Advisory consultation command.

use anyhow::Result;
use std::path::Path;

use phaseguard::consult::SpecialistTask;
use phaseguard::phase::Phase;
use phaseguard::state::IssueId;

use super::super::Cli;
use super::{engine_config, print_json};

/// Consult the named specialists and print their bundles.
///
/// Always succeeds once configuration loads; unavailable specialists show up
/// as degraded bundles. One specialist prints a single object, several print
/// an array in the order given.
pub async fn cmd_consult(
    project_dir: &Path,
    cli: &Cli,
    issue: &IssueId,
    phase: Phase,
    specialists: &[String],
    question: Option<&str>,
) -> Result<()> {
    let bridge = engine_config(project_dir, cli)?.consultant_bridge();

    let tasks: Vec<SpecialistTask> = specialists
        .iter()
        .map(|name| {
            let task = SpecialistTask::new(name);
            match question {
                Some(q) => task.with_question(q),
                None => task,
            }
        })
        .collect();

    let mut bundles = bridge.consult_all(issue, phase, &tasks).await;
    if bundles.len() == 1 {
        let bundle = bundles.remove(0);
        print_json(&bundle)
    } else {
        print_json(&bundles)
    }
}
