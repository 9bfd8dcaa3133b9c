use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use phaseguard::enforcer::DEFAULT_AGENT_TYPE;
use phaseguard::errors::EnforcementError;
use phaseguard::exit_codes;
use phaseguard::phase::Phase;
use phaseguard::state::IssueId;

mod cmd;

#[derive(Parser)]
#[command(name = "phaseguard")]
#[command(version, about = "Phase enforcement for agent-driven issue pipelines")]
pub struct Cli {
    /// Log state transitions to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Directory holding per-issue state files. Overrides PHASEGUARD_STATE_DIR and the config file.
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// Path to phaseguard.toml (default: .phaseguard/phaseguard.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a phase and print its handle
    Start {
        issue: IssueId,
        /// Phase number (0-5) or name
        phase: Phase,
        /// Label of the agent running the phase
        #[arg(long, default_value = DEFAULT_AGENT_TYPE)]
        agent: String,
    },
    /// Mark a skippable phase as skipped
    Skip {
        issue: IssueId,
        phase: Phase,
        #[arg(long, default_value = DEFAULT_AGENT_TYPE)]
        agent: String,
    },
    /// Submit outputs for an in-progress phase
    Complete {
        issue: IssueId,
        phase: Phase,
        /// started_at from the handle; defaults to the current in-progress attempt
        #[arg(long)]
        started_at: Option<DateTime<Utc>>,
        /// Outputs as a JSON object
        #[arg(long, conflicts_with = "outputs_file")]
        outputs: Option<String>,
        /// File containing the outputs JSON object
        #[arg(long)]
        outputs_file: Option<PathBuf>,
        /// File with advice bundles (from `consult`) to record under "advice"
        #[arg(long)]
        advice_file: Option<PathBuf>,
    },
    /// Print the next phase to run, or "done"
    Resume { issue: IssueId },
    /// Show phase progress for one issue, or every known issue
    Status {
        issue: Option<IssueId>,
        /// Print raw state JSON
        #[arg(long)]
        json: bool,
    },
    /// Move an issue's state file aside
    Reset {
        issue: IssueId,
        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },
    /// Show the effective phase catalog
    Phases {
        #[arg(long)]
        json: bool,
    },
    /// Ask advisory specialists about a phase
    Consult {
        issue: IssueId,
        phase: Phase,
        /// Specialist names from [specialists.*]
        #[arg(required = true, num_args = 1..)]
        specialists: Vec<String>,
        #[arg(short, long)]
        question: Option<String>,
    },
    /// View, validate, or create configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any problems
    Validate,
    /// Write a starter phaseguard.toml
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    phaseguard::logging::init(cli.verbose);

    let code = match run(&cli).await {
        Ok(()) => exit_codes::OK,
        Err(err) => report_error(&err),
    };
    std::process::exit(code);
}

async fn run(cli: &Cli) -> Result<()> {
    let project_dir = cmd::project_dir(cli)?;

    match &cli.command {
        Commands::Start {
            issue,
            phase,
            agent,
        } => cmd::cmd_start(&project_dir, cli, issue, *phase, agent, false).await,
        Commands::Skip {
            issue,
            phase,
            agent,
        } => cmd::cmd_start(&project_dir, cli, issue, *phase, agent, true).await,
        Commands::Complete {
            issue,
            phase,
            started_at,
            outputs,
            outputs_file,
            advice_file,
        } => cmd::cmd_complete(
            &project_dir,
            cli,
            issue,
            *phase,
            *started_at,
            outputs.as_deref(),
            outputs_file.as_deref(),
            advice_file.as_deref(),
        ),
        Commands::Resume { issue } => cmd::cmd_resume(&project_dir, cli, issue),
        Commands::Status { issue, json } => {
            cmd::cmd_status(&project_dir, cli, issue.as_ref(), *json)
        }
        Commands::Reset { issue, force } => cmd::cmd_reset(&project_dir, cli, issue, *force),
        Commands::Phases { json } => cmd::cmd_phases(&project_dir, cli, *json),
        Commands::Consult {
            issue,
            phase,
            specialists,
            question,
        } => {
            cmd::cmd_consult(&project_dir, cli, issue, *phase, specialists, question.as_deref())
                .await
        }
        Commands::Config { command } => cmd::cmd_config(&project_dir, cli, command.clone()),
    }
}

/// Print the error and return the process exit code.
///
/// Enforcement errors also get a JSON report on stdout for the calling agent.
fn report_error(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<EnforcementError>() {
        Some(enforcement) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&enforcement.report())
                    .unwrap_or_else(|_| enforcement.report().to_string())
            );
            eprintln!("Error: {:#}", err);
            for line in enforcement.errors() {
                eprintln!("  - {}", line);
            }
            if enforcement.is_fatal() {
                eprintln!("Run 'phaseguard reset <issue>' to move the state file aside.");
            }
            enforcement.exit_code()
        }
        None => {
            eprintln!("Error: {:#}", err);
            exit_codes::FAILURE
        }
    }
}
