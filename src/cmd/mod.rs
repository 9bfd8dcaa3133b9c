//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module    | Commands handled                              |
//! |-----------|-----------------------------------------------|
//! | `phase`   | `Start`, `Skip`, `Complete`, `Resume`, `Reset` |
//! | `status`  | `Status`, `Phases`                            |
//! | `consult` | `Consult`                                     |
//! | `config`  | `Config`                                      |
//!
//! Commands print machine-readable JSON on stdout where an agent consumes the
//! result, and human-readable tables otherwise.

pub mod config;
pub mod consult;
pub mod phase;
pub mod status;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use phaseguard::config::EngineConfig;

use super::Cli;

pub use config::cmd_config;
pub use consult::cmd_consult;
pub use phase::{cmd_complete, cmd_reset, cmd_resume, cmd_start};
pub use status::{cmd_phases, cmd_status};

pub fn project_dir(cli: &Cli) -> Result<PathBuf> {
    match cli.project_dir.clone() {
        Some(dir) => Ok(dir),
        None => std::env::current_dir().context("Failed to get current directory"),
    }
}

/// Load the effective configuration for this invocation.
pub fn engine_config(project_dir: &Path, cli: &Cli) -> Result<EngineConfig> {
    EngineConfig::load(project_dir, cli.config.as_deref(), cli.state_dir.as_deref())
}

pub fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}
