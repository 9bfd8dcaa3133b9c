//! Configuration view and validation commands: `phaseguard config`.

use anyhow::{Result, bail};
use std::path::Path;

use phaseguard::catalog::IssueLevel;
use phaseguard::config::write_starter;

use super::super::{Cli, ConfigCommands};
use super::engine_config;

pub fn cmd_config(project_dir: &Path, cli: &Cli, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            let config = engine_config(project_dir, cli)?;
            if config.config_loaded {
                println!("# Config file: {}", config.config_file.display());
            } else {
                println!(
                    "# No config file at {}; using defaults",
                    config.config_file.display()
                );
            }
            println!("# Effective state_dir: {}", config.state_dir.display());
            println!();

            let mut effective = config.file.clone();
            effective.engine.state_dir = Some(config.state_dir.clone());
            print!("{}", effective.to_toml_string()?);
        }
        Some(ConfigCommands::Validate) => {
            let config = engine_config(project_dir, cli)?;
            let issues = config.validate()?;

            if issues.is_empty() {
                println!("Configuration is valid.");
                return Ok(());
            }

            let mut errors = 0;
            for issue in &issues {
                let level = match issue.level {
                    IssueLevel::Error => {
                        errors += 1;
                        console::style("error").red()
                    }
                    IssueLevel::Warning => console::style("warning").yellow(),
                };
                println!("{}: phase {}: {}", level, issue.phase, issue.message);
            }

            if errors > 0 {
                bail!("Configuration has {} error(s)", errors);
            }
        }
        Some(ConfigCommands::Init { force }) => {
            let path = write_starter(project_dir, force)?;
            println!("Created {}", path.display());
            println!();
            println!("You can now customize:");
            println!("  - [engine] state_dir, check_timeout_secs, consult_timeout_secs");
            println!("  - [phases.<name>] timeout_secs, required_outputs, prerequisites");
            println!("  - [checks.<name>] and [specialists.<name>] commands");
        }
    }

    Ok(())
}
