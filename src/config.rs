//! Configuration loading for phaseguard.
//!
//! Settings come from `.phaseguard/phaseguard.toml` under the project
//! directory. A missing file means built-in defaults. The state directory is
//! layered: `--state-dir` flag, then `PHASEGUARD_STATE_DIR`, then
//! `[engine] state_dir`, then `.phaseguard/state`. Relative paths resolve
//! against the project directory.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::catalog::{CatalogIssue, IssueLevel, PhaseCatalog, PhaseOverride};
use crate::checks::{CheckCommandConfig, CheckRegistry, DEFAULT_CHECK_TIMEOUT_SECS};
use crate::consult::{ConsultantBridge, DEFAULT_CONSULT_TIMEOUT_SECS, SpecialistCommandConfig};
use crate::enforcer::PhaseEnforcer;
use crate::state::StateStore;

/// Directory holding the config file and, by default, state.
pub const CONFIG_DIR: &str = ".phaseguard";
pub const CONFIG_FILE: &str = "phaseguard.toml";
pub const STATE_DIR_ENV: &str = "PHASEGUARD_STATE_DIR";
pub const DEFAULT_STATE_DIR: &str = ".phaseguard/state";

/// Written by `phaseguard config init`.
pub const STARTER_CONFIG: &str = r#"# phaseguard configuration

[engine]
state_dir = ".phaseguard/state"
check_timeout_secs = 30
consult_timeout_secs = 120

# Per-phase overrides. Keys are phase names or numbers (0-5).
#
# [phases.validation]
# timeout_secs = 1200
# required_outputs = ["testsPassed", "coverageReport"]
# prerequisites = [
#     { kind = "no_active_attempt" },
#     { kind = "external", name = "ci_green" },
# ]

# External checks run under `sh -c`; exit 0 passes.
#
# [checks.ci_green]
# command = "gh pr checks \"$PHASEGUARD_ISSUE\""
# timeout_secs = 20

# Advisory specialists receive the request as JSON on stdin.
#
# [specialists.security]
# command = "./scripts/security-review.sh"
# timeout_secs = 300
"#;

/// `[engine]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
    #[serde(default = "default_check_timeout")]
    pub check_timeout_secs: u64,
    #[serde(default = "default_consult_timeout")]
    pub consult_timeout_secs: u64,
}

fn default_check_timeout() -> u64 {
    DEFAULT_CHECK_TIMEOUT_SECS
}

fn default_consult_timeout() -> u64 {
    DEFAULT_CONSULT_TIMEOUT_SECS
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            state_dir: None,
            check_timeout_secs: default_check_timeout(),
            consult_timeout_secs: default_consult_timeout(),
        }
    }
}

/// The complete `phaseguard.toml` structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PhaseguardToml {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub phases: BTreeMap<String, PhaseOverride>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub checks: BTreeMap<String, CheckCommandConfig>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub specialists: BTreeMap<String, SpecialistCommandConfig>,
}

impl PhaseguardToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse phaseguard.toml")
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize phaseguard.toml")
    }
}

/// Effective configuration for one invocation.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub project_dir: PathBuf,
    pub config_file: PathBuf,
    /// Whether `config_file` existed and was read.
    pub config_loaded: bool,
    pub state_dir: PathBuf,
    pub file: PhaseguardToml,
}

impl EngineConfig {
    /// Load configuration for `project_dir`.
    ///
    /// An explicit `config_file` must exist; the default location may be absent.
    pub fn load(
        project_dir: &Path,
        config_file: Option<&Path>,
        state_dir_flag: Option<&Path>,
    ) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .with_context(|| format!("Failed to resolve project directory: {}", project_dir.display()))?;

        let (config_path, required) = match config_file {
            Some(path) => (path.to_path_buf(), true),
            None => (Self::default_config_path(&project_dir), false),
        };

        let (file, config_loaded) = if config_path.exists() {
            (PhaseguardToml::load(&config_path)?, true)
        } else if required {
            bail!("Config file not found: {}", config_path.display());
        } else {
            (PhaseguardToml::default(), false)
        };

        let env_state_dir = std::env::var(STATE_DIR_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        let state_dir = resolve_state_dir(
            &project_dir,
            state_dir_flag,
            env_state_dir.as_deref(),
            file.engine.state_dir.as_deref(),
        );

        tracing::debug!(
            project = %project_dir.display(),
            config = %config_path.display(),
            loaded = config_loaded,
            state_dir = %state_dir.display(),
            "configuration resolved"
        );

        Ok(Self {
            project_dir,
            config_file: config_path,
            config_loaded,
            state_dir,
            file,
        })
    }

    pub fn default_config_path(project_dir: &Path) -> PathBuf {
        project_dir.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    pub fn catalog(&self) -> Result<PhaseCatalog> {
        PhaseCatalog::with_overrides(&self.file.phases)
    }

    pub fn check_registry(&self) -> CheckRegistry {
        CheckRegistry::from_commands(
            &self.file.checks,
            &self.project_dir,
            Duration::from_secs(self.file.engine.check_timeout_secs),
        )
    }

    pub fn consultant_bridge(&self) -> ConsultantBridge {
        ConsultantBridge::from_commands(
            &self.file.specialists,
            &self.project_dir,
            Duration::from_secs(self.file.engine.consult_timeout_secs),
        )
    }

    pub fn store(&self) -> StateStore {
        StateStore::new(&self.state_dir)
    }

    pub fn enforcer(&self) -> Result<PhaseEnforcer> {
        Ok(PhaseEnforcer::new(self.store(), self.catalog()?))
    }

    /// Problems with the effective configuration, errors first.
    pub fn validate(&self) -> Result<Vec<CatalogIssue>> {
        let catalog = self.catalog()?;
        let mut issues = catalog.validate(&self.check_registry().names());
        issues.sort_by_key(|i| (i.level != IssueLevel::Error, i.phase));
        Ok(issues)
    }
}

/// Flag, then environment, then file, then default. Relative results are
/// joined onto `project_dir`.
pub fn resolve_state_dir(
    project_dir: &Path,
    flag: Option<&Path>,
    env: Option<&Path>,
    file: Option<&Path>,
) -> PathBuf {
    let chosen = flag
        .or(env)
        .or(file)
        .unwrap_or_else(|| Path::new(DEFAULT_STATE_DIR));
    if chosen.is_absolute() {
        chosen.to_path_buf()
    } else {
        project_dir.join(chosen)
    }
}

/// Write [`STARTER_CONFIG`] to the default location. Refuses to overwrite unless `force`.
pub fn write_starter(project_dir: &Path, force: bool) -> Result<PathBuf> {
    let path = EngineConfig::default_config_path(project_dir);
    if path.exists() && !force {
        bail!(
            "Config file already exists: {} (use --force to overwrite)",
            path.display()
        );
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(&path, STARTER_CONFIG)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;
    Ok(path)
}
