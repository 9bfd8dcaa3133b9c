//! Named external checks consulted as phase prerequisites.
//!
//! The engine depends only on each check's pass/fail contract. Checks are
//! registered by name in a [`CheckRegistry`]; the enforcer evaluates the names
//! a phase definition references, concurrently and each under its own timeout,
//! and hands the results to the pure validator. A timeout, an error, or an
//! unregistered name is a failed check, never a crash.
//!
//! ## Components
//!
//! - [`ExternalCheck`]: async trait implemented by every check
//! - [`FnCheck`]: adapter for synchronous closures
//! - [`command::CommandCheck`]: runs a shell command, exit 0 passes

pub mod command;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::phase::Phase;
use crate::state::IssueId;

pub use command::{CheckCommandConfig, CommandCheck};

/// Default timeout for a single external check.
pub const DEFAULT_CHECK_TIMEOUT_SECS: u64 = 30;

/// What a check is being asked about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckContext {
    pub issue_id: IssueId,
    pub phase: Phase,
}

/// Result of one external check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckOutcome {
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CheckOutcome {
    pub fn pass() -> Self {
        Self {
            passed: true,
            message: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: Some(message.into()),
        }
    }
}

/// A named boolean condition outside the engine (tracker, VCS, CI, ...).
#[async_trait]
pub trait ExternalCheck: Send + Sync {
    async fn run(&self, ctx: &CheckContext) -> Result<CheckOutcome>;
}

/// Wraps a synchronous closure as an [`ExternalCheck`].
pub struct FnCheck<F>(pub F);

#[async_trait]
impl<F> ExternalCheck for FnCheck<F>
where
    F: Fn(&CheckContext) -> CheckOutcome + Send + Sync,
{
    async fn run(&self, ctx: &CheckContext) -> Result<CheckOutcome> {
        Ok((self.0)(ctx))
    }
}

struct RegisteredCheck {
    check: Arc<dyn ExternalCheck>,
    timeout: Duration,
}

/// Registry of named external checks.
pub struct CheckRegistry {
    checks: HashMap<String, RegisteredCheck>,
    default_timeout: Duration,
}

impl Default for CheckRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_CHECK_TIMEOUT_SECS))
    }
}

impl CheckRegistry {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            checks: HashMap::new(),
            default_timeout,
        }
    }

    /// Register `check` under `name` with the registry's default timeout.
    pub fn register(&mut self, name: &str, check: impl ExternalCheck + 'static) -> &mut Self {
        let timeout = self.default_timeout;
        self.register_with_timeout(name, check, timeout)
    }

    pub fn register_with_timeout(
        &mut self,
        name: &str,
        check: impl ExternalCheck + 'static,
        timeout: Duration,
    ) -> &mut Self {
        self.checks.insert(
            name.to_string(),
            RegisteredCheck {
                check: Arc::new(check),
                timeout,
            },
        );
        self
    }

    /// Build a registry from `[checks.<name>]` command definitions.
    pub fn from_commands(
        commands: &BTreeMap<String, CheckCommandConfig>,
        working_dir: &std::path::Path,
        default_timeout: Duration,
    ) -> Self {
        let mut registry = Self::new(default_timeout);
        for (name, cfg) in commands {
            let timeout = cfg
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(default_timeout);
            registry.register_with_timeout(
                name,
                CommandCheck::new(name, &cfg.command, cfg.working_dir.as_deref(), working_dir),
                timeout,
            );
        }
        registry
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.checks.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.checks.contains_key(name)
    }

    /// Run the named checks concurrently. Every name gets an outcome.
    pub async fn evaluate(&self, names: &[&str], ctx: &CheckContext) -> ExternalCheckResults {
        let unique: BTreeSet<&str> = names.iter().copied().collect();
        let futures = unique.into_iter().map(|name| async move {
            let outcome = self.evaluate_one(name, ctx).await;
            (name.to_string(), outcome)
        });

        let results: BTreeMap<String, CheckOutcome> = join_all(futures).await.into_iter().collect();
        ExternalCheckResults(results)
    }

    async fn evaluate_one(&self, name: &str, ctx: &CheckContext) -> CheckOutcome {
        let Some(registered) = self.checks.get(name) else {
            return CheckOutcome::fail(format!("external check '{}' is not registered", name));
        };

        let outcome = match tokio::time::timeout(registered.timeout, registered.check.run(ctx)).await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => CheckOutcome::fail(format!("external check '{}' errored: {:#}", name, e)),
            Err(_) => CheckOutcome::fail(format!(
                "external check '{}' timed out after {}s",
                name,
                registered.timeout.as_secs()
            )),
        };

        tracing::debug!(
            check = name,
            issue = %ctx.issue_id,
            phase = ctx.phase.index(),
            passed = outcome.passed,
            "external check evaluated"
        );
        outcome
    }
}

/// Outcomes of an evaluation pass, keyed by check name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExternalCheckResults(BTreeMap<String, CheckOutcome>);

impl ExternalCheckResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, outcome: CheckOutcome) -> Self {
        self.0.insert(name.to_string(), outcome);
        self
    }

    pub fn get(&self, name: &str) -> Option<&CheckOutcome> {
        self.0.get(name)
    }
}
