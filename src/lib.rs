//! Phase enforcement for agent-driven issue resolution pipelines.
//!
//! An issue moves through six phases (Investigation, Planning,
//! Implementation, Validation, Delivery, Monitoring). Every phase start is
//! gated by [`enforcer::PhaseEnforcer::enforce_start`] and every completion by
//! [`enforcer::PhaseEnforcer::complete_phase`]; progress survives process
//! restarts in one JSON state file per issue.

pub mod catalog;
pub mod checks;
pub mod config;
pub mod consult;
pub mod enforcer;
pub mod errors;
pub mod exit_codes;
pub mod logging;
pub mod phase;
pub mod state;
pub mod validator;
