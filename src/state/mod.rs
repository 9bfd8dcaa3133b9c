//! Per-issue workflow state and its file-backed store.
//!
//! Every engine operation is load-mutate-save against one JSON file per issue;
//! there is no process-wide cache that could diverge from the file.

pub mod store;
pub mod types;

mod property_tests;

pub use store::{STATE_SCHEMA, STATE_VERSION, StateStore};
pub use types::{IssueId, PhaseOutputs, PhaseRecord, WorkflowState};
