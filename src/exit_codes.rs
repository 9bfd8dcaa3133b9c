//! Stable exit codes for phaseguard CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid arguments, configuration, I/O, or any other unclassified failure.
pub const FAILURE: i32 = 1;
/// Prerequisites not met or outputs failed validation. A JSON error list is printed.
pub const VALIDATION: i32 = 2;
/// Another attempt is active, or the completion handle no longer matches state.
pub const CONFLICT: i32 = 3;
/// The state file cannot be trusted. Requires `phaseguard reset`.
pub const CORRUPTION: i32 = 4;
