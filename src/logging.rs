//! Diagnostic tracing for the `phaseguard` binary.
//!
//! Library code only emits `tracing` events; this module installs the
//! subscriber. Output goes to stderr so stdout stays machine-readable.
//! `RUST_LOG` wins when set; otherwise the level is `warn`, or `info` with
//! `--verbose`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Log format selected with `PHASEGUARD_LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    pub fn from_env() -> Self {
        match std::env::var("PHASEGUARD_LOG_FORMAT").as_deref() {
            Ok("json") => Self::Json,
            _ => Self::Compact,
        }
    }
}

pub fn default_directive(verbose: bool) -> &'static str {
    if verbose { "info" } else { "warn" }
}

/// Install the global subscriber. Safe to call once per process.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let registry = tracing_subscriber::registry().with(filter);
    match LogFormat::from_env() {
        LogFormat::Json => registry
            .with(fmt::layer().with_writer(std::io::stderr).json())
            .init(),
        LogFormat::Compact => registry
            .with(fmt::layer().with_writer(std::io::stderr).compact())
            .init(),
    }
}
