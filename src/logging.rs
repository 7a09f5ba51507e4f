//! Log subscriber setup.

use std::io::Write;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::error::{Error, Result};

pub const DEFAULT_LEVEL: &str = "info";

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL))
}

/// Installs the global subscriber writing to standard error.
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| Error::config(format!("failed to initialize logging: {e}")))
}

/// Installs the global subscriber writing to `writer`, without colors.
///
/// Used by workers to send their logs to the orchestrator's relay.
pub fn init_with_writer<W>(writer: W) -> Result<()>
where
    W: Write + Send + 'static,
{
    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_ansi(false)
        .with_writer(Mutex::new(writer))
        .try_init()
        .map_err(|e| Error::config(format!("failed to initialize logging: {e}")))
}
