//! Tracing subscriber setup for binaries and tests.

use tracing_subscriber::{fmt, EnvFilter};

use crate::types::{Result, SombraError};

/// Installs a global fmt subscriber filtered by `level` (an `EnvFilter` directive).
///
/// Fails when the directive does not parse or a subscriber is already installed.
pub fn init_logging(level: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(level)
                .map_err(|e| SombraError::invalid(format!("invalid log level: {e}")))?,
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .map_err(|_| SombraError::invalid("logging already initialized"))
}
