//! Tracing subscriber setup for binaries.

use crate::types::{GinError, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Installs a global `fmt` subscriber filtered by `level`, which accepts any
/// `EnvFilter` directive such as `info` or `gincheck=debug`.
pub fn init_logging(level: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(level).map_err(|_| GinError::Invalid("invalid log filter"))?,
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|_| GinError::Invalid("logging already initialized"))
}
