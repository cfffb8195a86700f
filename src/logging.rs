//! Log setup for the host binary.

use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Filter variable, e.g. `SHIPSYNC_LOG=shipsync=debug`.
pub const LOG_ENV: &str = "SHIPSYNC_LOG";
const DEFAULT_FILTER: &str = "shipsync=info";

/// Directory holding the daily log files.
pub fn log_dir() -> Result<PathBuf> {
  let dir = dirs::data_dir()
    .ok_or_else(|| eyre!("Could not determine data directory"))?
    .join("shipsync")
    .join("logs");
  Ok(dir)
}

/// Send tracing output to a daily rolling file in `dir`.
///
/// The returned guard flushes buffered lines on drop; keep it alive for the
/// life of the process.
pub fn init(dir: &Path) -> Result<WorkerGuard> {
  std::fs::create_dir_all(dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
  let appender = tracing_appender::rolling::daily(dir, "shipsync.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .try_init()
    .map_err(|e| eyre!("Failed to install log subscriber: {}", e))?;

  Ok(guard)
}
