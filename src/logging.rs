use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::log_dir;

/// Environment variable holding the log filter, e.g. `MF_LOG=mf=debug`.
pub const LOG_ENV: &str = "MF_LOG";
const DEFAULT_FILTER: &str = "mf=info";

fn filter() -> EnvFilter {
  EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber. Logs go to a daily rolling file so they
/// never mix with the pager on stdout; without a data directory they go to
/// stderr. Keep the returned guard alive until exit.
pub fn init() -> Result<Option<WorkerGuard>> {
  let Some(dir) = log_dir() else {
    tracing_subscriber::registry()
      .with(filter())
      .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
      .try_init()
      .context("Failed to install log subscriber")?;
    return Ok(None);
  };

  std::fs::create_dir_all(&dir).with_context(|| format!("Failed to create log directory {}", dir.display()))?;
  let appender = tracing_appender::rolling::daily(&dir, "mf.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);
  tracing_subscriber::registry()
    .with(filter())
    .with(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false))
    .try_init()
    .context("Failed to install log subscriber")?;
  Ok(Some(guard))
}
