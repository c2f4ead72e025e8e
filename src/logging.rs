use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

const DEFAULT_FILTER: &str = "shellcache=info";

/// Initialize logging to stderr, plus a daily-rolling file when a log
/// directory is configured.
///
/// The returned guard flushes the file writer on drop; keep it alive for the
/// lifetime of the process.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(config.filter.as_deref().unwrap_or(DEFAULT_FILTER)))
    .map_err(|e| eyre!("Invalid log filter: {}", e))?;

  let (file_layer, guard) = match &config.dir {
    Some(dir) => {
      std::fs::create_dir_all(dir)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;
      let appender = tracing_appender::rolling::daily(dir, "shellcache.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      let layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(writer);
      (Some(layer), Some(guard))
    }
    None => (None, None),
  };

  tracing_subscriber::registry()
    .with(filter)
    .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
    .with(file_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}
