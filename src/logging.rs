//! Tracing setup.
//!
//! Logs go to a daily rolling file so they never interleave with console
//! output. `RUST_LOG` overrides the configured level.

use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

const LOG_FILE_PREFIX: &str = "till.log";

/// Directory for log files: the configured one, else $XDG_DATA_HOME/till/logs.
pub fn log_dir(config: &LoggingConfig) -> Result<PathBuf> {
  match &config.directory {
    Some(dir) => Ok(dir.clone()),
    None => dirs::data_dir()
      .map(|d| d.join("till").join("logs"))
      .ok_or_else(|| eyre!("Could not determine data directory")),
  }
}

fn filter(config: &LoggingConfig) -> EnvFilter {
  EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer when dropped, so keep it for
/// the life of the process. With `verbose` set, logs are mirrored to stderr.
pub fn init(config: &LoggingConfig, verbose: bool) -> Result<WorkerGuard> {
  let dir = log_dir(config)?;
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let file_layer = fmt::layer().with_writer(writer).with_ansi(false);
  let stderr_layer = verbose.then(|| {
    fmt::layer()
      .with_writer(std::io::stderr)
      .with_target(false)
      .compact()
  });

  tracing_subscriber::registry()
    .with(filter(config))
    .with(file_layer)
    .with(stderr_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to initialise logging: {}", e))?;

  Ok(guard)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_configured_directory_wins() {
    let config = LoggingConfig {
      level: "debug".to_string(),
      directory: Some(PathBuf::from("/var/log/till")),
    };
    assert_eq!(log_dir(&config).unwrap(), PathBuf::from("/var/log/till"));
  }
}
