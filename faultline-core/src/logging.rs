//! Diagnostic output for the agent itself
//!
//! Dropped, suspended and merged events are only ever reported through
//! `tracing`. Hosts that already install a subscriber get these records for
//! free; hosts that don't can call [`init`] to write them to
//! `$XDG_STATE_HOME/faultline/faultline.log`.

use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Install a global subscriber writing to a daily log file.
///
/// `RUST_LOG` wins over `config.level`. Fails if the state directory cannot
/// be created or another subscriber is already installed. Keep the returned
/// guard alive for as long as records should reach the file.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard> {
    let log_dir = Config::state_dir();
    std::fs::create_dir_all(&log_dir)?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("faultline.log")
        .max_log_files(config.max_files.max(1))
        .build(&log_dir)
        .map_err(|e| Error::Config(format!("cannot open log file in {}: {}", log_dir.display(), e)))?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true),
        )
        .try_init()
        .map_err(|e| Error::Config(format!("a tracing subscriber is already installed: {}", e)))?;

    tracing::info!(log_dir = %log_dir.display(), level = %config.level, "faultline logging enabled");

    Ok(LoggingGuard { _worker: guard })
}

/// Route records to the test harness output. Repeated calls are ignored.
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .with_span_events(FmtSpan::CLOSE)
        .try_init();
}

/// Flushes buffered records to the log file on drop.
pub struct LoggingGuard {
    _worker: WorkerGuard,
}

/// Where [`init`] writes.
pub fn log_file_path() -> PathBuf {
    Config::log_path()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_lives_in_state_dir() {
        let path = log_file_path();
        assert!(path.ends_with("faultline.log"));
        assert!(path.starts_with(Config::state_dir()));
    }

    #[test]
    fn test_init_test_is_idempotent() {
        init_test();
        init_test();
        tracing::info!("still logging");
    }
}
