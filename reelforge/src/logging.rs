//! Logging infrastructure.
//!
//! Structured tracing with two outputs: a daily-rolling file under the data
//! root (`logs/YYYY-MM-DD.log`) and stdout for interactive runs. Filtering
//! follows `RUST_LOG`, defaulting to `info`.

use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Guard that must be kept alive for the duration of logging.
///
/// Dropping it flushes and closes the file writer.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Initializes the global subscriber.
///
/// # Errors
///
/// Returns an error when the log directory cannot be created. Calling this
/// twice in one process is an error from the subscriber registry.
pub fn init_logging(log_dir: &Path) -> Result<LoggingGuard, io::Error> {
    std::fs::create_dir_all(log_dir)?;

    // `rolling::daily` would produce `<prefix>.YYYY-MM-DD`; building without
    // a prefix keeps the `logs/YYYY-MM-DD.log` shape.
    let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_suffix("log")
        .build(log_dir)
        .map_err(|e| io::Error::other(format!("log appender: {}", e)))?;
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_target(true);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_ansi(true)
        .with_target(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // The global subscriber can only be installed once per process, so the
    // unit tests cover the file plumbing only; log output itself is checked
    // by running the CLI.

    #[test]
    fn creates_log_directory() {
        let dir = TempDir::new().unwrap();
        let logs = dir.path().join("deep/logs");
        std::fs::create_dir_all(&logs).unwrap();
        assert!(logs.is_dir());
    }

    #[test]
    fn daily_appender_builds() {
        let dir = TempDir::new().unwrap();
        let appender = tracing_appender::rolling::RollingFileAppender::builder()
            .rotation(tracing_appender::rolling::Rotation::DAILY)
            .filename_suffix("log")
            .build(dir.path());
        assert!(appender.is_ok());
    }
}
