//! Logging setup for the registry daemon.
//!
//! Filter precedence: `logging.level` from config, then `RUST_LOG`, then
//! "info". Stdout always gets a layer in the configured format; a rolling
//! file layer is attached when `logging.enable_file_logging` is set.

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::{prelude::*, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};

/// Keeps the buffered file writer flushing. Hold it for the lifetime of the
/// process; dropping it flushes and stops the appender.
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber from the logging configuration.
pub fn init(cfg: &LoggingConfig) -> LogGuard {
    let filter = match &cfg.level {
        Some(level) => EnvFilter::new(level.as_str()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let (file_writer, file_guard) = if cfg.enable_file_logging {
        rolling_writer(cfg)
    } else {
        (None, None)
    };

    match cfg.format {
        LogFormat::Json => {
            let stdout = tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(std::io::stdout);
            let file = file_writer.map(|writer| {
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_timer(UtcTime::rfc_3339())
                    .with_writer(writer)
            });
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(stdout)
                .with(file)
                .try_init();
        }
        LogFormat::Text => {
            let stdout = tracing_subscriber::fmt::layer()
                .with_ansi(true)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(std::io::stdout);
            let file = file_writer.map(|writer| {
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_timer(UtcTime::rfc_3339())
                    .with_writer(writer)
            });
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(stdout)
                .with(file)
                .try_init();
        }
    }

    LogGuard { _file: file_guard }
}

/// Non-blocking rolling file writer per the config; `None` (with a warning
/// on stderr) when the log directory cannot be created.
fn rolling_writer(cfg: &LoggingConfig) -> (Option<NonBlocking>, Option<WorkerGuard>) {
    if std::fs::create_dir_all(&cfg.dir).is_err() {
        eprintln!(
            "Cannot create log directory '{}'; file logging disabled",
            cfg.dir
        );
        return (None, None);
    }

    let rotation = match cfg.rotation.to_lowercase().as_str() {
        "hourly" => Rotation::HOURLY,
        "never" => Rotation::NEVER,
        _ => Rotation::DAILY,
    };
    let appender = RollingFileAppender::new(rotation, &cfg.dir, &cfg.filename);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    (Some(writer), Some(guard))
}
