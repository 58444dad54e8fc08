//! Tracing subscriber setup.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::{ConfigError, LogFormat, LoggingConfig};

/// File name prefix of rotated log files.
pub const LOG_FILE_PREFIX: &str = "fpmsight-exporter.log";

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over the configured level. When
/// `config.directory` is set, logs go to daily rotated files there and the
/// returned guard must be kept alive until shutdown so buffered lines are
/// flushed.
pub fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>, ConfigError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let (writer, guard) = match &config.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (fmt::writer::BoxMakeWriter::new(writer), Some(guard))
        }
        None => (fmt::writer::BoxMakeWriter::new(std::io::stdout), None),
    };
    let ansi = config.directory.is_none();

    let result = match config.format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer().with_writer(writer).with_ansi(ansi))
            .with(filter)
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(writer))
            .with(filter)
            .try_init(),
    };

    result.map_err(|e| {
        ConfigError::Validation(format!("Failed to initialize tracing: {}", e))
    })?;

    Ok(guard)
}
