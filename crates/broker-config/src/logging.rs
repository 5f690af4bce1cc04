//! Structured logging sink, initialized once at startup from [`crate::LoggerConfig`].

use tracing_subscriber::EnvFilter;

use crate::LoggerConfig;

/// Initializes the global `tracing` subscriber. Returns a guard that must be
/// kept alive for the lifetime of the process when file logging is enabled
/// (dropping it flushes the non-blocking writer).
pub fn init_logging(config: &LoggerConfig) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let Some(path) = &config.file else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        tracing::info!(level = %config.level, "logging initialized (stdout)");
        return Ok(None);
    };

    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
    let file_name = path.file_name().ok_or_else(|| anyhow::anyhow!("logger.file has no file name: {}", path.display()))?;

    // tracing-appender rotates on a time boundary rather than a byte threshold;
    // daily rotation with `rotations` kept is the closest fit for the
    // max-size/rotations knobs this configuration exposes.
    let appender = tracing_appender::rolling::RollingFileAppender::builder()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix(file_name.to_string_lossy().to_string())
        .max_log_files(config.rotations.max(1))
        .build(dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();

    tracing::info!(level = %config.level, file = %path.display(), "logging initialized (rotating file)");
    Ok(Some(guard))
}
