use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initializes console and daily-rotated JSON file logging under `directory`.
///
/// The returned guard flushes the file writer when dropped, so keep it alive for the
/// lifetime of the process.
pub fn init_logging(directory: &Path) -> WorkerGuard {
    let _ = fs::create_dir_all(directory);

    let file_appender = tracing_appender::rolling::daily(directory, "gateway.log");
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer().json().with_writer(non_blocking_writer);
    let console_layer = fmt::layer().with_writer(std::io::stdout);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("secom_mms_gateway=info,tower_http=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    guard
}
