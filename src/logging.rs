use std::fs;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initializes logging: human-readable console output plus daily-rotated
/// JSON files under `logs/`.
pub fn init_logging() {
    let _ = fs::create_dir_all("logs");

    // Non-blocking appender so slow disks never stall the pipeline
    let file_appender = tracing_appender::rolling::daily("logs", "tablemill.log");
    let (non_blocking_writer, _guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer().json().with_writer(non_blocking_writer);
    let console_layer = fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("tablemill=info".parse().unwrap()))
        .with(file_layer)
        .with(console_layer)
        .init();

    // The guard must outlive main or buffered events are dropped on exit
    std::mem::forget(_guard);
}
