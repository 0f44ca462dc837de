use std::io;
use std::path::Path;

use tracing::dispatcher::DefaultGuard;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Layer;
use tracing_subscriber::{fmt, registry};

// Keeps the file writer and the subscriber alive. Logging stops when this is dropped.
#[allow(dead_code)]
pub struct LogGuards {
    log_guard: WorkerGuard,
    default: DefaultGuard,
}

/// Logs INFO and above to stdout and as json lines to `<dir>/log_<runner>.txt`.
pub fn init_logging(dir: &Path, runner: &str) -> LogGuards {
    let log_file_appender = rolling::never(dir, format!("log_{runner}.txt"));
    let (log_file, log_guard) = non_blocking(log_file_appender);
    let file_layer = fmt::Layer::new()
        .with_writer(log_file)
        .json()
        .with_ansi(false)
        .with_filter(LevelFilter::INFO);

    let console_layer = fmt::layer()
        .with_writer(io::stdout)
        .with_filter(LevelFilter::INFO);

    let collector = registry().with(file_layer).with(console_layer);
    let default = tracing::subscriber::set_default(collector);

    LogGuards { log_guard, default }
}

pub fn init_std_out_logging() -> DefaultGuard {
    let collector = registry().with(
        fmt::Layer::new()
            .with_writer(io::stdout)
            .with_filter(LevelFilter::INFO),
    );
    tracing::subscriber::set_default(collector)
}
