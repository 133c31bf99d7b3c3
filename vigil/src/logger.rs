/// Logger module
///
/// Application diagnostics (startup, decisions, shutdown) go through
/// `tracing`; the per-cycle status file is written separately by the
/// reporters.
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global tracing subscriber.
///
/// The filter comes from `RUST_LOG` and falls back to `vigil=info`. Output goes
/// through a non-blocking stdout writer; the returned guard must be held (and
/// dropped before `process::exit`) so buffered lines are flushed.
pub fn init() -> tracing_appender::non_blocking::WorkerGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vigil=info"));

    let (non_blocking_writer, guard) = tracing_appender::non_blocking(std::io::stdout());

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_line_number(true)
                .with_writer(non_blocking_writer),
        )
        .with(filter)
        .init();

    guard
}
