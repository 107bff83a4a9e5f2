use std::fs::OpenOptions;
use std::io;
use std::path::Path;

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{LogFormat, LogLevel};

/// Set up the global tracing subscriber for one analyzer run.
///
/// With `--log-file` the log is appended to that file with ANSI codes
/// suppressed; otherwise it goes to stderr, which keeps progress ticks
/// visible while the run is driven from a shell script. `RUST_LOG`
/// overrides `level` when set. Must be called exactly once, before any
/// pipeline stage spawns.
pub fn init_logging(
    level: LogLevel,
    format: LogFormat,
    log_file: Option<&Path>,
) -> io::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    // A failed open surfaces here, before the subscriber is installed,
    // so a bad --log-file aborts the run instead of losing the log.
    let (writer, ansi) = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            (BoxMakeWriter::new(std::sync::Arc::new(file)), false)
        }
        None => (BoxMakeWriter::new(io::stderr), true),
    };

    let layer = fmt::layer().with_writer(writer).with_target(true);
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(layer.json().flatten_event(true).with_ansi(false))
            .init(),
        LogFormat::Text => registry.with(layer.with_ansi(ansi)).init(),
    }
    Ok(())
}
