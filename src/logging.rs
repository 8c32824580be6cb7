//! Tracing setup for partsnap.
//!
//! Operator-facing text goes through the `Reporter`; tracing carries the
//! structured diagnostics next to it, as pretty text or as JSON. A second
//! layer keeps a full debug log of the session in a file, so a failed run can
//! leave it on the media.

use std::fs::File;
use std::path::PathBuf;

use tracing::{Level, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Emit one JSON object per event.
    pub json: bool,
    /// Default to DEBUG instead of WARN.
    pub verbose: bool,
    /// Session log, truncated at start and always written at DEBUG.
    pub file: Option<PathBuf>,
}

/// Install the global subscriber. `RUST_LOG` overrides the console filter.
///
/// Console logs go to stderr so they never interleave with the progress lines
/// printed on stdout. The returned guard flushes the session log when dropped.
pub fn init(config: LogConfig) -> Option<WorkerGuard> {
    let default_level = if config.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directive(default_level)));

    let console = if config.json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed()
    };

    let mut unavailable = None;
    let (writer, guard) = match config.file.as_ref().map(|path| (path, File::create(path))) {
        Some((_, Ok(file))) => {
            let (writer, guard) = tracing_appender::non_blocking(file);
            (Some(writer), Some(guard))
        }
        Some((path, Err(e))) => {
            unavailable = Some((path.clone(), e));
            (None, None)
        }
        None => (None, None),
    };
    let session = writer.map(|writer| {
        fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(writer)
            .with_filter(EnvFilter::new(directive(Level::DEBUG)))
    });

    tracing_subscriber::registry()
        .with(console.with_filter(env_filter))
        .with(session)
        .init();

    if let Some((path, e)) = unavailable {
        warn!(path = %path.display(), error = %e, "Session log unavailable");
    }
    guard
}

fn directive(level: Level) -> String {
    format!("partsnap={}", level.as_str().to_lowercase())
}
