//! Tracing integration for structured logging
//!
//! Events always go to stderr; with `--log-file` they are also appended to
//! a file, matching the way capture operators tail a log next to the
//! console. `RUST_LOG` overrides the level chosen by `--debug`.

use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::Mutex;

use clap::ValueEnum;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Default filter directives for a verbosity
fn default_directives(debug: bool) -> String {
    let level = if debug { "debug" } else { "info" };
    format!(
        "wavpulld={},wavpull_daemon={},wavpull_common={}",
        level, level, level
    )
}

fn fmt_layer<W>(writer: W, format: LogFormat, ansi: bool, debug: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(debug);

    match format {
        LogFormat::Text => layer.boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

/// Install the global subscriber
///
/// # Errors
///
/// Fails if the log file cannot be opened or a subscriber is already set.
pub fn init_logging(debug: bool, log_file: Option<&Path>, format: LogFormat) -> io::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(debug)));

    let mut layers = vec![fmt_layer(io::stderr, format, true, debug)];
    if let Some(path) = log_file {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        layers.push(fmt_layer(Mutex::new(file), format, false, debug));
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| io::Error::other(e.to_string()))
}
