//! Tracing subscriber setup for the `cards` binary.

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

pub const LOG_FILE_PREFIX: &str = "cards.log";

/// Build the filter, falling back to `fallback` when `directive` doesn't parse.
pub fn build_filter(directive: &str, fallback: &str) -> EnvFilter {
    EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Install the global subscriber.
///
/// Terminal output goes to stderr so command output on stdout stays clean.
/// When `file_dir` is set, a second layer writes daily-rolling files there;
/// the returned guard must be held until exit or buffered lines are lost.
pub fn init_tracing(
    filter: &str,
    json: bool,
    file_dir: Option<&Path>,
) -> Result<Option<WorkerGuard>> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::with_capacity(2);
    let terminal_layer = if json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(build_filter(filter, crate::config::DEFAULT_LOG_FILTER))
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_writer(std::io::stderr)
            .compact()
            .with_filter(build_filter(filter, crate::config::DEFAULT_LOG_FILTER))
            .boxed()
    };

    layers.push(terminal_layer);

    let guard = match file_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(build_filter(filter, crate::config::DEFAULT_LOG_FILTER))
                .boxed();
            layers.push(layer);
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .context("A tracing subscriber is already installed")?;

    Ok(guard)
}
