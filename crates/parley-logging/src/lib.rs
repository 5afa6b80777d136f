//! # parley-logging
//!
//! Installs the process-wide `tracing` subscriber.
//!
//! The level comes from settings unless `RUST_LOG` is set, in which case the
//! environment wins. Output is either human-readable or one JSON object per
//! event, with targets and span lists included.

#![deny(unsafe_code)]

use parley_settings::{LogFormat, LoggingSettings};
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Fallback directive when the configured level does not parse.
const DEFAULT_DIRECTIVE: &str = "info";

/// Errors from logging setup.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// A global subscriber was already installed.
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing_subscriber::util::TryInitError),
}

/// Install the global subscriber. Call once at startup.
pub fn init_logging(settings: &LoggingSettings) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| level_filter(&settings.level));

    let fmt_layer = match settings.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(filter)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(filter)
            .boxed(),
    };

    tracing_subscriber::registry().with(fmt_layer).try_init()?;
    Ok(())
}

/// Build a filter from a configured directive, ignoring `RUST_LOG`.
///
/// Unparseable directives fall back to `info` with a note on stderr, since no
/// subscriber exists yet to report it.
pub fn level_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|e| {
        eprintln!("parley-logging: invalid log level {level:?} ({e}), using {DEFAULT_DIRECTIVE}");
        EnvFilter::new(DEFAULT_DIRECTIVE)
    })
}
