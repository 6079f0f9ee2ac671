//! # courier-logging
//!
//! Structured logging with `tracing` for the courier container.
//!
//! Logs go to stderr by default, or to an append-mode file when the
//! deployment configures one (container stdout is often swallowed by the
//! host, so a file on a shared volume is the usual choice). The broker
//! client libraries are pinned to `warn` so connection chatter does not
//! drown application logs.

#![deny(unsafe_code)]

use std::fs::OpenOptions;
use std::sync::Arc;

use courier_settings::LoggingSettings;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Errors raised while setting up logging.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The configured filter directive was not parseable.
    #[error("invalid log filter {directive:?}: {message}")]
    InvalidFilter {
        /// The rejected directive.
        directive: String,
        /// Parser error text.
        message: String,
    },
    /// The configured log file could not be opened.
    #[error("failed to open log file: {0}")]
    Io(#[from] std::io::Error),
}

/// Directives appended after the user filter, silencing broker internals.
const LIBRARY_DIRECTIVES: &str = "lapin=warn,pinky_swear=warn";

/// Build the effective filter from the configured directive.
fn build_filter(filter: &str) -> Result<EnvFilter, LoggingError> {
    let directives = format!("{filter},{LIBRARY_DIRECTIVES}");
    EnvFilter::try_new(&directives).map_err(|e| LoggingError::InvalidFilter {
        directive: filter.to_owned(),
        message: e.to_string(),
    })
}

/// Install the global tracing subscriber from logging settings.
///
/// Safe to call more than once: if a global subscriber is already set
/// (common in test binaries), the existing one is left in place.
pub fn init_logging(settings: &LoggingSettings) -> Result<(), LoggingError> {
    let filter = build_filter(&settings.filter)?;

    match &settings.file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .with_target(true)
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .try_init();
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
