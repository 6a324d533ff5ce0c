//! # kvault Logging
//!
//! Installs the process-wide `tracing` subscriber for kvault hosts. Library
//! crates log through the `log` facade; [`init`] bridges those records into
//! `tracing` and writes them to stderr, as text or as JSON lines.
//!
//! `RUST_LOG` overrides the configured level when it is set.
use serde::Deserialize;
use thiserror::Error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Directive used when neither `RUST_LOG` nor a level is given
pub const DEFAULT_LEVEL: &str = "info";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log filter '{directive}': {message}")]
    InvalidFilter { directive: String, message: String },

    #[error("Logging is already initialized: {0}")]
    AlreadyInitialized(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// An `EnvFilter` directive, e.g. `debug` or `kvault_core=trace,info`
    pub level: String,
    /// Emit JSON lines instead of human-readable text
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LEVEL.to_string(),
            json: false,
        }
    }
}

impl LoggingConfig {
    pub fn new(level: &str) -> Self {
        Self {
            level: level.to_string(),
            ..Self::default()
        }
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }
}

/// Build the filter from the `RUST_LOG` value, if any, else from `level`
pub fn build_filter(env_directive: Option<&str>, level: &str) -> Result<EnvFilter, LoggingError> {
    let directive = match env_directive.map(str::trim) {
        Some(env) if !env.is_empty() => env,
        _ => level,
    };
    EnvFilter::try_new(directive).map_err(|e| LoggingError::InvalidFilter {
        directive: directive.to_string(),
        message: e.to_string(),
    })
}

/// Install the global subscriber and the `log` bridge.
///
/// Fails, without panicking, when a subscriber or logger is already set.
pub fn init(config: &LoggingConfig) -> Result<(), LoggingError> {
    let env_directive = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = build_filter(env_directive.as_deref(), &config.level)?;

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(config.json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!config.json).then(|| fmt::layer().with_writer(std::io::stderr)));

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;
    tracing_log::LogTracer::init().map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    log::debug!("Logging initialized (level '{}', json {})", config.level, config.json);
    Ok(())
}
