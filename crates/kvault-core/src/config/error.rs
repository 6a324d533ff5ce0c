//! # kvault Configuration Errors
//!
//! Defines [`ConfigError`]. Configuration problems always fail closed: the
//! resolver never falls back to an arbitrary backend when the configuration
//! is ambiguous or incomplete.
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no backend named '{name}' is configured (configured backends: {})", .configured.join(", "))]
    UnknownBackend { name: String, configured: Vec<String> },

    #[error("backend '{backend}' is missing required field '{field}'")]
    MissingField { backend: String, field: String },

    #[error("backend '{backend}' has type '{backend_type}', which no loaded plugin provides (available: {})", .available.join(", "))]
    UnsupportedType {
        backend: String,
        backend_type: String,
        available: Vec<String>,
    },

    #[error("conflicting configuration for type={backend_type} id={id} (backends '{first}' and '{second}')")]
    Conflict {
        backend_type: String,
        id: String,
        first: String,
        second: String,
    },

    #[error("backend '{backend}' setting '{field}' is invalid: {message}")]
    InvalidSetting {
        backend: String,
        field: String,
        message: String,
    },

    #[error("environment '{environment}' is not a valid namespace: {message}")]
    InvalidEnvironment { environment: String, message: String },

    #[error("unsupported configuration format for path: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("failed to load configuration from '{path}': {message}")]
    Load { path: PathBuf, message: String },
}
