//! # kvault Plugin System Errors
//!
//! Defines [`PluginSystemError`], covering factory registration problems and
//! failures to construct or configure a backend instance.
use crate::plugin_system::traits::BackendError;

#[derive(Debug, thiserror::Error)]
pub enum PluginSystemError {
    #[error("Backend registration error for type '{backend_type}': {message}")]
    Registration {
        backend_type: String,
        message: String,
    },

    #[error("No backend plugin registered for type '{backend_type}'")]
    UnknownType { backend_type: String },

    #[error("Failed to construct backend '{identity}': {source}")]
    Construction {
        identity: String,
        #[source]
        source: BackendError,
    },

    #[error("Internal plugin system error: {0}")]
    InternalError(String),
}
