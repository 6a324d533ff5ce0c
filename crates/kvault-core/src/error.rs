//! # kvault Errors
//!
//! Defines [`KvError`], the error returned by every [`KvAdapter`](crate::KvAdapter)
//! operation. It wraps the subsystem errors ([`KeyError`], [`ConfigError`],
//! [`PluginSystemError`], [`SerializationError`], [`BackendError`]) and adds
//! the operation, the caller key and, once known, the backend identity, so a
//! malformed key, a backend that is down and a lost race read differently.
//!
//! A compare-and-swap miss is never a `KvError`; it is an `Ok(false)`.
use std::fmt;

use thiserror::Error;

use crate::config::ConfigError;
use crate::key::KeyError;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::traits::{BackendError, BackendErrorKind};
use crate::serializer::SerializationError;

/// The caller-facing operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Delete,
    DeleteTree,
    Exists,
    Get,
    List,
    Put,
    AtomicGet,
    AtomicPut,
    AtomicCreate,
    AtomicDelete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Delete => "delete",
            Operation::DeleteTree => "deletetree",
            Operation::Exists => "exists",
            Operation::Get => "get",
            Operation::List => "list",
            Operation::Put => "put",
            Operation::AtomicGet => "atomic_get",
            Operation::AtomicPut => "atomic_put",
            Operation::AtomicCreate => "atomic_create",
            Operation::AtomicDelete => "atomic_delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error categories, in the order a call can hit them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    InvalidKey,
    Config,
    Construction,
    Serialization,
    BackendOperation,
    LockTimeout,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ErrorCategory::InvalidKey => "InvalidKey",
            ErrorCategory::Config => "ConfigError",
            ErrorCategory::Construction => "ConstructionError",
            ErrorCategory::Serialization => "SerializationError",
            ErrorCategory::BackendOperation => "BackendOperationError",
            ErrorCategory::LockTimeout => "LockTimeout",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Error)]
pub enum KvError {
    #[error("{operation} '{key}': invalid key: {source}")]
    InvalidKey {
        operation: Operation,
        key: String,
        #[source]
        source: KeyError,
    },

    #[error("{operation} '{key}': configuration error: {source}")]
    Config {
        operation: Operation,
        key: String,
        #[source]
        source: ConfigError,
    },

    #[error("{operation} '{key}' on backend '{identity}': {source}")]
    Construction {
        operation: Operation,
        key: String,
        identity: String,
        #[source]
        source: PluginSystemError,
    },

    #[error("{operation} '{key}' on backend '{identity}': serialization failed: {source}")]
    Serialization {
        operation: Operation,
        key: String,
        identity: String,
        #[source]
        source: SerializationError,
    },

    #[error("{operation} '{key}' on backend '{identity}' failed: {source}")]
    BackendOperation {
        operation: Operation,
        key: String,
        identity: String,
        #[source]
        source: BackendError,
    },
}

impl KvError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            KvError::InvalidKey { .. } => ErrorCategory::InvalidKey,
            KvError::Config { .. } => ErrorCategory::Config,
            KvError::Construction { .. } => ErrorCategory::Construction,
            KvError::Serialization { .. } => ErrorCategory::Serialization,
            KvError::BackendOperation { source, .. } if source.kind == BackendErrorKind::LockTimeout => {
                ErrorCategory::LockTimeout
            }
            KvError::BackendOperation { .. } => ErrorCategory::BackendOperation,
        }
    }

    /// Whether `softfail` may downgrade this error to a warning. A malformed
    /// call never is.
    pub fn is_softfailable(&self) -> bool {
        !matches!(self, KvError::InvalidKey { .. } | KvError::Config { .. })
    }

    pub fn is_lock_timeout(&self) -> bool {
        self.category() == ErrorCategory::LockTimeout
    }

    pub fn operation(&self) -> Operation {
        match self {
            KvError::InvalidKey { operation, .. }
            | KvError::Config { operation, .. }
            | KvError::Construction { operation, .. }
            | KvError::Serialization { operation, .. }
            | KvError::BackendOperation { operation, .. } => *operation,
        }
    }

    /// The key as the caller passed it
    pub fn key(&self) -> &str {
        match self {
            KvError::InvalidKey { key, .. }
            | KvError::Config { key, .. }
            | KvError::Construction { key, .. }
            | KvError::Serialization { key, .. }
            | KvError::BackendOperation { key, .. } => key,
        }
    }

    /// Backend identity, when resolution got far enough to know it
    pub fn identity(&self) -> Option<&str> {
        match self {
            KvError::InvalidKey { .. } | KvError::Config { .. } => None,
            KvError::Construction { identity, .. }
            | KvError::Serialization { identity, .. }
            | KvError::BackendOperation { identity, .. } => Some(identity),
        }
    }

    /// The backend's own error, for backend operation failures
    pub fn backend_error(&self) -> Option<&BackendError> {
        match self {
            KvError::BackendOperation { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Result type for adapter operations
pub type KvResult<T> = std::result::Result<T, KvError>;
