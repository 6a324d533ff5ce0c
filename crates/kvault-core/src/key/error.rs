//! # kvault Key Errors
//!
//! Defines [`KeyError`], the error returned when a caller key violates the
//! key naming grammar. Each variant carries a distinct, human-readable reason
//! so a caller can tell exactly which rule the key broke.
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("key is empty")]
    Empty,

    #[error("key '{key}' contains whitespace")]
    Whitespace { key: String },

    #[error("key '{key}' contains disallowed character '{character}'; allowed characters are [a-zA-Z0-9._:-/]")]
    InvalidCharacter { key: String, character: char },

    #[error("key '{key}' contains uppercase character '{character}'; this key grammar only allows lowercase")]
    Uppercase { key: String, character: char },

    #[error("key '{key}' contains a relative path segment '{segment}' (/./ and /../ are not allowed)")]
    RelativeSegment { key: String, segment: String },
}

impl KeyError {
    /// The offending key, when there is one
    pub fn key(&self) -> &str {
        match self {
            KeyError::Empty => "",
            KeyError::Whitespace { key }
            | KeyError::InvalidCharacter { key, .. }
            | KeyError::Uppercase { key, .. }
            | KeyError::RelativeSegment { key, .. } => key,
        }
    }
}
