//! # kvault Serializer Errors
//!
//! Defines [`SerializationError`], raised when a value cannot be encoded into
//! the storage envelope or when stored bytes cannot be decoded back out of it.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("stored data is not valid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },

    #[error("stored data is not a JSON object envelope")]
    NotAnEnvelope,

    #[error("envelope has no 'value' field")]
    MissingValue,

    #[error("unsupported value encoding '{0}'")]
    UnsupportedEncoding(String),

    #[error("envelope value is not valid base64: {0}")]
    InvalidBase64(String),

    #[error("decoded bytes are not valid {encoding}")]
    InvalidText { encoding: String },

    #[error("envelope metadata must be a JSON object")]
    InvalidMetadata,

    #[error("value cannot be represented: {0}")]
    Unrepresentable(String),

    #[error("failed to encode envelope: {source}")]
    Encode {
        #[source]
        source: serde_json::Error,
    },
}
