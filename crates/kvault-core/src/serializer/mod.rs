//! # kvault Serializer
//!
//! Converts a `(value, metadata)` pair to and from the canonical JSON
//! envelope every backend stores:
//!
//! ```json
//! { "value": <json value or base64 string>, "metadata": { ... },
//!   "encoding": "base64", "original_encoding": "ASCII-8BIT" }
//! ```
//!
//! `encoding` and `original_encoding` only appear for binary payloads, which
//! are carried as base64 text and re-tagged on decode.
pub mod error;
pub mod value;

pub use error::SerializationError;
pub use value::{Metadata, Value};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;

/// The only `encoding` scheme the envelope supports
pub const BASE64_ENCODING: &str = "base64";

/// `original_encoding` tag for raw bytes
pub const BINARY_ENCODING: &str = "ASCII-8BIT";

/// `original_encoding` tag for UTF-8 text
pub const UTF8_ENCODING: &str = "UTF-8";

#[derive(Serialize)]
struct Envelope<'a> {
    value: serde_json::Value,
    metadata: &'a Metadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    encoding: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    original_encoding: Option<&'static str>,
}

/// Encode a value and its metadata into envelope bytes
pub fn serialize(value: &Value, metadata: &Metadata) -> Result<Vec<u8>, SerializationError> {
    let envelope = match value {
        Value::Binary(bytes) => Envelope {
            value: serde_json::Value::String(STANDARD.encode(bytes)),
            metadata,
            encoding: Some(BASE64_ENCODING),
            original_encoding: Some(BINARY_ENCODING),
        },
        other => Envelope {
            value: other.to_json()?,
            metadata,
            encoding: None,
            original_encoding: None,
        },
    };

    serde_json::to_vec(&envelope).map_err(|source| SerializationError::Encode { source })
}

/// Decode envelope bytes back into the value and metadata they carry
pub fn deserialize(bytes: &[u8]) -> Result<(Value, Metadata), SerializationError> {
    let json: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|source| SerializationError::InvalidJson { source })?;

    let serde_json::Value::Object(mut envelope) = json else {
        return Err(SerializationError::NotAnEnvelope);
    };

    let raw_value = envelope.remove("value").ok_or(SerializationError::MissingValue)?;

    let metadata = match envelope.remove("metadata") {
        None | Some(serde_json::Value::Null) => Metadata::new(),
        Some(serde_json::Value::Object(map)) => map.into_iter().collect(),
        Some(_) => return Err(SerializationError::InvalidMetadata),
    };

    let value = match envelope.remove("encoding") {
        None | Some(serde_json::Value::Null) => Value::from_json(raw_value)?,
        Some(serde_json::Value::String(encoding)) if encoding == BASE64_ENCODING => {
            let original = match envelope.remove("original_encoding") {
                Some(serde_json::Value::String(tag)) => Some(tag),
                _ => None,
            };
            decode_base64(raw_value, original.as_deref())?
        }
        Some(serde_json::Value::String(other)) => return Err(SerializationError::UnsupportedEncoding(other)),
        Some(other) => return Err(SerializationError::UnsupportedEncoding(other.to_string())),
    };

    Ok((value, metadata))
}

fn decode_base64(raw_value: serde_json::Value, original_encoding: Option<&str>) -> Result<Value, SerializationError> {
    let serde_json::Value::String(text) = raw_value else {
        return Err(SerializationError::InvalidBase64("value is not a string".to_string()));
    };

    let bytes = STANDARD
        .decode(text.as_bytes())
        .map_err(|e| SerializationError::InvalidBase64(e.to_string()))?;

    match original_encoding {
        Some(tag) if tag.eq_ignore_ascii_case(UTF8_ENCODING) || tag.eq_ignore_ascii_case("utf8") => {
            String::from_utf8(bytes)
                .map(Value::String)
                .map_err(|_| SerializationError::InvalidText { encoding: tag.to_string() })
        }
        Some(tag) if tag.eq_ignore_ascii_case(BINARY_ENCODING) || tag.eq_ignore_ascii_case("binary") => {
            Ok(Value::Binary(bytes))
        }
        Some(tag) => {
            log::debug!("Unknown original_encoding '{}', returning raw bytes", tag);
            Ok(Value::Binary(bytes))
        }
        None => Ok(Value::Binary(bytes)),
    }
}
