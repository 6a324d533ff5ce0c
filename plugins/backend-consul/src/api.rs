//! Requests, responses and payloads of the Consul KV HTTP API.
use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Path prefix of the KV endpoint
pub const KV_PATH: &str = "/v1/kv";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsulError {
    #[error("{method} {url} failed: {message}")]
    Transport { method: Method, url: String, message: String },

    #[error("Unexpected response for {what}: {message}")]
    Decode { what: String, message: String },
}

impl ConsulError {
    fn decode(what: &str, message: impl fmt::Display) -> Self {
        ConsulError::Decode {
            what: what.to_string(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        })
    }
}

/// One call against the KV endpoint. `path` starts at `/v1/kv`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl KvRequest {
    pub fn new(method: Method, path: String) -> Self {
        Self {
            method,
            path,
            query: Vec::new(),
            body: None,
        }
    }

    /// Add a query parameter; flags such as `recurse` take an empty value
    pub fn with_query(mut self, name: &str, value: impl ToString) -> Self {
        self.query.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: &[u8]) -> Self {
        self.body = Some(body.to_vec());
        self
    }

    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
    }

    pub fn has_query(&self, name: &str) -> bool {
        self.query_value(name).is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl KvResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self { status, body: body.into() }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).trim().to_string()
    }
}

/// An entry as returned by `GET /v1/kv/<key>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KvPair {
    pub key: String,
    /// Base64 of the stored bytes; `null` for an empty value
    #[serde(default)]
    pub value: Option<String>,
    pub modify_index: i64,
}

impl KvPair {
    pub fn decoded_value(&self) -> Result<Vec<u8>, ConsulError> {
        match &self.value {
            Some(encoded) => STANDARD
                .decode(encoded)
                .map_err(|e| ConsulError::decode(&self.key, e)),
            None => Ok(Vec::new()),
        }
    }
}

fn join(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Consul key of `key` below `root`
pub fn consul_key(root: &str, key: &str) -> String {
    join(&[root, key])
}

/// Path of a single key
pub fn key_path(root: &str, key: &str) -> String {
    format!("{}/{}", KV_PATH, consul_key(root, key))
}

/// Path of the prefix holding everything below `keydir`, with a trailing slash
pub fn folder_path(root: &str, keydir: &str) -> String {
    let prefix = consul_key(root, keydir);
    if prefix.is_empty() {
        format!("{}/", KV_PATH)
    } else {
        format!("{}/{}/", KV_PATH, prefix)
    }
}

pub fn parse_pairs(what: &str, body: &[u8]) -> Result<Vec<KvPair>, ConsulError> {
    serde_json::from_slice(body).map_err(|e| ConsulError::decode(what, e))
}

pub fn parse_keys(what: &str, body: &[u8]) -> Result<Vec<String>, ConsulError> {
    serde_json::from_slice(body).map_err(|e| ConsulError::decode(what, e))
}

/// Writes and deletes answer `true` or `false`
pub fn parse_bool(what: &str, body: &[u8]) -> Result<bool, ConsulError> {
    serde_json::from_slice(body).map_err(|e| ConsulError::decode(what, e))
}

/// Split a `?keys&separator=/` answer for `prefix` into key names and folder
/// names, both relative to `prefix`
pub fn split_listing(prefix: &str, keys: &[String]) -> (Vec<String>, Vec<String>) {
    let mut names = Vec::new();
    let mut folders = Vec::new();
    for key in keys {
        let Some(rest) = key.strip_prefix(prefix) else {
            continue;
        };
        match rest.strip_suffix('/') {
            Some(folder) if !folder.is_empty() => folders.push(folder.to_string()),
            Some(_) => {}
            None if !rest.is_empty() => names.push(rest.to_string()),
            None => {}
        }
    }
    folders.sort();
    folders.dedup();
    (names, folders)
}
