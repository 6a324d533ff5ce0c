use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use semver::VersionReq;
use serde::{Deserialize, Serialize};

use crate::config::ResolvedConfig;
use crate::key::KeyGrammar;

/// Broad classification of a backend failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendErrorKind {
    /// The key or folder does not exist
    NotFound,
    /// A folder was addressed where a key was expected (or the reverse)
    IsFolder,
    /// A bounded wait for an exclusive lock expired
    LockTimeout,
    /// The backend was refused access to the underlying storage
    PermissionDenied,
    /// The backend could not be reached or did not answer
    Unavailable,
    /// The backend does not implement the operation
    Unsupported,
    /// The backend configuration is unusable
    InvalidConfig,
    /// Anything else the backend reported
    Other,
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            BackendErrorKind::NotFound => "not found",
            BackendErrorKind::IsFolder => "is a folder",
            BackendErrorKind::LockTimeout => "lock timeout",
            BackendErrorKind::PermissionDenied => "permission denied",
            BackendErrorKind::Unavailable => "unavailable",
            BackendErrorKind::Unsupported => "unsupported",
            BackendErrorKind::InvalidConfig => "invalid configuration",
            BackendErrorKind::Other => "failed",
        };
        f.write_str(text)
    }
}

/// The `err_msg` half of a backend result, with a kind so "not found" and
/// "fatal" are told apart without inspecting the message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::NotFound, message)
    }

    pub fn is_folder(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::IsFolder, message)
    }

    pub fn lock_timeout(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::LockTimeout, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Unavailable, message)
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::InvalidConfig, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Other, message)
    }

    pub fn unsupported(operation: &str, identity: &str) -> Self {
        Self::new(
            BackendErrorKind::Unsupported,
            format!("operation '{}' is not supported by backend '{}'", operation, identity),
        )
    }

    /// Map an I/O error onto a backend error, keeping the OS message
    pub fn from_io(error: &std::io::Error, context: impl fmt::Display) -> Self {
        let kind = match error.kind() {
            std::io::ErrorKind::NotFound => BackendErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => BackendErrorKind::PermissionDenied,
            std::io::ErrorKind::IsADirectory => BackendErrorKind::IsFolder,
            _ => BackendErrorKind::Other,
        };
        Self::new(kind, format!("{}: {}", context, error))
    }

    /// Failures a caller may reasonably retry later
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, BackendErrorKind::LockTimeout | BackendErrorKind::Unavailable)
    }
}

/// Shorthand for results returned by backend operations
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Opaque, backend-assigned version stamp used for compare-and-swap.
///
/// The core never interprets it beyond equality; [`Version::ABSENT`] marks
/// "the key does not exist".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Sentinel for a key that does not exist
    pub const ABSENT: Version = Version(-1);

    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn is_absent(&self) -> bool {
        self.0 < 0
    }

    /// Any negative stamp means "absent"; fold them all into [`Version::ABSENT`]
    pub fn normalized(self) -> Self {
        if self.is_absent() { Version::ABSENT } else { self }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Raw stored bytes plus their version, as returned by `atomic_get`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomicEntry {
    pub value: Option<Vec<u8>>,
    pub version: Version,
}

impl AtomicEntry {
    /// The well-formed "does not exist" result
    pub fn absent() -> Self {
        Self { value: None, version: Version::ABSENT }
    }

    pub fn present(value: Vec<u8>, version: Version) -> Self {
        Self { value: Some(value), version }
    }
}

/// One level of a folder: keys with their raw bytes, and subfolder names.
/// Names are relative to the listed folder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub keys: BTreeMap<String, Vec<u8>>,
    pub folders: Vec<String>,
}

/// The operation set every storage backend implements.
///
/// Keys reaching a backend are already validated, namespaced and cleaned
/// (no leading or trailing slash). Instances are shared between threads and
/// between units of work that resolve to the same `(type, id)`, so
/// implementations synchronize internally.
pub trait Backend: Send + Sync + fmt::Debug {
    /// `<type>/<id>` identity of this instance
    fn identity(&self) -> &str;

    /// Grammar the backend needs keys to follow
    fn key_grammar(&self) -> KeyGrammar {
        KeyGrammar::Standard
    }

    /// Remove a key. Removing an absent key succeeds.
    fn delete(&self, key: &str) -> BackendResult<()>;

    /// Recursively remove a folder, best effort. An absent folder succeeds.
    fn deletetree(&self, keydir: &str) -> BackendResult<()>;

    /// Whether a key or folder exists. An error means the answer is unknown.
    fn exists(&self, key: &str) -> BackendResult<bool>;

    /// Read the stored bytes of a key
    fn get(&self, key: &str) -> BackendResult<Vec<u8>>;

    /// List one level of a folder, skipping entries that cannot be read
    fn list(&self, keydir: &str) -> BackendResult<Listing>;

    /// Store bytes at a key, creating parent folders as needed. Readers never
    /// observe a partially written value.
    fn put(&self, key: &str, value: &[u8]) -> BackendResult<()>;

    /// Whether the compare-and-swap operations below are implemented
    fn supports_atomic(&self) -> bool {
        false
    }

    /// Read a key together with its version. A missing key is reported as
    /// [`AtomicEntry::absent`], not as an error.
    fn atomic_get(&self, _key: &str) -> BackendResult<AtomicEntry> {
        Err(BackendError::unsupported("atomic_get", self.identity()))
    }

    /// Store `value` iff the current version equals `previous`.
    /// `Ok(false)` is a CAS miss and leaves the stored state untouched.
    fn atomic_put(&self, _key: &str, _value: &[u8], _previous: Version) -> BackendResult<bool> {
        Err(BackendError::unsupported("atomic_put", self.identity()))
    }

    /// Store `value` only if the key does not exist yet
    fn atomic_create(&self, key: &str, value: &[u8]) -> BackendResult<bool> {
        self.atomic_put(key, value, Version::ABSENT)
    }

    /// Remove the key iff the current version equals `previous`
    fn atomic_delete(&self, _key: &str, _previous: Version) -> BackendResult<bool> {
        Err(BackendError::unsupported("atomic_delete", self.identity()))
    }
}

/// Builds configured backend instances of one type.
///
/// Factories live for the whole process and are shared by every unit of
/// work, so state that must outlive a single registry (such as in-memory
/// stores) belongs here.
pub trait BackendFactory: Send + Sync {
    /// The `type` value this factory answers to in backend configuration
    fn backend_type(&self) -> &'static str;

    /// Core API versions this backend was written against
    fn compatible_api_versions(&self) -> VersionReq;

    /// Construct an instance and configure it from the resolved configuration
    fn create(&self, config: &ResolvedConfig) -> BackendResult<Arc<dyn Backend>>;
}
