//! Directory access abstraction.
//!
//! The backend talks to the directory only through [`DirectoryClient`], in
//! terms of LDAP result codes. The default implementation is
//! [`LdapToolClient`](crate::tools::LdapToolClient).
use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// An LDAP result code, as returned by the server or mapped from a client
/// tool's exit status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResultCode(pub u32);

impl ResultCode {
    pub const SUCCESS: ResultCode = ResultCode(0);
    pub const NO_SUCH_ATTRIBUTE: ResultCode = ResultCode(16);
    pub const NO_SUCH_OBJECT: ResultCode = ResultCode(32);
    pub const INVALID_CREDENTIALS: ResultCode = ResultCode(49);
    pub const BUSY: ResultCode = ResultCode(51);
    pub const UNAVAILABLE: ResultCode = ResultCode(52);
    pub const NOT_ALLOWED_ON_NON_LEAF: ResultCode = ResultCode(66);
    pub const ALREADY_EXISTS: ResultCode = ResultCode(68);
    pub const OTHER: ResultCode = ResultCode(80);
    /// Client-side failure, such as a tool that could not be started
    pub const LOCAL_ERROR: ResultCode = ResultCode(82);
    pub const ASSERTION_FAILED: ResultCode = ResultCode(122);

    pub fn name(&self) -> &'static str {
        match *self {
            ResultCode::SUCCESS => "success",
            ResultCode::NO_SUCH_ATTRIBUTE => "noSuchAttribute",
            ResultCode::NO_SUCH_OBJECT => "noSuchObject",
            ResultCode::INVALID_CREDENTIALS => "invalidCredentials",
            ResultCode::BUSY => "busy",
            ResultCode::UNAVAILABLE => "unavailable",
            ResultCode::NOT_ALLOWED_ON_NON_LEAF => "notAllowedOnNonLeaf",
            ResultCode::ALREADY_EXISTS => "entryAlreadyExists",
            ResultCode::OTHER => "other",
            ResultCode::LOCAL_ERROR => "localError",
            ResultCode::ASSERTION_FAILED => "assertionFailed",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.0, self.name())
    }
}

/// A failed directory operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("LDAP error {code}: {message}")]
pub struct LdapError {
    pub code: ResultCode,
    pub message: String,
}

impl LdapError {
    pub fn new(code: ResultCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn is(&self, code: ResultCode) -> bool {
        self.code == code
    }
}

pub type LdapResult<T> = std::result::Result<T, LdapError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    Base,
    OneLevel,
    Subtree,
}

impl SearchScope {
    /// Value for the `-s` option of `ldapsearch`
    pub fn as_arg(&self) -> &'static str {
        match self {
            SearchScope::Base => "base",
            SearchScope::OneLevel => "one",
            SearchScope::Subtree => "sub",
        }
    }
}

/// A directory entry. Attribute names are kept as the server returns them;
/// use [`DirectoryEntry::first`] for case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl DirectoryEntry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self { dn: dn.into(), attributes: BTreeMap::new() }
    }

    pub fn with_attribute(mut self, name: &str, value: impl Into<String>) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: &str, value: impl Into<String>) {
        self.attributes.entry(name.to_string()).or_default().push(value.into());
    }

    /// All values of an attribute, matching the name case-insensitively
    pub fn values(&self, name: &str) -> &[String] {
        self.attributes
            .iter()
            .find(|(attr, _)| attr.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
            .unwrap_or(&[])
    }

    pub fn first(&self, name: &str) -> Option<&str> {
        self.values(name).first().map(String::as_str)
    }
}

/// One change of an LDAP modify operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modification {
    Replace { attribute: String, values: Vec<String> },
}

impl Modification {
    pub fn replace(attribute: &str, value: impl Into<String>) -> Self {
        Modification::Replace {
            attribute: attribute.to_string(),
            values: vec![value.into()],
        }
    }
}

/// Synchronous access to a directory server.
///
/// `assertion` is an LDAP filter the target entry must match for the
/// operation to apply (RFC 4528); a non-matching entry fails with
/// [`ResultCode::ASSERTION_FAILED`] and is left untouched.
pub trait DirectoryClient: Send + Sync + fmt::Debug {
    fn search(
        &self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[&str],
    ) -> LdapResult<Vec<DirectoryEntry>>;

    fn add(&self, entry: &DirectoryEntry) -> LdapResult<()>;

    fn modify(&self, dn: &str, changes: &[Modification], assertion: Option<&str>) -> LdapResult<()>;

    /// Delete an entry, and with `recursive` everything below it
    fn delete(&self, dn: &str, recursive: bool, assertion: Option<&str>) -> LdapResult<()>;
}
